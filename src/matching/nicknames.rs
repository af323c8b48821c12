//! Common-nickname table for first-name substitution.

/// Canonical first name -> common nicknames.
const NICKNAMES: &[(&str, &[&str])] = &[
    ("alexander", &["alex", "al"]),
    ("andrew", &["andy", "drew"]),
    ("anthony", &["tony"]),
    ("benjamin", &["ben", "benny"]),
    ("charles", &["charlie", "chuck"]),
    ("christopher", &["chris"]),
    ("daniel", &["dan", "danny"]),
    ("david", &["dave"]),
    ("donald", &["don"]),
    ("edward", &["ed", "eddie", "ted"]),
    ("elizabeth", &["liz", "beth", "betsy"]),
    ("frederick", &["fred"]),
    ("gerald", &["jerry"]),
    ("gregory", &["greg"]),
    ("james", &["jim", "jimmy"]),
    ("jennifer", &["jen", "jenny"]),
    ("john", &["jack", "johnny"]),
    ("jonathan", &["jon"]),
    ("joseph", &["joe", "joey"]),
    ("joshua", &["josh"]),
    ("katherine", &["kate", "katie", "kathy"]),
    ("kenneth", &["ken", "kenny"]),
    ("lawrence", &["larry"]),
    ("margaret", &["maggie", "peggy"]),
    ("matthew", &["matt"]),
    ("michael", &["mike", "mick"]),
    ("nicholas", &["nick"]),
    ("patricia", &["pat", "patty"]),
    ("raymond", &["ray"]),
    ("richard", &["rick", "rich", "dick"]),
    ("robert", &["bob", "bobby", "rob"]),
    ("ronald", &["ron"]),
    ("samuel", &["sam"]),
    ("steven", &["steve"]),
    ("thomas", &["tom", "tommy"]),
    ("timothy", &["tim"]),
    ("william", &["bill", "billy", "will"]),
];

/// All alternative spellings for a first name, in table order.
///
/// A canonical name yields its nicknames; a nickname yields its canonical
/// form plus the sibling nicknames.
pub fn nickname_alternatives(first: &str) -> Vec<&'static str> {
    for (canonical, nicks) in NICKNAMES {
        if *canonical == first {
            return nicks.to_vec();
        }
        if nicks.contains(&first) {
            let mut out = vec![*canonical];
            out.extend(nicks.iter().copied().filter(|n| *n != first));
            return out;
        }
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_yields_nicknames() {
        assert_eq!(nickname_alternatives("robert"), vec!["bob", "bobby", "rob"]);
    }

    #[test]
    fn nickname_yields_canonical_and_siblings() {
        let alts = nickname_alternatives("bob");
        assert_eq!(alts[0], "robert");
        assert!(alts.contains(&"bobby"));
        assert!(!alts.contains(&"bob"));
    }

    #[test]
    fn unknown_name_yields_nothing() {
        assert!(nickname_alternatives("sheldon").is_empty());
    }
}
