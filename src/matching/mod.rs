//! Fuzzy identity matching for trade disclosures.
//!
//! Disclosure feeds spell the same person half a dozen ways: "Hon. Robert E.
//! Smith Jr.", "Smith, Robert", "Bob Smith". Matching expands both sides into
//! variant sets (format swaps, nicknames, suffix stripping) and scores the
//! best pair with an edit-distance ratio, with an optional district-code
//! tiebreaker.

use serde::{Deserialize, Serialize};
use tracing::debug;

mod nicknames;

use nicknames::nickname_alternatives;

const TITLE_PREFIXES: &[&str] = &[
    "mr", "mrs", "ms", "dr", "hon", "rep", "sen", "representative", "senator",
];
const NAME_SUFFIXES: &[&str] = &["jr", "sr", "ii", "iii", "iv", "v"];

/// Scoring constants for the matcher.
///
/// The boost/penalty values are carried over from the production matcher
/// as-is; they are tuning constants, not derived quantities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// Minimum final score to accept a match.
    pub match_threshold: f64,
    /// Added when both districts are present and equal (capped at 1.0).
    pub district_match_boost: f64,
    /// Name similarity above which a district mismatch is ignored.
    pub name_override_threshold: f64,
    /// Multiplier applied on a district mismatch below the override threshold.
    pub district_mismatch_penalty: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            match_threshold: 0.85,
            district_match_boost: 0.1,
            name_override_threshold: 0.95,
            district_mismatch_penalty: 0.8,
        }
    }
}

/// A roster entry to match a disclosure against.
#[derive(Debug, Clone)]
pub struct MatchCandidate<'a> {
    pub name: &'a str,
    pub district: Option<&'a str>,
}

/// Accepted match: index into the candidate slice plus the final score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchOutcome {
    pub index: usize,
    pub score: f64,
}

/// Name matcher with configurable scoring.
#[derive(Debug, Clone, Default)]
pub struct NameMatcher {
    config: MatcherConfig,
}

impl NameMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Score a single candidate against a target name.
    pub fn score(
        &self,
        target: &str,
        target_district: Option<&str>,
        candidate: &str,
        candidate_district: Option<&str>,
    ) -> f64 {
        let target_variants = expand_variants(target);
        let candidate_variants = expand_variants(candidate);

        let mut name_score: f64 = 0.0;
        for t in &target_variants {
            for c in &candidate_variants {
                name_score = name_score.max(similarity(t, c));
            }
        }

        match (target_district, candidate_district) {
            (Some(td), Some(cd)) => {
                if normalize_district(td) == normalize_district(cd) {
                    (name_score + self.config.district_match_boost).min(1.0)
                } else if name_score < self.config.name_override_threshold {
                    name_score * self.config.district_mismatch_penalty
                } else {
                    name_score
                }
            }
            _ => name_score,
        }
    }

    /// Whether a candidate clears the acceptance threshold.
    pub fn is_match(
        &self,
        target: &str,
        target_district: Option<&str>,
        candidate: &str,
        candidate_district: Option<&str>,
    ) -> bool {
        self.score(target, target_district, candidate, candidate_district)
            >= self.config.match_threshold
    }

    /// Best accepted candidate, if any. Linear scan; ties keep the
    /// first-seen candidate.
    pub fn best_match(
        &self,
        target: &str,
        target_district: Option<&str>,
        candidates: &[MatchCandidate<'_>],
    ) -> Option<MatchOutcome> {
        let mut best: Option<MatchOutcome> = None;

        for (index, candidate) in candidates.iter().enumerate() {
            let score = self.score(target, target_district, candidate.name, candidate.district);
            debug!(target, candidate = candidate.name, score, "Scored candidate");
            if best.map_or(true, |b| score > b.score) {
                best = Some(MatchOutcome { index, score });
            }
        }

        best.filter(|b| b.score >= self.config.match_threshold)
    }
}

/// Canonicalize a name: lowercase, drop punctuation, collapse whitespace,
/// strip leading titles and trailing generational suffixes.
pub fn normalize(name: &str) -> String {
    let cleaned: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();

    let mut tokens: Vec<&str> = cleaned.split_whitespace().collect();

    while tokens.first().map_or(false, |t| TITLE_PREFIXES.contains(t)) {
        tokens.remove(0);
    }
    while tokens.len() > 1 && tokens.last().map_or(false, |t| NAME_SUFFIXES.contains(t)) {
        tokens.pop();
    }

    tokens.join(" ")
}

/// Raw-format variants before canonicalization: the name itself,
/// "Last, First" reordering, and quoted-nickname extraction.
pub fn parse_name_formats(name: &str) -> Vec<String> {
    let mut formats = vec![name.to_string()];

    // "Whitehouse, Sheldon" -> "Sheldon Whitehouse"
    if let Some((last, first)) = name.split_once(',') {
        formats.push(format!("{} {}", first.trim(), last.trim()));
    }

    // `Robert "Bob" Smith` -> `Bob Smith` plus the unquoted full name
    for quote in ['"', '\''] {
        let mut parts = name.splitn(3, quote);
        if let (Some(before), Some(nick), Some(after)) = (parts.next(), parts.next(), parts.next())
        {
            let nick = nick.trim();
            if !nick.is_empty() {
                let last = after.split_whitespace().last().unwrap_or("");
                if !last.is_empty() {
                    formats.push(format!("{nick} {last}"));
                }
                formats.push(format!("{} {}", before.trim(), after.trim()));
            }
        }
    }

    formats
}

/// Full variant set for one identity, normalized and deduplicated in
/// insertion order: format variants, first+last collapse, token-order swap,
/// and nickname substitutions on the first token.
pub fn expand_variants(name: &str) -> Vec<String> {
    let mut variants: Vec<String> = Vec::new();
    let mut push = |v: String| {
        if !v.is_empty() && !variants.contains(&v) {
            variants.push(v);
        }
    };

    for format in parse_name_formats(name) {
        let canonical = normalize(&format);
        if canonical.is_empty() {
            continue;
        }
        push(canonical.clone());

        let tokens: Vec<&str> = canonical.split_whitespace().collect();

        // Drop middle names/initials.
        if tokens.len() > 2 {
            push(format!("{} {}", tokens[0], tokens[tokens.len() - 1]));
        }

        // "first last" <-> "last first"
        if tokens.len() == 2 {
            push(format!("{} {}", tokens[1], tokens[0]));
        }
    }

    // Nickname substitution on every variant collected so far.
    let base = variants.clone();
    for variant in base {
        let tokens: Vec<&str> = variant.split_whitespace().collect();
        let Some((first, rest)) = tokens.split_first() else {
            continue;
        };
        for alternative in nickname_alternatives(first) {
            let mut swapped = vec![alternative];
            swapped.extend(rest.iter().copied());
            let v = swapped.join(" ");
            if !v.is_empty() && !variants.contains(&v) {
                variants.push(v);
            }
        }
    }

    variants
}

/// Edit-distance similarity ratio in [0, 1].
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let max_len = a_chars.len().max(b_chars.len());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a_chars, &b_chars) as f64 / max_len as f64
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Canonical district form: `"OH02"` -> `"OH-2"`, `" MD06"` -> `"MD-6"`.
/// Already-hyphenated codes pass through unchanged; idempotent.
pub fn normalize_district(code: &str) -> String {
    let trimmed: String = code.split_whitespace().collect();
    if trimmed.contains('-') {
        return trimmed;
    }

    let chars: Vec<char> = trimmed.chars().collect();
    if chars.len() >= 2
        && chars[chars.len() - 2].is_ascii_digit()
        && chars[chars.len() - 1].is_ascii_digit()
    {
        let split = chars.len() - 2;
        let state: String = chars[..split].iter().collect();
        let digits: String = chars[split..].iter().collect();
        let number = digits.trim_start_matches('0');
        let number = if number.is_empty() { "0" } else { number };
        return format!("{state}-{number}");
    }

    trimmed
}
