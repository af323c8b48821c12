//! Trade disclosure model: third-party-reported transactions by tracked
//! individuals and committees.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Reported transaction type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Purchase,
    Sale,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Purchase => "purchase",
            TransactionType::Sale => "sale",
        }
    }
}

/// A publicly disclosed trade. Immutable once fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeDisclosure {
    /// Name of the disclosing individual as reported by the feed.
    pub entity_name: String,

    /// Canonical district code, when the feed provides one (e.g. "NJ-5").
    #[serde(default)]
    pub district: Option<String>,

    /// Ticker symbol of the reported transaction.
    pub ticker: String,

    /// Date the transaction occurred.
    pub transaction_date: NaiveDate,

    /// Purchase or sale.
    pub transaction_type: TransactionType,

    /// Disclosed amount range lower bound in dollars.
    pub amount_min: Decimal,

    /// Disclosed amount range upper bound in dollars.
    pub amount_max: Decimal,

    /// When the disclosure record was last modified at the source.
    pub last_modified: DateTime<Utc>,
}

impl TradeDisclosure {
    /// Stable identifier for dedup and traceability.
    pub fn disclosure_id(&self) -> String {
        format!(
            "{}-{}-{}",
            self.entity_name.to_lowercase().replace(' ', "_"),
            self.ticker,
            self.transaction_date
        )
    }
}

/// Parse a disclosed amount range like `"$50,001 - $100,000"` into
/// `(min, max)`. A single figure `"$75,000"` yields an equal pair.
/// Malformed input yields `None`, never a panic.
pub fn parse_amount_range(raw: &str) -> Option<(Decimal, Decimal)> {
    let parts: Vec<&str> = raw.split('-').map(str::trim).collect();
    match parts.as_slice() {
        [single] => {
            let value = parse_dollars(single)?;
            Some((value, value))
        }
        [low, high] => {
            let min = parse_dollars(low)?;
            let max = parse_dollars(high)?;
            if max < min {
                return None;
            }
            Some((min, max))
        }
        _ => None,
    }
}

fn parse_dollars(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw.chars().filter(|c| c.is_ascii_digit() || *c == '.').collect();
    if cleaned.is_empty() {
        return None;
    }
    let value: Decimal = cleaned.parse().ok()?;
    if value.is_sign_negative() {
        return None;
    }
    Some(value)
}
