//! Trade intents: what an agent decided to do, before brokerage submission.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
    Short,
    Cover,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
            TradeSide::Short => "short",
            TradeSide::Cover => "cover",
        }
    }

    /// Side that flattens a position opened with this side.
    pub fn closing_side(&self) -> TradeSide {
        match self {
            TradeSide::Buy => TradeSide::Sell,
            TradeSide::Sell => TradeSide::Buy,
            TradeSide::Short => TradeSide::Cover,
            TradeSide::Cover => TradeSide::Short,
        }
    }
}

/// Where a trade intent came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalSource {
    /// Produced from a matched disclosure.
    Disclosure { disclosure_id: String },
    /// Produced by a technical strategy, no disclosure involved.
    Technical { indicator: String },
}

/// A decided trade, traceable to exactly one producing agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeIntent {
    pub ticker: String,
    pub side: TradeSide,
    /// Notional dollar amount.
    pub amount: Decimal,
    /// Human-readable justification for logs and the dashboard.
    pub reason: String,
    /// Confidence in [0, 1].
    pub confidence: f64,
    pub source: SignalSource,
    pub agent_id: String,
    pub created_at: DateTime<Utc>,
}

impl TradeIntent {
    pub fn from_disclosure(
        agent_id: &str,
        ticker: &str,
        side: TradeSide,
        amount: Decimal,
        reason: String,
        confidence: f64,
        disclosure_id: String,
    ) -> Self {
        Self {
            ticker: ticker.to_string(),
            side,
            amount,
            reason,
            confidence: confidence.clamp(0.0, 1.0),
            source: SignalSource::Disclosure { disclosure_id },
            agent_id: agent_id.to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn technical(
        agent_id: &str,
        ticker: &str,
        side: TradeSide,
        amount: Decimal,
        reason: String,
        confidence: f64,
        indicator: &str,
    ) -> Self {
        Self {
            ticker: ticker.to_string(),
            side,
            amount,
            reason,
            confidence: confidence.clamp(0.0, 1.0),
            source: SignalSource::Technical {
                indicator: indicator.to_string(),
            },
            agent_id: agent_id.to_string(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn closing_sides() {
        assert_eq!(TradeSide::Buy.closing_side(), TradeSide::Sell);
        assert_eq!(TradeSide::Short.closing_side(), TradeSide::Cover);
    }

    #[test]
    fn confidence_is_clamped() {
        let intent = TradeIntent::technical("a1", "AAPL", TradeSide::Buy, dec!(100), "rsi".into(), 1.7, "rsi");
        assert_eq!(intent.confidence, 1.0);
        assert_eq!(
            intent.source,
            SignalSource::Technical { indicator: "rsi".to_string() }
        );
    }
}
