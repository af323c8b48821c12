//! External collaborator contracts: trade feed, brokerage, market data.
//!
//! The engine only depends on these traits; the HTTP-backed implementations
//! live in `http` and test doubles in `mock`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::error::EngineResult;
use crate::models::{TradeDisclosure, TradeSide};
use crate::retry::RetryPolicy;
use crate::schedule::Clock;

pub mod http;
#[cfg(test)]
pub mod mock;

/// Brokerage order direction. Copy intents map buy/cover to `Buy` and
/// sell/short to `Sell`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl From<TradeSide> for OrderSide {
    fn from(side: TradeSide) -> Self {
        match side {
            TradeSide::Buy | TradeSide::Cover => OrderSide::Buy,
            TradeSide::Sell | TradeSide::Short => OrderSide::Sell,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    Day,
    Gtc,
}

/// Accepted order as reported by the brokerage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderInfo {
    pub id: String,
    pub ticker: String,
    pub side: OrderSide,
    pub notional: Decimal,
    pub status: String,
    pub submitted_at: DateTime<Utc>,
}

/// An open brokerage position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub ticker: String,
    pub qty: Decimal,
    pub avg_entry_price: Decimal,
    pub market_value: Decimal,
    pub unrealized_pnl: Decimal,
}

/// Account-level balances.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub buying_power: Decimal,
    pub equity: Decimal,
}

/// Source of daily trade disclosures.
#[async_trait]
pub trait TradeFeed: Send + Sync {
    async fn fetch(&self, date: NaiveDate) -> EngineResult<Vec<TradeDisclosure>>;
}

/// Brokerage operations the agents need.
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    async fn validate_ticker(&self, ticker: &str) -> EngineResult<bool>;

    /// Latest trade price, `None` when the symbol has no recent print.
    async fn current_price(&self, ticker: &str) -> EngineResult<Option<Decimal>>;

    async fn place_order(
        &self,
        ticker: &str,
        side: OrderSide,
        notional: Decimal,
        time_in_force: TimeInForce,
    ) -> EngineResult<OrderInfo>;

    async fn positions(&self) -> EngineResult<Vec<BrokerPosition>>;

    async fn account(&self) -> EngineResult<AccountSnapshot>;
}

/// Historical price series for indicator computation.
#[async_trait]
pub trait MarketDataFeed: Send + Sync {
    /// Daily closing prices, oldest first, at most `lookback` points.
    async fn indicator_series(&self, ticker: &str, lookback: usize) -> EngineResult<Vec<f64>>;
}

/// Shared collaborator handles, constructed once at startup and passed by
/// reference into every agent and scheduler. No global state.
#[derive(Clone)]
pub struct AppContext {
    pub feed: Arc<dyn TradeFeed>,
    pub broker: Arc<dyn BrokerGateway>,
    pub market_data: Arc<dyn MarketDataFeed>,
    pub store: Arc<Database>,
    pub retry: RetryPolicy,
    /// Injectable so agents and schedulers share one deterministic time
    /// source in tests.
    pub clock: Arc<dyn Clock>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_sides_map_to_broker_sides() {
        assert_eq!(OrderSide::from(TradeSide::Buy), OrderSide::Buy);
        assert_eq!(OrderSide::from(TradeSide::Cover), OrderSide::Buy);
        assert_eq!(OrderSide::from(TradeSide::Sell), OrderSide::Sell);
        assert_eq!(OrderSide::from(TradeSide::Short), OrderSide::Sell);
    }
}
