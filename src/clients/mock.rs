//! In-crate test doubles for the collaborator traits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::models::TradeDisclosure;

use super::{
    AccountSnapshot, BrokerGateway, BrokerPosition, MarketDataFeed, OrderInfo, OrderSide,
    TimeInForce, TradeFeed,
};

/// Scripted disclosure feed.
#[derive(Default)]
pub struct MockTradeFeed {
    pub disclosures: Vec<TradeDisclosure>,
    pub fail_with: Mutex<Option<String>>,
    pub fetch_count: AtomicU32,
}

impl MockTradeFeed {
    pub fn with_disclosures(disclosures: Vec<TradeDisclosure>) -> Self {
        Self {
            disclosures,
            ..Self::default()
        }
    }

    /// Feed whose every fetch fails transiently with the given message.
    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Mutex::new(Some(message.to_string())),
            ..Self::default()
        }
    }
}

#[async_trait]
impl TradeFeed for MockTradeFeed {
    async fn fetch(&self, _date: NaiveDate) -> EngineResult<Vec<TradeDisclosure>> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        if let Some(msg) = self.fail_with.lock().unwrap().clone() {
            return Err(EngineError::transient(msg));
        }
        Ok(self.disclosures.clone())
    }
}

/// Recording brokerage double. Orders are captured; failure modes are
/// per-ticker.
#[derive(Default)]
pub struct MockBroker {
    pub placed: Mutex<Vec<OrderInfo>>,
    pub prices: Mutex<HashMap<String, Decimal>>,
    pub invalid_tickers: Mutex<Vec<String>>,
    /// Tickers whose first N order attempts fail transiently.
    pub transient_failures: Mutex<HashMap<String, u32>>,
    pub positions: Mutex<Vec<BrokerPosition>>,
    pub equity: Mutex<Decimal>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self {
            equity: Mutex::new(dec!(100000)),
            ..Self::default()
        }
    }

    pub fn set_price(&self, ticker: &str, price: Decimal) {
        self.prices.lock().unwrap().insert(ticker.to_string(), price);
    }

    pub fn placed_orders(&self) -> Vec<OrderInfo> {
        self.placed.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrokerGateway for MockBroker {
    async fn validate_ticker(&self, ticker: &str) -> EngineResult<bool> {
        Ok(!self.invalid_tickers.lock().unwrap().iter().any(|t| t == ticker))
    }

    async fn current_price(&self, ticker: &str) -> EngineResult<Option<Decimal>> {
        Ok(self.prices.lock().unwrap().get(ticker).copied())
    }

    async fn place_order(
        &self,
        ticker: &str,
        side: OrderSide,
        notional: Decimal,
        _time_in_force: TimeInForce,
    ) -> EngineResult<OrderInfo> {
        {
            let mut failures = self.transient_failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(ticker) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(EngineError::transient("simulated outage"));
                }
            }
        }
        if self.invalid_tickers.lock().unwrap().iter().any(|t| t == ticker) {
            return Err(EngineError::permanent(format!("invalid ticker {ticker}")));
        }

        let order = OrderInfo {
            id: Uuid::new_v4().to_string(),
            ticker: ticker.to_string(),
            side,
            notional,
            status: "accepted".to_string(),
            submitted_at: Utc::now(),
        };
        self.placed.lock().unwrap().push(order.clone());
        Ok(order)
    }

    async fn positions(&self) -> EngineResult<Vec<BrokerPosition>> {
        Ok(self.positions.lock().unwrap().clone())
    }

    async fn account(&self) -> EngineResult<AccountSnapshot> {
        let equity = *self.equity.lock().unwrap();
        Ok(AccountSnapshot {
            buying_power: equity,
            equity,
        })
    }
}

/// Canned closing-price series per ticker.
#[derive(Default)]
pub struct MockMarketData {
    pub series: Mutex<HashMap<String, Vec<f64>>>,
}

impl MockMarketData {
    pub fn with_series(ticker: &str, closes: Vec<f64>) -> Self {
        let feed = Self::default();
        feed.series.lock().unwrap().insert(ticker.to_string(), closes);
        feed
    }
}

#[async_trait]
impl MarketDataFeed for MockMarketData {
    async fn indicator_series(&self, ticker: &str, lookback: usize) -> EngineResult<Vec<f64>> {
        let series = self.series.lock().unwrap();
        let closes = series
            .get(ticker)
            .ok_or_else(|| EngineError::permanent(format!("no data for {ticker}")))?;
        let start = closes.len().saturating_sub(lookback);
        Ok(closes[start..].to_vec())
    }
}
