//! Technical agent: RSI strategy on a single ticker.
//!
//! Disclosures are ignored entirely. Each trading-day morning the agent
//! computes RSI from recent closes and derives buy/short/hold from the
//! oversold/overbought thresholds. One entry per day, a forced flatten near
//! market close, and a max-trades-per-day counter reset daily.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::clients::AppContext;
use crate::error::EngineResult;
use crate::models::{PerformanceSnapshot, TradeDisclosure, TradeIntent, TradeSide};

use super::{Agent, AgentConfig, AgentCore};

const INDICATOR_NAME: &str = "rsi";

/// Relative Strength Index over the trailing `period` changes.
/// Needs at least `period + 1` closes; returns `None` otherwise.
pub fn compute_rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period < 1 || closes.len() < period + 1 {
        return None;
    }

    let window = &closes[closes.len() - period - 1..];
    let mut gains = 0.0;
    let mut losses = 0.0;
    for pair in window.windows(2) {
        let change = pair[1] - pair[0];
        if change > 0.0 {
            gains += change;
        } else {
            losses -= change;
        }
    }

    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;

    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

pub struct TechnicalAgent {
    core: AgentCore,
    ctx: Arc<AppContext>,
    ticker: String,

    // Daily discipline, reset when the date rolls over.
    current_day: Option<NaiveDate>,
    entered_today: bool,
    trades_today: u32,

    /// Side and notional of the open intraday position, if any.
    open_position: Option<(TradeSide, Decimal)>,

    initial_value: Option<Decimal>,
    last_value: Option<Decimal>,
}

impl TechnicalAgent {
    pub fn new(config: AgentConfig, ctx: Arc<AppContext>) -> EngineResult<Self> {
        config.validate()?;
        let ticker = config.ticker.clone().unwrap_or_default();
        Ok(Self {
            core: AgentCore::new(config),
            ctx,
            ticker,
            current_day: None,
            entered_today: false,
            trades_today: 0,
            open_position: None,
            initial_value: None,
            last_value: None,
        })
    }

    fn roll_day(&mut self, today: NaiveDate) {
        if self.current_day != Some(today) {
            self.current_day = Some(today);
            self.entered_today = false;
            self.trades_today = 0;
        }
    }

    /// Morning entry analysis. At most one intent per trading day, bounded
    /// by the max-trades-per-day counter.
    async fn analyze_entry(&mut self) -> EngineResult<Option<TradeIntent>> {
        let today = self.ctx.clock.now_utc().date_naive();
        self.roll_day(today);

        let params = self.core.config.technical.clone();
        if self.entered_today {
            debug!(agent = %self.id(), "Already entered today");
            return Ok(None);
        }
        if self.trades_today >= params.max_trades_per_day {
            debug!(agent = %self.id(), "Daily trade limit reached");
            return Ok(None);
        }

        let lookback = params.rsi_period + 1;
        let market_data = Arc::clone(&self.ctx.market_data);
        let ticker = self.ticker.clone();
        let closes = self
            .ctx
            .retry
            .run("market_data.indicator_series", || {
                let market_data = Arc::clone(&market_data);
                let ticker = ticker.clone();
                async move { market_data.indicator_series(&ticker, lookback).await }
            })
            .await?;

        let Some(rsi) = compute_rsi(&closes, params.rsi_period) else {
            debug!(agent = %self.id(), bars = closes.len(), "Not enough history for RSI");
            return Ok(None);
        };

        let (side, confidence) = if rsi < params.oversold {
            (TradeSide::Buy, (params.oversold - rsi) / params.oversold)
        } else if rsi > params.overbought {
            (
                TradeSide::Short,
                (rsi - params.overbought) / (100.0 - params.overbought),
            )
        } else {
            debug!(agent = %self.id(), rsi, "RSI in neutral band, holding");
            return Ok(None);
        };

        let reason = format!("RSI({}) = {rsi:.1} on {}", params.rsi_period, self.ticker);
        info!(agent = %self.id(), rsi, side = side.as_str(), "Technical entry signal");

        Ok(Some(TradeIntent::technical(
            self.id(),
            &self.ticker,
            side,
            params.trade_amount,
            reason,
            confidence.clamp(0.05, 1.0),
            INDICATOR_NAME,
        )))
    }

    /// Close any open intraday position with an opposing order.
    async fn flatten(&mut self) -> EngineResult<()> {
        let Some((side, notional)) = self.open_position else {
            return Ok(());
        };

        let intent = TradeIntent::technical(
            self.id(),
            &self.ticker,
            side.closing_side(),
            notional,
            format!("end-of-day flatten of {} position", side.as_str()),
            1.0,
            INDICATOR_NAME,
        );

        if super::submit_intent(&self.ctx, &intent).await?.is_some() {
            info!(agent = %self.id(), ticker = %self.ticker, "Position flattened");
        }
        self.open_position = None;
        Ok(())
    }
}

#[async_trait]
impl Agent for TechnicalAgent {
    fn core(&self) -> &AgentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AgentCore {
        &mut self.core
    }

    /// Disclosures are ignored; the daily batch just re-runs the entry
    /// analysis, which is idempotent within a day.
    async fn process(
        &mut self,
        _disclosures: &[TradeDisclosure],
    ) -> EngineResult<Vec<TradeIntent>> {
        Ok(self.analyze_entry().await?.into_iter().collect())
    }

    async fn execute(&mut self, intent: &TradeIntent) -> EngineResult<bool> {
        let placed = super::submit_intent(&self.ctx, intent).await?.is_some();
        if placed {
            self.entered_today = true;
            self.trades_today += 1;
            self.open_position = Some((intent.side, intent.amount));
        }
        Ok(placed)
    }

    async fn update_positions(&mut self) -> EngineResult<()> {
        let agent_id = self.id().to_string();
        super::sync_positions_from_broker(&self.ctx, &agent_id).await
    }

    async fn compute_performance(&mut self) -> EngineResult<PerformanceSnapshot> {
        let agent_id = self.id().to_string();
        let ctx = Arc::clone(&self.ctx);
        super::account_performance(&ctx, &agent_id, &mut self.initial_value, &mut self.last_value)
            .await
    }

    async fn on_market_open(&mut self) -> EngineResult<()> {
        if let Some(intent) = self.analyze_entry().await? {
            self.execute(&intent).await?;
        }
        Ok(())
    }

    async fn on_market_close(&mut self) -> EngineResult<()> {
        self.flatten().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::test_support::technical_config;
    use crate::clients::mock::{MockBroker, MockMarketData, MockTradeFeed};
    use crate::clients::OrderSide;
    use crate::db::Database;
    use crate::retry::RetryPolicy;

    async fn ctx_with_series(closes: Vec<f64>) -> (Arc<AppContext>, Arc<MockBroker>) {
        let broker = Arc::new(MockBroker::new());
        let ctx = AppContext {
            feed: Arc::new(MockTradeFeed::default()),
            broker: broker.clone(),
            market_data: Arc::new(MockMarketData::with_series("SPY", closes)),
            store: Arc::new(Database::new("sqlite::memory:").await.unwrap()),
            retry: RetryPolicy::fast(),
            clock: Arc::new(crate::schedule::SystemClock),
        };
        (Arc::new(ctx), broker)
    }

    /// Monotonically falling closes drive RSI to 0.
    fn falling_series() -> Vec<f64> {
        (0..20).map(|i| 100.0 - i as f64).collect()
    }

    /// Monotonically rising closes drive RSI to 100.
    fn rising_series() -> Vec<f64> {
        (0..20).map(|i| 100.0 + i as f64).collect()
    }

    #[test]
    fn rsi_extremes() {
        assert_eq!(compute_rsi(&falling_series(), 14), Some(0.0));
        assert_eq!(compute_rsi(&rising_series(), 14), Some(100.0));
        assert!(compute_rsi(&[1.0, 2.0], 14).is_none());
    }

    #[test]
    fn rsi_mixed_series_is_interior() {
        let closes: Vec<f64> = (0..20)
            .map(|i| 100.0 + if i % 2 == 0 { 1.0 } else { -0.5 } * i as f64 * 0.1)
            .collect();
        let rsi = compute_rsi(&closes, 14).unwrap();
        assert!(rsi > 0.0 && rsi < 100.0);
    }

    #[tokio::test]
    async fn oversold_yields_buy_entry() {
        let (ctx, broker) = ctx_with_series(falling_series()).await;
        let mut agent = TechnicalAgent::new(technical_config("t1", "SPY"), ctx).unwrap();

        agent.on_market_open().await.unwrap();
        let orders = broker.placed_orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].side, OrderSide::Buy);
    }

    #[tokio::test]
    async fn overbought_yields_short_entry() {
        let (ctx, broker) = ctx_with_series(rising_series()).await;
        let mut agent = TechnicalAgent::new(technical_config("t1", "SPY"), ctx).unwrap();

        agent.on_market_open().await.unwrap();
        let orders = broker.placed_orders();
        assert_eq!(orders.len(), 1);
        // Short entries are submitted as sell orders.
        assert_eq!(orders[0].side, OrderSide::Sell);
    }

    #[tokio::test]
    async fn only_one_entry_per_day() {
        let (ctx, broker) = ctx_with_series(falling_series()).await;
        let mut agent = TechnicalAgent::new(technical_config("t1", "SPY"), ctx).unwrap();

        agent.on_market_open().await.unwrap();
        agent.on_market_open().await.unwrap();
        assert_eq!(broker.placed_orders().len(), 1);
    }

    #[tokio::test]
    async fn close_flattens_open_position() {
        let (ctx, broker) = ctx_with_series(falling_series()).await;
        let mut agent = TechnicalAgent::new(technical_config("t1", "SPY"), ctx).unwrap();

        agent.on_market_open().await.unwrap();
        agent.on_market_close().await.unwrap();

        let orders = broker.placed_orders();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].side, OrderSide::Buy);
        assert_eq!(orders[1].side, OrderSide::Sell);

        // A second close is a no-op.
        agent.on_market_close().await.unwrap();
        assert_eq!(broker.placed_orders().len(), 2);
    }

    #[tokio::test]
    async fn neutral_band_holds() {
        // Gently alternating closes keep RSI inside the neutral band.
        let alternating: Vec<f64> = (0..20)
            .map(|i| if i % 2 == 0 { 100.0 } else { 100.5 })
            .collect();
        let (ctx, broker) = ctx_with_series(alternating).await;
        let mut agent = TechnicalAgent::new(technical_config("t1", "SPY"), ctx).unwrap();

        agent.on_market_open().await.unwrap();
        assert!(broker.placed_orders().is_empty());
    }

    #[tokio::test]
    async fn disclosures_are_ignored() {
        use crate::agents::copy_trade::tests::disclosure;
        use crate::models::TransactionType;
        use rust_decimal_macros::dec;

        let alternating: Vec<f64> = (0..20)
            .map(|i| if i % 2 == 0 { 100.0 } else { 100.5 })
            .collect();
        let (ctx, _) = ctx_with_series(alternating).await;
        let mut agent = TechnicalAgent::new(technical_config("t1", "SPY"), ctx).unwrap();

        let disclosures = vec![disclosure(
            "Josh Gottheimer",
            "AAPL",
            TransactionType::Purchase,
            dec!(500000),
        )];
        let intents = agent.process(&disclosures).await.unwrap();
        assert!(intents.is_empty());
    }
}
