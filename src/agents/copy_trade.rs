//! Copy-trade agent: mirrors disclosed purchases of a tracked roster.
//!
//! An individual variant tracks exactly one entity; a committee variant
//! tracks a roster. Disclosure ownership is decided by the fuzzy name
//! matcher; only purchase disclosures at or above the configured minimum
//! produce buy intents.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info};

use crate::clients::AppContext;
use crate::error::EngineResult;
use crate::matching::{MatchCandidate, MatcherConfig, NameMatcher};
use crate::models::{
    PerformanceSnapshot, TradeDisclosure, TradeIntent, TradeSide, TransactionType,
};

use super::{Agent, AgentConfig, AgentCore, SizingPolicy, MIN_POSITION_DOLLARS};

pub struct CopyTradeAgent {
    core: AgentCore,
    ctx: Arc<AppContext>,
    matcher: NameMatcher,
    initial_value: Option<Decimal>,
    last_value: Option<Decimal>,
}

impl CopyTradeAgent {
    /// Build from a validated config. Fails fast on an invalid one.
    pub fn new(config: AgentConfig, ctx: Arc<AppContext>) -> EngineResult<Self> {
        config.validate()?;
        let matcher = NameMatcher::new(MatcherConfig {
            match_threshold: config.match_threshold,
            ..MatcherConfig::default()
        });
        Ok(Self {
            core: AgentCore::new(config),
            ctx,
            matcher,
            initial_value: None,
            last_value: None,
        })
    }

    /// Match a disclosure against the tracked roster.
    fn matches_roster(&self, disclosure: &TradeDisclosure) -> Option<f64> {
        let candidates: Vec<MatchCandidate<'_>> = self
            .core
            .config
            .tracked_entities
            .iter()
            .map(|e| MatchCandidate {
                name: e.name.as_str(),
                district: e.district.as_deref(),
            })
            .collect();

        self.matcher
            .best_match(
                &disclosure.entity_name,
                disclosure.district.as_deref(),
                &candidates,
            )
            .map(|outcome| outcome.score)
    }

    /// Dollar size for a matched disclosure under the configured policy,
    /// floored at the 100-dollar minimum.
    async fn position_size(&self, disclosure: &TradeDisclosure) -> EngineResult<Decimal> {
        let sized = match self.core.config.sizing {
            SizingPolicy::FixedDollar { amount } => amount,
            SizingPolicy::PercentOfDisclosure { percent } => {
                disclosure.amount_max * percent / dec!(100)
            }
            SizingPolicy::PercentOfPortfolio { percent } => {
                let broker = Arc::clone(&self.ctx.broker);
                let account = self
                    .ctx
                    .retry
                    .run("broker.account", || {
                        let broker = Arc::clone(&broker);
                        async move { broker.account().await }
                    })
                    .await?;
                account.equity * percent / dec!(100)
            }
        };

        Ok(sized.max(MIN_POSITION_DOLLARS))
    }
}

#[async_trait]
impl Agent for CopyTradeAgent {
    fn core(&self) -> &AgentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AgentCore {
        &mut self.core
    }

    async fn process(
        &mut self,
        disclosures: &[TradeDisclosure],
    ) -> EngineResult<Vec<TradeIntent>> {
        let mut intents = Vec::new();

        for disclosure in disclosures {
            let Some(score) = self.matches_roster(disclosure) else {
                continue;
            };

            if disclosure.transaction_type != TransactionType::Purchase {
                debug!(
                    agent = %self.id(),
                    entity = %disclosure.entity_name,
                    ticker = %disclosure.ticker,
                    "Skipping non-purchase disclosure"
                );
                continue;
            }

            if disclosure.amount_max < self.core.config.min_trade_value {
                debug!(
                    agent = %self.id(),
                    ticker = %disclosure.ticker,
                    amount = %disclosure.amount_max,
                    minimum = %self.core.config.min_trade_value,
                    "Disclosure below minimum trade value"
                );
                continue;
            }

            let amount = self.position_size(disclosure).await?;
            let reason = format!(
                "{} disclosed {} purchase of {} on {}",
                disclosure.entity_name,
                disclosure.amount_max,
                disclosure.ticker,
                disclosure.transaction_date
            );

            info!(
                agent = %self.id(),
                ticker = %disclosure.ticker,
                amount = %amount,
                score,
                "Copy trade intent"
            );

            intents.push(TradeIntent::from_disclosure(
                self.id(),
                &disclosure.ticker,
                TradeSide::Buy,
                amount,
                reason,
                score,
                disclosure.disclosure_id(),
            ));
        }

        Ok(intents)
    }

    async fn execute(&mut self, intent: &TradeIntent) -> EngineResult<bool> {
        Ok(super::submit_intent(&self.ctx, intent).await?.is_some())
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
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::agents::test_support::individual_config;
    use crate::agents::{run_daily_workflow, AgentKind, TrackedEntity};
    use crate::clients::mock::{MockBroker, MockMarketData, MockTradeFeed};
    use crate::db::Database;
    use crate::retry::RetryPolicy;
    use chrono::{NaiveDate, Utc};

    pub(crate) async fn test_ctx() -> (Arc<AppContext>, Arc<MockBroker>) {
        let broker = Arc::new(MockBroker::new());
        let ctx = AppContext {
            feed: Arc::new(MockTradeFeed::default()),
            broker: broker.clone(),
            market_data: Arc::new(MockMarketData::default()),
            store: Arc::new(Database::new("sqlite::memory:").await.unwrap()),
            retry: RetryPolicy::fast(),
            clock: Arc::new(crate::schedule::SystemClock),
        };
        (Arc::new(ctx), broker)
    }

    pub(crate) fn disclosure(
        entity: &str,
        ticker: &str,
        transaction_type: TransactionType,
        amount: Decimal,
    ) -> TradeDisclosure {
        TradeDisclosure {
            entity_name: entity.to_string(),
            district: None,
            ticker: ticker.to_string(),
            transaction_date: NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            transaction_type,
            amount_min: amount,
            amount_max: amount,
            last_modified: Utc::now(),
        }
    }

    #[tokio::test]
    async fn matched_purchase_yields_single_buy_intent() {
        let (ctx, _) = test_ctx().await;
        let mut agent =
            CopyTradeAgent::new(individual_config("a1", "Josh Gottheimer"), ctx).unwrap();

        let disclosures = vec![disclosure(
            "Josh Gottheimer",
            "AAPL",
            TransactionType::Purchase,
            dec!(75000),
        )];
        let intents = agent.process(&disclosures).await.unwrap();

        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].ticker, "AAPL");
        assert_eq!(intents[0].side, TradeSide::Buy);
        assert_eq!(intents[0].amount, dec!(100));
    }

    #[tokio::test]
    async fn sale_never_yields_intent() {
        let (ctx, _) = test_ctx().await;
        let mut agent =
            CopyTradeAgent::new(individual_config("a1", "Josh Gottheimer"), ctx).unwrap();

        let disclosures = vec![disclosure(
            "Josh Gottheimer",
            "AAPL",
            TransactionType::Sale,
            dec!(500000),
        )];
        assert!(agent.process(&disclosures).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn below_minimum_never_yields_intent() {
        let (ctx, _) = test_ctx().await;
        let mut agent =
            CopyTradeAgent::new(individual_config("a1", "Josh Gottheimer"), ctx).unwrap();

        let disclosures = vec![disclosure(
            "Josh Gottheimer",
            "AAPL",
            TransactionType::Purchase,
            dec!(15000),
        )];
        assert!(agent.process(&disclosures).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unmatched_entity_is_ignored() {
        let (ctx, _) = test_ctx().await;
        let mut agent =
            CopyTradeAgent::new(individual_config("a1", "Josh Gottheimer"), ctx).unwrap();

        let disclosures = vec![disclosure(
            "Nancy Pelosi",
            "NVDA",
            TransactionType::Purchase,
            dec!(500000),
        )];
        assert!(agent.process(&disclosures).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn committee_matches_any_roster_member() {
        let (ctx, _) = test_ctx().await;
        let mut config = individual_config("c1", "Josh Gottheimer");
        config.kind = AgentKind::Committee;
        config.tracked_entities.push(TrackedEntity {
            name: "Sheldon Whitehouse".to_string(),
            district: None,
        });
        let mut agent = CopyTradeAgent::new(config, ctx).unwrap();

        let disclosures = vec![
            disclosure("Whitehouse, Sheldon", "MSFT", TransactionType::Purchase, dec!(100000)),
            disclosure("Josh Gottheimer", "AAPL", TransactionType::Purchase, dec!(75000)),
        ];
        let intents = agent.process(&disclosures).await.unwrap();
        assert_eq!(intents.len(), 2);
    }

    #[tokio::test]
    async fn sizing_policies_floor_at_minimum() {
        let (ctx, _) = test_ctx().await;

        let mut config = individual_config("a1", "Josh Gottheimer");
        config.sizing = SizingPolicy::PercentOfDisclosure { percent: dec!(0.01) };
        let mut agent = CopyTradeAgent::new(config, ctx.clone()).unwrap();

        let disclosures = vec![disclosure(
            "Josh Gottheimer",
            "AAPL",
            TransactionType::Purchase,
            dec!(75000),
        )];
        let intents = agent.process(&disclosures).await.unwrap();
        // 0.01% of 75k is 7.50, floored to 100.
        assert_eq!(intents[0].amount, dec!(100));

        let mut config = individual_config("a2", "Josh Gottheimer");
        config.sizing = SizingPolicy::PercentOfDisclosure { percent: dec!(10) };
        let mut agent = CopyTradeAgent::new(config, ctx).unwrap();
        let intents = agent.process(&disclosures).await.unwrap();
        assert_eq!(intents[0].amount, dec!(7500));
    }

    #[tokio::test]
    async fn portfolio_sizing_uses_account_equity() {
        let (ctx, _broker) = test_ctx().await;
        let mut config = individual_config("a1", "Josh Gottheimer");
        config.sizing = SizingPolicy::PercentOfPortfolio { percent: dec!(2) };
        let mut agent = CopyTradeAgent::new(config, ctx).unwrap();

        let disclosures = vec![disclosure(
            "Josh Gottheimer",
            "AAPL",
            TransactionType::Purchase,
            dec!(75000),
        )];
        let intents = agent.process(&disclosures).await.unwrap();
        // 2% of the mock's 100k equity.
        assert_eq!(intents[0].amount, dec!(2000));
    }

    #[tokio::test]
    async fn execute_places_and_records_order() {
        let (ctx, broker) = test_ctx().await;
        let mut agent =
            CopyTradeAgent::new(individual_config("a1", "Josh Gottheimer"), ctx.clone()).unwrap();

        let intent = TradeIntent::from_disclosure(
            "a1",
            "AAPL",
            TradeSide::Buy,
            dec!(100),
            "test".to_string(),
            1.0,
            "d-1".to_string(),
        );
        assert!(agent.execute(&intent).await.unwrap());
        assert_eq!(broker.placed_orders().len(), 1);
        assert_eq!(ctx.store.order_count("a1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn execute_skips_invalid_ticker() {
        let (ctx, broker) = test_ctx().await;
        broker.invalid_tickers.lock().unwrap().push("FAKE".to_string());
        let mut agent =
            CopyTradeAgent::new(individual_config("a1", "Josh Gottheimer"), ctx).unwrap();

        let intent = TradeIntent::from_disclosure(
            "a1",
            "FAKE",
            TradeSide::Buy,
            dec!(100),
            "test".to_string(),
            1.0,
            "d-1".to_string(),
        );
        assert!(!agent.execute(&intent).await.unwrap());
        assert!(broker.placed_orders().is_empty());
    }

    #[tokio::test]
    async fn transient_order_failure_is_retried() {
        let (ctx, broker) = test_ctx().await;
        broker
            .transient_failures
            .lock()
            .unwrap()
            .insert("AAPL".to_string(), 1);
        let mut agent =
            CopyTradeAgent::new(individual_config("a1", "Josh Gottheimer"), ctx).unwrap();

        let intent = TradeIntent::from_disclosure(
            "a1",
            "AAPL",
            TradeSide::Buy,
            dec!(100),
            "test".to_string(),
            1.0,
            "d-1".to_string(),
        );
        assert!(agent.execute(&intent).await.unwrap());
        assert_eq!(broker.placed_orders().len(), 1);
    }

    #[tokio::test]
    async fn full_workflow_end_to_end() {
        let (ctx, broker) = test_ctx().await;
        let mut agent =
            CopyTradeAgent::new(individual_config("a1", "Josh Gottheimer"), ctx).unwrap();

        let disclosures = vec![disclosure(
            "Josh Gottheimer",
            "AAPL",
            TransactionType::Purchase,
            dec!(75000),
        )];
        let result = run_daily_workflow(&mut agent, &disclosures).await;

        assert!(result.success, "errors: {:?}", result.errors);
        assert_eq!(result.orders_placed, 1);
        assert_eq!(broker.placed_orders()[0].ticker, "AAPL");
        assert_eq!(broker.placed_orders()[0].notional, dec!(100));
        assert_eq!(agent.state(), crate::agents::AgentState::Completed);
        assert_eq!(agent.core().counters.executions, 1);
    }
}
