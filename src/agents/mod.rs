//! Agent abstraction: the polymorphic unit of strategy.
//!
//! Two variants exist behind one trait: `CopyTradeAgent` (individual or
//! committee roster) and `TechnicalAgent` (indicator-driven). The shared
//! daily workflow runs process -> execute each intent -> update positions ->
//! compute performance, strictly in that order, capturing per-intent
//! failures without aborting the run.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::models::{ExecutionResult, PerformanceSnapshot, TradeDisclosure, TradeIntent};

pub mod copy_trade;
pub mod registry;
pub mod technical;

pub use copy_trade::CopyTradeAgent;
pub use registry::AgentRegistry;
pub use technical::TechnicalAgent;

/// Lifecycle state. `enabled` is orthogonal and lives on `AgentCore`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Initialized,
    Processing,
    Completed,
    Error,
}

/// Configured agent variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Individual,
    Committee,
    Technical,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Individual => "individual",
            AgentKind::Committee => "committee",
            AgentKind::Technical => "technical",
        }
    }
}

/// Health derived from {state, enabled} plus the last recorded failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentHealth {
    Healthy,
    Degraded,
    Unhealthy,
    Disabled,
}

/// Running counters per agent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AgentCounters {
    pub executions: u64,
    pub trades_processed: u64,
    pub orders_placed: u64,
}

/// Position sizing policy for copy trades. Every policy floors the result
/// at a 100-dollar minimum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum SizingPolicy {
    FixedDollar { amount: Decimal },
    PercentOfDisclosure { percent: Decimal },
    PercentOfPortfolio { percent: Decimal },
}

impl Default for SizingPolicy {
    fn default() -> Self {
        SizingPolicy::FixedDollar { amount: dec!(100) }
    }
}

/// Minimum notional any sizing policy may produce.
pub const MIN_POSITION_DOLLARS: Decimal = dec!(100);

/// Parameters for the technical (RSI) variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechnicalParams {
    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,
    #[serde(default = "default_oversold")]
    pub oversold: f64,
    #[serde(default = "default_overbought")]
    pub overbought: f64,
    #[serde(default = "default_trade_amount")]
    pub trade_amount: Decimal,
    #[serde(default = "default_max_trades")]
    pub max_trades_per_day: u32,
}

fn default_rsi_period() -> usize {
    14
}
fn default_oversold() -> f64 {
    30.0
}
fn default_overbought() -> f64 {
    70.0
}
fn default_trade_amount() -> Decimal {
    dec!(1000)
}
fn default_max_trades() -> u32 {
    2
}

impl Default for TechnicalParams {
    fn default() -> Self {
        Self {
            rsi_period: default_rsi_period(),
            oversold: default_oversold(),
            overbought: default_overbought(),
            trade_amount: default_trade_amount(),
            max_trades_per_day: default_max_trades(),
        }
    }
}

/// A tracked individual on a copy-trade roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedEntity {
    pub name: String,
    #[serde(default)]
    pub district: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_min_trade_value() -> Decimal {
    dec!(50000)
}

fn default_match_threshold() -> f64 {
    0.85
}

/// Agent configuration, usually loaded from the agents JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    pub name: String,
    pub kind: AgentKind,

    /// Roster for copy-trade variants; must be empty for technical agents.
    #[serde(default)]
    pub tracked_entities: Vec<TrackedEntity>,

    /// Target ticker for technical variants.
    #[serde(default)]
    pub ticker: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Disclosures below this disclosed maximum are ignored.
    #[serde(default = "default_min_trade_value")]
    pub min_trade_value: Decimal,

    #[serde(default = "default_match_threshold")]
    pub match_threshold: f64,

    #[serde(default)]
    pub sizing: SizingPolicy,

    #[serde(default)]
    pub technical: TechnicalParams,
}

/// Validation ranges for the numeric parameter surface.
const MIN_TRADE_VALUE_RANGE: (Decimal, Decimal) = (dec!(1000), dec!(1000000));
const MATCH_THRESHOLD_RANGE: (f64, f64) = (0.1, 1.0);

impl AgentConfig {
    /// Fail-fast validation. A failing config never produces a partial agent.
    pub fn validate(&self) -> EngineResult<()> {
        if self.id.trim().is_empty() {
            return Err(EngineError::config("agent id is required"));
        }
        if self.name.trim().is_empty() {
            return Err(EngineError::config("agent name is required"));
        }

        match self.kind {
            AgentKind::Individual => {
                if self.tracked_entities.len() != 1 {
                    return Err(EngineError::config(format!(
                        "individual agent {} must track exactly one entity, got {}",
                        self.id,
                        self.tracked_entities.len()
                    )));
                }
            }
            AgentKind::Committee => {
                if self.tracked_entities.len() < 2 {
                    return Err(EngineError::config(format!(
                        "committee agent {} must track at least two entities",
                        self.id
                    )));
                }
            }
            AgentKind::Technical => {
                if self.ticker.as_deref().map_or(true, |t| t.trim().is_empty()) {
                    return Err(EngineError::config(format!(
                        "technical agent {} requires a target ticker",
                        self.id
                    )));
                }
                if !self.tracked_entities.is_empty() {
                    return Err(EngineError::config(format!(
                        "technical agent {} must not track entities",
                        self.id
                    )));
                }
            }
        }

        let (min_v, max_v) = MIN_TRADE_VALUE_RANGE;
        if self.min_trade_value < min_v || self.min_trade_value > max_v {
            return Err(EngineError::config(format!(
                "min_trade_value {} outside [{min_v}, {max_v}]",
                self.min_trade_value
            )));
        }

        let (min_t, max_t) = MATCH_THRESHOLD_RANGE;
        if !(min_t..=max_t).contains(&self.match_threshold) {
            return Err(EngineError::config(format!(
                "match_threshold {} outside [{min_t}, {max_t}]",
                self.match_threshold
            )));
        }

        match self.sizing {
            SizingPolicy::FixedDollar { amount } => {
                if amount <= Decimal::ZERO {
                    return Err(EngineError::config("fixed sizing amount must be positive"));
                }
            }
            SizingPolicy::PercentOfDisclosure { percent }
            | SizingPolicy::PercentOfPortfolio { percent } => {
                if percent <= Decimal::ZERO || percent > dec!(100) {
                    return Err(EngineError::config("sizing percent must be in (0, 100]"));
                }
            }
        }

        if self.kind == AgentKind::Technical {
            let t = &self.technical;
            if t.rsi_period < 2 {
                return Err(EngineError::config("rsi_period must be at least 2"));
            }
            if !(0.0..100.0).contains(&t.oversold)
                || !(0.0..=100.0).contains(&t.overbought)
                || t.oversold >= t.overbought
            {
                return Err(EngineError::config("oversold/overbought thresholds invalid"));
            }
            if t.trade_amount <= Decimal::ZERO {
                return Err(EngineError::config("trade_amount must be positive"));
            }
            if t.max_trades_per_day == 0 {
                return Err(EngineError::config("max_trades_per_day must be at least 1"));
            }
        }

        Ok(())
    }
}

/// State shared by every agent variant.
#[derive(Debug, Clone)]
pub struct AgentCore {
    pub config: AgentConfig,
    pub state: AgentState,
    pub enabled: bool,
    pub counters: AgentCounters,
    pub created_at: DateTime<Utc>,
    pub last_error_class: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

impl AgentCore {
    pub fn new(config: AgentConfig) -> Self {
        let enabled = config.enabled;
        Self {
            config,
            state: AgentState::Initialized,
            enabled,
            counters: AgentCounters::default(),
            created_at: Utc::now(),
            last_error_class: None,
            last_error_at: None,
        }
    }

    /// Enable/disable. Re-enabling returns the agent to `Initialized`.
    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled && !self.enabled {
            self.state = AgentState::Initialized;
        }
        self.enabled = enabled;
    }

    pub fn record_failure(&mut self, err: &EngineError) {
        self.last_error_class = Some(err.class().to_string());
        self.last_error_at = Some(Utc::now());
    }

    pub fn health(&self) -> AgentHealth {
        if !self.enabled {
            AgentHealth::Disabled
        } else if self.state == AgentState::Error {
            AgentHealth::Unhealthy
        } else if self.last_error_class.is_some() {
            AgentHealth::Degraded
        } else {
            AgentHealth::Healthy
        }
    }
}

/// Strategy contract. Lifecycle accessors delegate to the embedded core;
/// variants implement the decision methods.
#[async_trait]
pub trait Agent: Send {
    fn core(&self) -> &AgentCore;
    fn core_mut(&mut self) -> &mut AgentCore;

    fn id(&self) -> &str {
        &self.core().config.id
    }
    fn name(&self) -> &str {
        &self.core().config.name
    }
    fn kind(&self) -> AgentKind {
        self.core().config.kind
    }
    fn state(&self) -> AgentState {
        self.core().state
    }
    fn is_enabled(&self) -> bool {
        self.core().enabled
    }

    /// Turn the day's inputs into trade intents.
    async fn process(&mut self, disclosures: &[TradeDisclosure]) -> EngineResult<Vec<TradeIntent>>;

    /// Submit one intent to the brokerage. `Ok(true)` when an order was
    /// placed, `Ok(false)` when the intent was skipped (e.g. unknown ticker).
    async fn execute(&mut self, intent: &TradeIntent) -> EngineResult<bool>;

    /// Refresh locally known positions from the brokerage.
    async fn update_positions(&mut self) -> EngineResult<()>;

    async fn compute_performance(&mut self) -> EngineResult<PerformanceSnapshot>;

    /// Intraday hook fired at market open (technical entry analysis).
    async fn on_market_open(&mut self) -> EngineResult<()> {
        Ok(())
    }

    /// Intraday hook fired near market close (forced flatten).
    async fn on_market_close(&mut self) -> EngineResult<()> {
        Ok(())
    }
}

/// Submit one intent to the brokerage: validate the ticker, place a
/// market order through the retry policy, record it. `None` means the
/// intent was skipped because the ticker is not tradable.
pub(crate) async fn submit_intent(
    ctx: &crate::clients::AppContext,
    intent: &TradeIntent,
) -> EngineResult<Option<crate::clients::OrderInfo>> {
    use crate::clients::{OrderSide, TimeInForce};

    let broker = Arc::clone(&ctx.broker);
    let ticker = intent.ticker.clone();

    let valid = ctx
        .retry
        .run("broker.validate_ticker", || {
            let broker = Arc::clone(&broker);
            let ticker = ticker.clone();
            async move { broker.validate_ticker(&ticker).await }
        })
        .await?;
    if !valid {
        warn!(agent = %intent.agent_id, ticker = %intent.ticker, "Ticker not tradable, skipping");
        return Ok(None);
    }

    let side = OrderSide::from(intent.side);
    let notional = intent.amount;
    let order = ctx
        .retry
        .run("broker.place_order", || {
            let broker = Arc::clone(&broker);
            let ticker = ticker.clone();
            async move {
                broker
                    .place_order(&ticker, side, notional, TimeInForce::Day)
                    .await
            }
        })
        .await?;

    ctx.store
        .insert_order(&order.id, intent, &order.status)
        .await
        .map_err(|e| EngineError::permanent(format!("failed to record order: {e}")))?;

    info!(agent = %intent.agent_id, order_id = %order.id, ticker = %order.ticker, "Order placed");
    Ok(Some(order))
}

/// Refresh the agent's stored positions from the brokerage. Writes are
/// scoped to the acting agent's id.
pub(crate) async fn sync_positions_from_broker(
    ctx: &crate::clients::AppContext,
    agent_id: &str,
) -> EngineResult<()> {
    use rust_decimal::prelude::ToPrimitive;

    let broker = Arc::clone(&ctx.broker);
    let positions = ctx
        .retry
        .run("broker.positions", || {
            let broker = Arc::clone(&broker);
            async move { broker.positions().await }
        })
        .await?;

    for position in positions {
        ctx.store
            .insert_position(
                agent_id,
                &position.ticker,
                position.qty.to_f64().unwrap_or(0.0),
                position.avg_entry_price.to_f64().unwrap_or(0.0),
                position.market_value.to_f64().unwrap_or(0.0),
                position.unrealized_pnl.to_f64().unwrap_or(0.0),
            )
            .await
            .map_err(|e| EngineError::permanent(format!("failed to record position: {e}")))?;
    }

    Ok(())
}

/// Snapshot account equity and derive daily/total returns against the
/// caller-held baselines, persisting the snapshot.
pub(crate) async fn account_performance(
    ctx: &crate::clients::AppContext,
    agent_id: &str,
    initial_value: &mut Option<Decimal>,
    last_value: &mut Option<Decimal>,
) -> EngineResult<PerformanceSnapshot> {
    use rust_decimal::prelude::ToPrimitive;

    let broker = Arc::clone(&ctx.broker);
    let account = ctx
        .retry
        .run("broker.account", || {
            let broker = Arc::clone(&broker);
            async move { broker.account().await }
        })
        .await?;

    let value = account.equity;
    let initial = *initial_value.get_or_insert(value);
    let previous = last_value.unwrap_or(value);
    *last_value = Some(value);

    let pct = |from: Decimal| -> f64 {
        if from.is_zero() {
            0.0
        } else {
            ((value - from) / from * dec!(100)).to_f64().unwrap_or(0.0)
        }
    };

    let snapshot = PerformanceSnapshot {
        value,
        daily_return_pct: pct(previous),
        total_return_pct: pct(initial),
    };

    ctx.store
        .insert_performance(agent_id, &snapshot)
        .await
        .map_err(|e| EngineError::permanent(format!("failed to record performance: {e}")))?;

    Ok(snapshot)
}

/// One full daily workflow for a single agent, strictly sequential.
///
/// Per-intent failures are captured into the result and do not stop the
/// remaining intents; a process-phase failure is fatal for the run and
/// moves the agent to `Error`.
pub async fn run_daily_workflow(
    agent: &mut dyn Agent,
    disclosures: &[TradeDisclosure],
) -> ExecutionResult {
    let started = Instant::now();
    let agent_id = agent.id().to_string();
    agent.core_mut().state = AgentState::Processing;

    let intents = match agent.process(disclosures).await {
        Ok(intents) => intents,
        Err(e) => {
            error!(agent = %agent_id, error = %e, "Processing failed");
            let core = agent.core_mut();
            core.state = AgentState::Error;
            core.record_failure(&e);
            // A failed run still counts as a run.
            core.counters.executions += 1;
            let mut result = ExecutionResult::failed(e.to_string());
            result.duration = started.elapsed();
            return result;
        }
    };

    let mut errors = Vec::new();
    let mut orders_placed = 0usize;

    for intent in &intents {
        match agent.execute(intent).await {
            Ok(true) => orders_placed += 1,
            Ok(false) => {
                info!(agent = %agent_id, ticker = %intent.ticker, "Intent skipped");
            }
            Err(e) => {
                warn!(agent = %agent_id, ticker = %intent.ticker, error = %e, "Intent execution failed");
                agent.core_mut().record_failure(&e);
                errors.push(format!("{}: {e}", intent.ticker));
            }
        }
    }

    if let Err(e) = agent.update_positions().await {
        warn!(agent = %agent_id, error = %e, "Position update failed");
        agent.core_mut().record_failure(&e);
        errors.push(format!("update_positions: {e}"));
    }

    if let Err(e) = agent.compute_performance().await {
        warn!(agent = %agent_id, error = %e, "Performance computation failed");
        agent.core_mut().record_failure(&e);
        errors.push(format!("compute_performance: {e}"));
    }

    let core = agent.core_mut();
    core.state = AgentState::Completed;
    core.counters.executions += 1;
    core.counters.trades_processed += disclosures.len() as u64;
    core.counters.orders_placed += orders_placed as u64;

    ExecutionResult {
        success: errors.is_empty(),
        trades_processed: disclosures.len(),
        orders_placed,
        errors,
        duration: started.elapsed(),
        timestamp: Utc::now(),
    }
}
