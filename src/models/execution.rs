//! Per-run outcome records: one `ExecutionResult` per agent per workflow run,
//! aggregated into a dated `ExecutionSummary`.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Outcome of one agent's full daily workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub trades_processed: usize,
    pub orders_placed: usize,
    pub errors: Vec<String>,
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            trades_processed: 0,
            orders_placed: 0,
            errors: vec![error.into()],
            duration: Duration::ZERO,
            timestamp: Utc::now(),
        }
    }
}

/// Snapshot from `compute_performance`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub value: Decimal,
    pub daily_return_pct: f64,
    pub total_return_pct: f64,
}

/// Aggregated outcome of one scheduled run across all agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub date: NaiveDate,
    pub results: HashMap<String, ExecutionResult>,
    pub total_trades_processed: usize,
    pub total_orders_placed: usize,
    pub success: bool,
    pub errors: Vec<String>,
}

impl ExecutionSummary {
    /// Aggregate per-agent results, keyed by agent id. Order-independent.
    pub fn from_results(date: NaiveDate, results: HashMap<String, ExecutionResult>) -> Self {
        let total_trades_processed = results.values().map(|r| r.trades_processed).sum();
        let total_orders_placed = results.values().map(|r| r.orders_placed).sum();
        let errors: Vec<String> = results
            .iter()
            .flat_map(|(id, r)| r.errors.iter().map(move |e| format!("{id}: {e}")))
            .collect();
        let success = results.values().all(|r| r.success);

        Self {
            date,
            results,
            total_trades_processed,
            total_orders_placed,
            success,
            errors,
        }
    }

    /// A run that failed before any agent was dispatched (e.g. feed fetch).
    pub fn run_failure(date: NaiveDate, error: impl Into<String>) -> Self {
        Self {
            date,
            results: HashMap::new(),
            total_trades_processed: 0,
            total_orders_placed: 0,
            success: false,
            errors: vec![error.into()],
        }
    }
}
