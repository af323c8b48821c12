//! Database persistence for orders, positions, performance, and run history.
//!
//! Stores everything the dashboard and restart recovery need:
//! - Orders placed per agent (with the producing intent's reason)
//! - Latest known positions per agent
//! - Performance snapshots per agent
//! - Execution summaries with per-agent results

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::models::{ExecutionResult, ExecutionSummary, PerformanceSnapshot, TradeIntent};

/// Database connection pool.
pub struct Database {
    pool: SqlitePool,
}

/// Stored order record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredOrder {
    pub id: String,
    pub agent_id: String,
    pub ticker: String,
    pub side: String,
    pub notional: f64,
    pub status: String,
    pub reason: String,
    pub source: String,
    pub created_at: String,
}

/// Stored per-agent execution result row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredResult {
    pub summary_date: String,
    pub agent_id: String,
    pub success: bool,
    pub trades_processed: i64,
    pub orders_placed: i64,
    pub errors: String,
    pub duration_ms: i64,
}

impl Database {
    /// Create a new database connection and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL,
                ticker TEXT NOT NULL,
                side TEXT NOT NULL,
                notional REAL NOT NULL,
                status TEXT NOT NULL DEFAULT 'accepted',
                reason TEXT NOT NULL DEFAULT '',
                source TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_id TEXT NOT NULL,
                ticker TEXT NOT NULL,
                qty REAL NOT NULL,
                entry_price REAL NOT NULL DEFAULT 0,
                market_value REAL NOT NULL DEFAULT 0,
                unrealized_pnl REAL NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(agent_id, ticker)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS performance (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_id TEXT NOT NULL,
                value REAL NOT NULL,
                daily_return_pct REAL NOT NULL DEFAULT 0,
                total_return_pct REAL NOT NULL DEFAULT 0,
                recorded_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS execution_summaries (
                summary_date TEXT PRIMARY KEY,
                total_trades_processed INTEGER NOT NULL DEFAULT 0,
                total_orders_placed INTEGER NOT NULL DEFAULT 0,
                success INTEGER NOT NULL DEFAULT 0,
                errors TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS execution_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                summary_date TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                success INTEGER NOT NULL,
                trades_processed INTEGER NOT NULL,
                orders_placed INTEGER NOT NULL,
                errors TEXT NOT NULL DEFAULT '[]',
                duration_ms INTEGER NOT NULL DEFAULT 0,
                UNIQUE(summary_date, agent_id),
                FOREIGN KEY (summary_date) REFERENCES execution_summaries(summary_date)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_orders_agent ON orders(agent_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_performance_agent ON performance(agent_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ==================== Orders ====================

    /// Record a placed order together with its producing intent.
    pub async fn insert_order(
        &self,
        order_id: &str,
        intent: &TradeIntent,
        status: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, agent_id, ticker, side, notional, status, reason, source)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(order_id)
        .bind(&intent.agent_id)
        .bind(&intent.ticker)
        .bind(intent.side.as_str())
        .bind(intent.amount.to_f64().unwrap_or(0.0))
        .bind(status)
        .bind(&intent.reason)
        .bind(serde_json::to_string(&intent.source).unwrap_or_default())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn order_count(&self, agent_id: &str) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM orders WHERE agent_id = ?")
                .bind(agent_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    pub async fn total_order_count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM orders")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // ==================== Positions ====================

    /// Upsert the latest known position for an agent/ticker pair.
    pub async fn insert_position(
        &self,
        agent_id: &str,
        ticker: &str,
        qty: f64,
        entry_price: f64,
        market_value: f64,
        unrealized_pnl: f64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions (agent_id, ticker, qty, entry_price, market_value, unrealized_pnl, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, datetime('now'))
            ON CONFLICT(agent_id, ticker) DO UPDATE SET
                qty = excluded.qty,
                entry_price = excluded.entry_price,
                market_value = excluded.market_value,
                unrealized_pnl = excluded.unrealized_pnl,
                updated_at = datetime('now')
            "#,
        )
        .bind(agent_id)
        .bind(ticker)
        .bind(qty)
        .bind(entry_price)
        .bind(market_value)
        .bind(unrealized_pnl)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ==================== Performance ====================

    pub async fn insert_performance(
        &self,
        agent_id: &str,
        snapshot: &PerformanceSnapshot,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO performance (agent_id, value, daily_return_pct, total_return_pct)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(agent_id)
        .bind(snapshot.value.to_f64().unwrap_or(0.0))
        .bind(snapshot.daily_return_pct)
        .bind(snapshot.total_return_pct)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ==================== Execution summaries ====================

    /// Persist a summary and its per-agent results atomically. The summary
    /// row and all result rows land together or not at all.
    pub async fn save_summary(&self, summary: &ExecutionSummary) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO execution_summaries
                (summary_date, total_trades_processed, total_orders_placed, success, errors)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(summary_date) DO UPDATE SET
                total_trades_processed = excluded.total_trades_processed,
                total_orders_placed = excluded.total_orders_placed,
                success = excluded.success,
                errors = excluded.errors
            "#,
        )
        .bind(summary.date.to_string())
        .bind(summary.total_trades_processed as i64)
        .bind(summary.total_orders_placed as i64)
        .bind(summary.success)
        .bind(serde_json::to_string(&summary.errors)?)
        .execute(&mut *tx)
        .await?;

        for (agent_id, result) in &summary.results {
            sqlx::query(
                r#"
                INSERT INTO execution_results
                    (summary_date, agent_id, success, trades_processed, orders_placed, errors, duration_ms)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(summary_date, agent_id) DO UPDATE SET
                    success = excluded.success,
                    trades_processed = excluded.trades_processed,
                    orders_placed = excluded.orders_placed,
                    errors = excluded.errors,
                    duration_ms = excluded.duration_ms
                "#,
            )
            .bind(summary.date.to_string())
            .bind(agent_id)
            .bind(result.success)
            .bind(result.trades_processed as i64)
            .bind(result.orders_placed as i64)
            .bind(serde_json::to_string(&result.errors)?)
            .bind(result.duration.as_millis() as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Per-agent results for one summary date.
    pub async fn results_for_date(&self, date: NaiveDate) -> Result<Vec<StoredResult>> {
        let rows = sqlx::query_as::<_, StoredResult>(
            "SELECT summary_date, agent_id, success, trades_processed, orders_placed, errors, duration_ms \
             FROM execution_results WHERE summary_date = ?",
        )
        .bind(date.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Count of persisted summaries (dashboard metric).
    pub async fn summary_count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM execution_summaries")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Drop summaries (and their result rows) older than the retention
    /// window, in one transaction.
    pub async fn prune_summaries_before(&self, cutoff: NaiveDate) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM execution_results WHERE summary_date < ?")
            .bind(cutoff.to_string())
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM execution_summaries WHERE summary_date < ?")
            .bind(cutoff.to_string())
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(deleted)
    }

    /// Collect one ExecutionResult per agent back out of storage.
    pub fn parse_result(row: &StoredResult) -> ExecutionResult {
        ExecutionResult {
            success: row.success,
            trades_processed: row.trades_processed as usize,
            orders_placed: row.orders_placed as usize,
            errors: serde_json::from_str(&row.errors).unwrap_or_default(),
            duration: std::time::Duration::from_millis(row.duration_ms as u64),
            timestamp: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TradeIntent, TradeSide};
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    async fn memory_db() -> Database {
        Database::new("sqlite::memory:").await.unwrap()
    }

    fn intent() -> TradeIntent {
        TradeIntent::from_disclosure(
            "agent-1",
            "AAPL",
            TradeSide::Buy,
            dec!(100),
            "copy trade".to_string(),
            0.9,
            "d-1".to_string(),
        )
    }

    #[tokio::test]
    async fn orders_round_trip() {
        let db = memory_db().await;
        db.insert_order("o-1", &intent(), "accepted").await.unwrap();
        assert_eq!(db.order_count("agent-1").await.unwrap(), 1);
        assert_eq!(db.order_count("other").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn summary_persists_atomically() {
        let db = memory_db().await;
        let date = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();

        let mut results = HashMap::new();
        results.insert(
            "agent-1".to_string(),
            ExecutionResult {
                success: true,
                trades_processed: 4,
                orders_placed: 2,
                errors: Vec::new(),
                duration: std::time::Duration::from_millis(12),
                timestamp: chrono::Utc::now(),
            },
        );
        let summary = ExecutionSummary::from_results(date, results);

        db.save_summary(&summary).await.unwrap();
        let rows = db.results_for_date(date).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].agent_id, "agent-1");
        assert_eq!(rows[0].trades_processed, 4);

        // Re-saving the same date updates in place.
        db.save_summary(&summary).await.unwrap();
        assert_eq!(db.summary_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn pruning_removes_old_summaries() {
        let db = memory_db().await;
        let old = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let recent = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();

        db.save_summary(&ExecutionSummary::run_failure(old, "feed down"))
            .await
            .unwrap();
        db.save_summary(&ExecutionSummary::run_failure(recent, "feed down"))
            .await
            .unwrap();

        let deleted = db
            .prune_summaries_before(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap())
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(db.summary_count().await.unwrap(), 1);
    }
}
