//! Daily scheduler: one full execution cycle per trading day.
//!
//! A background loop ticks on the injected clock and fires once the
//! configured wall-clock time has passed on a trading day. A manual
//! trigger (`execute_now`) shares the same run path; triggering while a
//! run is in flight is a conflict and never touches the running cycle.
//! A failed run produces a failed summary and leaves the loop alive.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::agents::AgentRegistry;
use crate::clients::AppContext;
use crate::error::{EngineError, EngineResult};
use crate::models::ExecutionSummary;

use super::{TimeOfDay, TradingCalendar};

/// Days of summary history kept in the store and in memory.
const SUMMARY_RETENTION: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Stopped,
    Running,
    Executing,
    Error,
}

#[derive(Debug, Clone)]
pub struct DailySchedulerConfig {
    /// Wall-clock (UTC) trigger time.
    pub run_at: TimeOfDay,
    pub tick_interval: Duration,
    /// Parallel vs sequential agent dispatch.
    pub parallel: bool,
}

impl Default for DailySchedulerConfig {
    fn default() -> Self {
        Self {
            run_at: TimeOfDay {
                hour: 16,
                minute: 45,
            },
            tick_interval: Duration::from_secs(60),
            parallel: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DailySchedulerStatus {
    pub state: SchedulerState,
    pub next_run: Option<DateTime<Utc>>,
    pub last_summary: Option<ExecutionSummary>,
    pub runs: u64,
    pub failed_runs: u64,
    pub success_rate: f64,
}

pub struct DailyScheduler {
    config: DailySchedulerConfig,
    registry: Arc<AgentRegistry>,
    ctx: Arc<AppContext>,
    calendar: TradingCalendar,

    state: RwLock<SchedulerState>,
    last_run_date: RwLock<Option<NaiveDate>>,
    history: RwLock<VecDeque<ExecutionSummary>>,
    runs: AtomicU64,
    failed_runs: AtomicU64,

    /// Held for the duration of a cycle; a manual trigger that cannot take
    /// it immediately is a conflict.
    run_lock: Mutex<()>,
    loop_running: AtomicBool,
    shutdown: watch::Sender<bool>,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl DailyScheduler {
    pub fn new(
        config: DailySchedulerConfig,
        registry: Arc<AgentRegistry>,
        ctx: Arc<AppContext>,
        calendar: TradingCalendar,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            config,
            registry,
            ctx,
            calendar,
            state: RwLock::new(SchedulerState::Stopped),
            last_run_date: RwLock::new(None),
            history: RwLock::new(VecDeque::new()),
            runs: AtomicU64::new(0),
            failed_runs: AtomicU64::new(0),
            run_lock: Mutex::new(()),
            loop_running: AtomicBool::new(false),
            shutdown,
            handle: std::sync::Mutex::new(None),
        })
    }

    /// Spawn the background tick loop. Idempotent.
    pub async fn start(self: &Arc<Self>) {
        if self.loop_running.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.state.write().await = SchedulerState::Running;
        info!(run_at = %self.config.run_at, "Daily scheduler started");

        let scheduler = Arc::clone(self);
        let mut shutdown_rx = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = tokio::time::sleep(scheduler.config.tick_interval) => {}
                }
                if scheduler.due().await {
                    // Awaited inline, so shutdown drains the in-flight run.
                    let guard = scheduler.run_lock.lock().await;
                    if scheduler.due().await {
                        scheduler.run_cycle(&guard).await;
                    }
                }
            }
            scheduler.loop_running.store(false, Ordering::SeqCst);
            *scheduler.state.write().await = SchedulerState::Stopped;
        });
        *self.handle.lock().expect("scheduler handle lock") = Some(handle);
    }

    /// Signal the loop and join it with a bounded wait.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let handle = self.handle.lock().expect("scheduler handle lock").take();
        if let Some(handle) = handle {
            if tokio::time::timeout(Duration::from_secs(30), handle)
                .await
                .is_err()
            {
                warn!("Daily scheduler did not stop within the join window");
            }
        }
        info!("Daily scheduler stopped");
    }

    /// Manual trigger. Fails with a conflict while a cycle is in flight.
    pub async fn execute_now(&self) -> EngineResult<ExecutionSummary> {
        let guard = self.run_lock.try_lock().map_err(|_| {
            EngineError::Conflict("daily execution already in progress".to_string())
        })?;
        Ok(self.run_cycle(&guard).await)
    }

    /// Whether the scheduled trigger should fire now.
    async fn due(&self) -> bool {
        let now = self.ctx.clock.now_utc();
        let today = now.date_naive();
        self.calendar.is_trading_day(today)
            && self.config.run_at.has_passed(now)
            && *self.last_run_date.read().await != Some(today)
    }

    /// One full cycle: fetch disclosures, dispatch all agents, persist and
    /// record the summary. The `_guard` parameter proves the run lock is held.
    async fn run_cycle(&self, _guard: &tokio::sync::MutexGuard<'_, ()>) -> ExecutionSummary {
        let date = self.ctx.clock.now_utc().date_naive();
        *self.state.write().await = SchedulerState::Executing;
        info!(%date, "Daily execution cycle starting");

        let summary = match self.fetch_disclosures(date).await {
            Ok(disclosures) => {
                info!(count = disclosures.len(), "Disclosures fetched");
                let results = self
                    .registry
                    .execute_all(&disclosures, self.config.parallel)
                    .await;
                ExecutionSummary::from_results(date, results)
            }
            Err(e) => {
                error!(error = %e, "Disclosure fetch failed, aborting this cycle");
                ExecutionSummary::run_failure(date, e.to_string())
            }
        };

        self.runs.fetch_add(1, Ordering::SeqCst);
        if !summary.success {
            self.failed_runs.fetch_add(1, Ordering::SeqCst);
        }

        let mut state = SchedulerState::Running;
        if let Err(e) = self.persist_summary(&summary, date).await {
            error!(error = %e, "Summary persistence failed");
            state = SchedulerState::Error;
        }

        *self.last_run_date.write().await = Some(date);
        {
            let mut history = self.history.write().await;
            history.push_back(summary.clone());
            while history.len() > SUMMARY_RETENTION {
                history.pop_front();
            }
        }

        if !self.loop_running.load(Ordering::SeqCst) && state == SchedulerState::Running {
            state = SchedulerState::Stopped;
        }
        *self.state.write().await = state;

        info!(
            %date,
            success = summary.success,
            orders = summary.total_orders_placed,
            "Daily execution cycle finished"
        );
        summary
    }

    async fn fetch_disclosures(
        &self,
        date: NaiveDate,
    ) -> EngineResult<Vec<crate::models::TradeDisclosure>> {
        let feed = Arc::clone(&self.ctx.feed);
        self.ctx
            .retry
            .run("feed.fetch", || {
                let feed = Arc::clone(&feed);
                async move { feed.fetch(date).await }
            })
            .await
    }

    async fn persist_summary(
        &self,
        summary: &ExecutionSummary,
        date: NaiveDate,
    ) -> EngineResult<()> {
        self.ctx
            .store
            .save_summary(summary)
            .await
            .map_err(|e| EngineError::permanent(format!("failed to persist summary: {e}")))?;
        if let Some(cutoff) = date.checked_sub_days(Days::new(SUMMARY_RETENTION as u64)) {
            self.ctx
                .store
                .prune_summaries_before(cutoff)
                .await
                .map_err(|e| EngineError::permanent(format!("failed to prune summaries: {e}")))?;
        }
        Ok(())
    }

    /// Next scheduled trigger, skipping non-trading days.
    pub async fn next_run(&self) -> Option<DateTime<Utc>> {
        let now = self.ctx.clock.now_utc();
        let last_run = *self.last_run_date.read().await;
        let mut date = now.date_naive();

        for _ in 0..30 {
            let fired_today = last_run == Some(date);
            let passed = date == now.date_naive() && self.config.run_at.has_passed(now);
            if self.calendar.is_trading_day(date) && !fired_today && !passed {
                return Some(
                    date.and_time(self.config.run_at.as_naive()).and_utc(),
                );
            }
            date = date.checked_add_days(Days::new(1))?;
        }
        None
    }

    pub async fn status(&self) -> DailySchedulerStatus {
        let runs = self.runs.load(Ordering::SeqCst);
        let failed = self.failed_runs.load(Ordering::SeqCst);
        let success_rate = if runs == 0 {
            1.0
        } else {
            (runs - failed) as f64 / runs as f64
        };

        DailySchedulerStatus {
            state: *self.state.read().await,
            next_run: self.next_run().await,
            last_summary: self.history.read().await.back().cloned(),
            runs,
            failed_runs: failed,
            success_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::test_support::individual_config;
    use crate::clients::mock::{MockBroker, MockMarketData, MockTradeFeed};
    use crate::db::Database;
    use crate::models::{TradeDisclosure, TransactionType};
    use crate::retry::RetryPolicy;
    use crate::schedule::test_clock::{monday_at, ManualClock};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn disclosure(entity: &str) -> TradeDisclosure {
        TradeDisclosure {
            entity_name: entity.to_string(),
            district: None,
            ticker: "AAPL".to_string(),
            transaction_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            transaction_type: TransactionType::Purchase,
            amount_min: dec!(75000),
            amount_max: dec!(75000),
            last_modified: Utc::now(),
        }
    }

    async fn setup(
        feed: MockTradeFeed,
        clock: Arc<ManualClock>,
        calendar: TradingCalendar,
    ) -> (Arc<DailyScheduler>, Arc<AppContext>, Arc<MockBroker>) {
        let broker = Arc::new(MockBroker::new());
        let ctx = Arc::new(AppContext {
            feed: Arc::new(feed),
            broker: broker.clone(),
            market_data: Arc::new(MockMarketData::default()),
            store: Arc::new(Database::new("sqlite::memory:").await.unwrap()),
            retry: RetryPolicy::fast(),
            clock,
        });
        let registry = Arc::new(AgentRegistry::new(Arc::clone(&ctx)));
        registry
            .create(individual_config("a1", "Josh Gottheimer"))
            .await
            .unwrap();

        let scheduler = DailyScheduler::new(
            DailySchedulerConfig {
                run_at: TimeOfDay::parse("16:45").unwrap(),
                tick_interval: Duration::from_millis(5),
                parallel: true,
            },
            registry,
            Arc::clone(&ctx),
            calendar,
        );
        (scheduler, ctx, broker)
    }

    #[tokio::test]
    async fn due_only_after_trigger_time_once_per_day() {
        let clock = Arc::new(ManualClock::at(monday_at(9, 0)));
        let (scheduler, _, _) =
            setup(MockTradeFeed::default(), clock.clone(), TradingCalendar::default()).await;

        assert!(!scheduler.due().await);

        clock.set(monday_at(16, 45));
        assert!(scheduler.due().await);

        scheduler.execute_now().await.unwrap();
        assert!(!scheduler.due().await);

        clock.advance(chrono::Duration::days(1));
        assert!(scheduler.due().await);
    }

    #[tokio::test]
    async fn weekend_and_holiday_are_skipped() {
        let holiday = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        let clock = Arc::new(ManualClock::at(monday_at(17, 0)));
        let (scheduler, _, _) = setup(
            MockTradeFeed::default(),
            clock.clone(),
            TradingCalendar::with_holidays([holiday]),
        )
        .await;

        // Tuesday is the configured holiday.
        clock.advance(chrono::Duration::days(1));
        assert!(!scheduler.due().await);

        // Saturday.
        clock.set(monday_at(17, 0) + chrono::Duration::days(5));
        assert!(!scheduler.due().await);
    }

    #[tokio::test]
    async fn cycle_places_orders_and_persists_summary() {
        let clock = Arc::new(ManualClock::at(monday_at(17, 0)));
        let feed = MockTradeFeed::with_disclosures(vec![disclosure("Josh Gottheimer")]);
        let (scheduler, ctx, broker) =
            setup(feed, clock, TradingCalendar::default()).await;

        let summary = scheduler.execute_now().await.unwrap();
        assert!(summary.success);
        assert_eq!(summary.total_orders_placed, 1);
        assert_eq!(broker.placed_orders().len(), 1);
        assert_eq!(ctx.store.summary_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn feed_failure_fails_the_cycle_but_not_the_scheduler() {
        let clock = Arc::new(ManualClock::at(monday_at(17, 0)));
        let feed = MockTradeFeed::failing("feed is down");
        let (scheduler, ctx, broker) = setup(feed, clock.clone(), TradingCalendar::default()).await;

        let summary = scheduler.execute_now().await.unwrap();
        assert!(!summary.success);
        assert!(!summary.errors.is_empty());
        assert!(broker.placed_orders().is_empty());
        // Failed cycle is still recorded.
        assert_eq!(ctx.store.summary_count().await.unwrap(), 1);

        // Next day still runs.
        clock.advance(chrono::Duration::days(1));
        assert!(scheduler.due().await);
        let summary = scheduler.execute_now().await.unwrap();
        assert!(!summary.success);
    }

    #[tokio::test]
    async fn manual_trigger_conflicts_with_inflight_run() {
        let clock = Arc::new(ManualClock::at(monday_at(17, 0)));
        let (scheduler, _, _) =
            setup(MockTradeFeed::default(), clock, TradingCalendar::default()).await;

        let _inflight = scheduler.run_lock.lock().await;
        let err = scheduler.execute_now().await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let clock = Arc::new(ManualClock::at(monday_at(17, 0)));
        let (scheduler, _, _) =
            setup(MockTradeFeed::default(), clock.clone(), TradingCalendar::default()).await;

        for _ in 0..(SUMMARY_RETENTION + 5) {
            scheduler.execute_now().await.unwrap();
            clock.advance(chrono::Duration::days(1));
        }
        assert_eq!(
            scheduler.history.read().await.len(),
            SUMMARY_RETENTION
        );
    }

    #[tokio::test]
    async fn background_loop_fires_and_stops() {
        let clock = Arc::new(ManualClock::at(monday_at(17, 0)));
        let feed = MockTradeFeed::with_disclosures(vec![disclosure("Josh Gottheimer")]);
        let (scheduler, _, broker) = setup(feed, clock, TradingCalendar::default()).await;

        scheduler.start().await;
        assert_eq!(scheduler.status().await.state, SchedulerState::Running);

        // A few ticks at 5ms each.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(broker.placed_orders().len(), 1);

        scheduler.stop().await;
        assert_eq!(scheduler.status().await.state, SchedulerState::Stopped);
    }

    #[tokio::test]
    async fn next_run_skips_to_next_trading_day() {
        let clock = Arc::new(ManualClock::at(monday_at(17, 0)));
        let (scheduler, _, _) =
            setup(MockTradeFeed::default(), clock, TradingCalendar::default()).await;

        // Trigger time already passed today, so next run is Tuesday.
        let next = scheduler.next_run().await.unwrap();
        assert_eq!(
            next.date_naive(),
            NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
        );
        assert_eq!(next.time(), TimeOfDay::parse("16:45").unwrap().as_naive());
    }
}
