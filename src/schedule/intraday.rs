//! Intraday scheduler: per-agent tasks at fixed times of day.
//!
//! Tasks are keyed by (agent, kind, time). Market-open tasks drive the
//! technical entry analysis, market-close tasks force a flatten, periodic
//! and custom tasks run a full workflow cycle for one agent. Every fire
//! re-checks the trading-day predicate so a holiday suppresses the cycle
//! even though the task is due.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Utc, Weekday};
use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::agents::AgentRegistry;
use crate::clients::AppContext;
use crate::error::{EngineError, EngineResult};

use super::{TimeOfDay, TradingCalendar};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ScheduleKind {
    MarketOpen,
    MarketClose,
    Periodic { every: Duration },
    Custom,
}

impl ScheduleKind {
    /// Key component; periodic cadence does not differentiate tasks.
    fn label(&self) -> &'static str {
        match self {
            ScheduleKind::MarketOpen => "market_open",
            ScheduleKind::MarketClose => "market_close",
            ScheduleKind::Periodic { .. } => "periodic",
            ScheduleKind::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduledTask {
    pub id: String,
    pub agent_id: String,
    pub kind: ScheduleKind,
    pub at: TimeOfDay,
    pub enabled: bool,
    pub execution_count: u64,
    pub error_count: u64,
    pub last_run: Option<DateTime<Utc>>,
    /// Class label and time of the most recent failed fire, if any.
    pub last_error_class: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

impl ScheduledTask {
    fn key(&self) -> (String, &'static str, TimeOfDay) {
        (self.agent_id.clone(), self.kind.label(), self.at)
    }

    fn due(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled || !self.at.has_passed(now) {
            return false;
        }
        match self.kind {
            ScheduleKind::Periodic { every } => self.last_run.map_or(true, |last| {
                now.signed_duration_since(last).to_std().unwrap_or_default() >= every
            }),
            _ => self.last_run.map_or(true, |last| {
                last.date_naive() != now.date_naive()
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntradaySchedulerStatus {
    pub running: bool,
    pub health: SchedulerHealth,
    pub tasks: Vec<ScheduledTask>,
    pub total_runs: u64,
    pub total_failures: u64,
    pub success_rate: f64,
}

pub struct IntradayScheduler {
    registry: Arc<AgentRegistry>,
    ctx: Arc<AppContext>,
    calendar: TradingCalendar,
    tick_interval: Duration,

    tasks: RwLock<Vec<ScheduledTask>>,
    total_runs: AtomicU64,
    total_failures: AtomicU64,

    started: AtomicBool,
    loop_running: AtomicBool,
    shutdown: watch::Sender<bool>,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl IntradayScheduler {
    pub fn new(
        registry: Arc<AgentRegistry>,
        ctx: Arc<AppContext>,
        calendar: TradingCalendar,
        tick_interval: Duration,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            registry,
            ctx,
            calendar,
            tick_interval,
            tasks: RwLock::new(Vec::new()),
            total_runs: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            started: AtomicBool::new(false),
            loop_running: AtomicBool::new(false),
            shutdown,
            handle: std::sync::Mutex::new(None),
        })
    }

    /// Register a task. A second task with the same (agent, kind, time)
    /// key is a conflict.
    pub async fn add_task(
        &self,
        agent_id: &str,
        kind: ScheduleKind,
        at: TimeOfDay,
    ) -> EngineResult<String> {
        let task = ScheduledTask {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            kind,
            at,
            enabled: true,
            execution_count: 0,
            error_count: 0,
            last_run: None,
            last_error_class: None,
            last_error_at: None,
        };

        let mut tasks = self.tasks.write().await;
        if tasks.iter().any(|t| t.key() == task.key()) {
            return Err(EngineError::Conflict(format!(
                "task already scheduled for agent {agent_id} ({} at {at})",
                kind.label()
            )));
        }
        info!(agent = %agent_id, kind = kind.label(), at = %at, "Intraday task added");
        let id = task.id.clone();
        tasks.push(task);
        Ok(id)
    }

    pub async fn set_task_enabled(&self, task_id: &str, enabled: bool) -> bool {
        let mut tasks = self.tasks.write().await;
        match tasks.iter_mut().find(|t| t.id == task_id) {
            Some(task) => {
                task.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub async fn start(self: &Arc<Self>) {
        if self.loop_running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.started.store(true, Ordering::SeqCst);
        info!("Intraday scheduler started");

        let scheduler = Arc::clone(self);
        let mut shutdown_rx = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = tokio::time::sleep(scheduler.tick_interval) => {}
                }
                scheduler.tick().await;
            }
            scheduler.loop_running.store(false, Ordering::SeqCst);
            scheduler.started.store(false, Ordering::SeqCst);
        });
        *self.handle.lock().expect("scheduler handle lock") = Some(handle);
    }

    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let handle = self.handle.lock().expect("scheduler handle lock").take();
        if let Some(handle) = handle {
            if tokio::time::timeout(Duration::from_secs(30), handle)
                .await
                .is_err()
            {
                warn!("Intraday scheduler did not stop within the join window");
            }
        }
        self.started.store(false, Ordering::SeqCst);
        info!("Intraday scheduler stopped");
    }

    /// One pass over the task set. Weekday-gated up front; the trading-day
    /// predicate is re-checked per fire so a holiday consumes the cycle
    /// without dispatching.
    pub async fn tick(&self) {
        let now = self.ctx.clock.now_utc();
        if matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
            return;
        }

        let due: Vec<ScheduledTask> = {
            let tasks = self.tasks.read().await;
            tasks.iter().filter(|t| t.due(now)).cloned().collect()
        };

        for task in due {
            if !self.calendar.is_trading_day(now.date_naive()) {
                debug!(task = %task.id, "Holiday, fire suppressed");
                self.mark_fired(&task.id, now, false, None).await;
                continue;
            }

            let outcome = self.dispatch(&task).await;
            self.total_runs.fetch_add(1, Ordering::SeqCst);
            if let Err(e) = &outcome {
                self.total_failures.fetch_add(1, Ordering::SeqCst);
                warn!(task = %task.id, agent = %task.agent_id, error = %e, "Intraday task failed");
            } else {
                debug!(task = %task.id, agent = %task.agent_id, "Intraday task completed");
            }
            self.mark_fired(&task.id, now, true, outcome.as_ref().err())
                .await;
        }
    }

    async fn dispatch(&self, task: &ScheduledTask) -> EngineResult<()> {
        match task.kind {
            ScheduleKind::MarketOpen => self.registry.run_market_open(&task.agent_id).await,
            ScheduleKind::MarketClose => self.registry.run_market_close(&task.agent_id).await,
            ScheduleKind::Periodic { .. } | ScheduleKind::Custom => {
                let date = self.ctx.clock.now_utc().date_naive();
                let feed = Arc::clone(&self.ctx.feed);
                let disclosures = self
                    .ctx
                    .retry
                    .run("feed.fetch", || {
                        let feed = Arc::clone(&feed);
                        async move { feed.fetch(date).await }
                    })
                    .await?;
                let result = self
                    .registry
                    .run_agent_workflow(&task.agent_id, &disclosures)
                    .await?;
                if result.success {
                    Ok(())
                } else {
                    Err(EngineError::permanent(result.errors.join("; ")))
                }
            }
        }
    }

    /// Record a fire. `fired: false` means the fire was suppressed and
    /// only consumes the cycle.
    async fn mark_fired(
        &self,
        task_id: &str,
        now: DateTime<Utc>,
        fired: bool,
        error: Option<&EngineError>,
    ) {
        let mut tasks = self.tasks.write().await;
        if let Some(task) = tasks.iter_mut().find(|t| t.id == task_id) {
            task.last_run = Some(now);
            if fired {
                task.execution_count += 1;
                if let Some(e) = error {
                    task.error_count += 1;
                    task.last_error_class = Some(e.class().to_string());
                    task.last_error_at = Some(now);
                }
            }
        }
    }

    /// Degraded when the overall failure rate passes 50% over at least 10
    /// runs, or any single task fails more than 60% of at least 5 runs.
    /// Unhealthy when the driving loop stopped unexpectedly.
    pub async fn health(&self) -> SchedulerHealth {
        if self.started.load(Ordering::SeqCst) {
            let loop_dead = self
                .handle
                .lock()
                .expect("scheduler handle lock")
                .as_ref()
                .map_or(true, |h| h.is_finished());
            if loop_dead {
                return SchedulerHealth::Unhealthy;
            }
        }

        let runs = self.total_runs.load(Ordering::SeqCst);
        let failures = self.total_failures.load(Ordering::SeqCst);
        if runs >= 10 && failures * 2 > runs {
            return SchedulerHealth::Degraded;
        }

        let tasks = self.tasks.read().await;
        for task in tasks.iter() {
            if task.execution_count >= 5
                && task.error_count as f64 / task.execution_count as f64 > 0.6
            {
                return SchedulerHealth::Degraded;
            }
        }
        SchedulerHealth::Healthy
    }

    pub async fn status(&self) -> IntradaySchedulerStatus {
        let runs = self.total_runs.load(Ordering::SeqCst);
        let failures = self.total_failures.load(Ordering::SeqCst);
        IntradaySchedulerStatus {
            running: self.loop_running.load(Ordering::SeqCst),
            health: self.health().await,
            tasks: self.tasks.read().await.clone(),
            total_runs: runs,
            total_failures: failures,
            success_rate: if runs == 0 {
                1.0
            } else {
                (runs - failures) as f64 / runs as f64
            },
        }
    }
}
