//! Agent registry: creation, validation, enable/disable, and concurrent
//! execution with per-agent failure isolation.
//!
//! `execute_all` dispatches every enabled agent's daily workflow on a
//! bounded worker pool. Each dispatch runs inside its own task so a panic
//! is converted into that agent's failed `ExecutionResult` at the join
//! boundary; siblings and the calling scheduler are unaffected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tracing::{error, info, warn};

use crate::clients::AppContext;
use crate::error::{EngineError, EngineResult};
use crate::models::{ExecutionResult, TradeDisclosure};

use super::{
    run_daily_workflow, Agent, AgentConfig, AgentHealth, AgentKind, CopyTradeAgent,
    TechnicalAgent,
};

/// Upper bound on concurrently executing agents.
const MAX_PARALLEL_AGENTS: usize = 5;

type SharedAgent = Arc<Mutex<dyn Agent>>;

/// Dashboard-facing per-agent entry.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatusEntry {
    pub kind: AgentKind,
    pub health: AgentHealth,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    /// Class label and time of the most recent recorded failure, if any.
    pub last_error_class: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

/// Dashboard-facing factory status.
#[derive(Debug, Clone, Serialize)]
pub struct FactoryStatus {
    pub registered_count: usize,
    pub active_count: usize,
    pub enabled_count: usize,
    pub failed_creations: u64,
    pub per_agent: HashMap<String, AgentStatusEntry>,
}

pub struct AgentRegistry {
    ctx: Arc<AppContext>,
    agents: RwLock<HashMap<String, SharedAgent>>,
    failed_creations: AtomicU64,
}

impl AgentRegistry {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self {
            ctx,
            agents: RwLock::new(HashMap::new()),
            failed_creations: AtomicU64::new(0),
        }
    }

    /// Create and register an agent from config. A failing config is
    /// recorded as a failed creation and yields `None`; it never
    /// propagates to the caller.
    pub async fn create(&self, config: AgentConfig) -> Option<String> {
        let id = config.id.clone();

        let agent: SharedAgent = match config.kind {
            AgentKind::Individual | AgentKind::Committee => {
                match CopyTradeAgent::new(config, Arc::clone(&self.ctx)) {
                    Ok(agent) => Arc::new(Mutex::new(agent)),
                    Err(e) => {
                        warn!(agent = %id, error = %e, "Agent creation failed");
                        self.failed_creations.fetch_add(1, Ordering::SeqCst);
                        return None;
                    }
                }
            }
            AgentKind::Technical => match TechnicalAgent::new(config, Arc::clone(&self.ctx)) {
                Ok(agent) => Arc::new(Mutex::new(agent)),
                Err(e) => {
                    warn!(agent = %id, error = %e, "Agent creation failed");
                    self.failed_creations.fetch_add(1, Ordering::SeqCst);
                    return None;
                }
            },
        };

        let mut agents = self.agents.write().await;
        if agents.contains_key(&id) {
            warn!(agent = %id, "Duplicate agent id");
            self.failed_creations.fetch_add(1, Ordering::SeqCst);
            return None;
        }
        agents.insert(id.clone(), agent);
        info!(agent = %id, "Agent registered");
        Some(id)
    }

    pub async fn registered_count(&self) -> usize {
        self.agents.read().await.len()
    }

    pub fn failed_creations(&self) -> u64 {
        self.failed_creations.load(Ordering::SeqCst)
    }

    /// Flip an agent's enabled flag. Returns false for unknown ids.
    pub async fn set_enabled(&self, agent_id: &str, enabled: bool) -> bool {
        let agents = self.agents.read().await;
        match agents.get(agent_id) {
            Some(agent) => {
                agent.lock().await.core_mut().set_enabled(enabled);
                info!(agent = %agent_id, enabled, "Agent enabled flag changed");
                true
            }
            None => false,
        }
    }

    /// Run every enabled agent's full daily workflow and aggregate results
    /// into an id-keyed map. Parallel mode bounds concurrency to
    /// `min(active agents, MAX_PARALLEL_AGENTS)`; sequential mode is the
    /// same pipeline one agent at a time.
    pub async fn execute_all(
        &self,
        disclosures: &[TradeDisclosure],
        parallel: bool,
    ) -> HashMap<String, ExecutionResult> {
        let mut snapshot: Vec<(String, SharedAgent)> = Vec::new();
        {
            let agents = self.agents.read().await;
            for (id, agent) in agents.iter() {
                if agent.lock().await.is_enabled() {
                    snapshot.push((id.clone(), Arc::clone(agent)));
                }
            }
        }

        let active = snapshot.len();
        if active == 0 {
            return HashMap::new();
        }

        let cap = if parallel {
            active.min(MAX_PARALLEL_AGENTS)
        } else {
            1
        };
        let semaphore = Arc::new(Semaphore::new(cap));
        let disclosures: Arc<Vec<TradeDisclosure>> = Arc::new(disclosures.to_vec());

        let mut handles = Vec::with_capacity(active);
        for (id, agent) in snapshot {
            let semaphore = Arc::clone(&semaphore);
            let disclosures = Arc::clone(&disclosures);
            handles.push((
                id.clone(),
                tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                    let mut agent = agent.lock().await;
                    // Enabled is re-checked immediately before dispatch; a
                    // disable that lands after this point does not cancel
                    // the in-flight run.
                    if !agent.is_enabled() {
                        return None;
                    }
                    Some(run_daily_workflow(&mut *agent, &disclosures).await)
                }),
            ));
        }

        let joined = futures::future::join_all(
            handles
                .into_iter()
                .map(|(id, handle)| async move { (id, handle.await) }),
        )
        .await;

        let mut results = HashMap::new();
        for (id, outcome) in joined {
            match outcome {
                Ok(Some(result)) => {
                    results.insert(id, result);
                }
                Ok(None) => {
                    // Disabled at dispatch time; no result entry.
                }
                Err(join_err) => {
                    let err = EngineError::Isolation(join_err.to_string());
                    error!(agent = %id, error = %err, "Agent task lost");
                    results.insert(id, ExecutionResult::failed(err.to_string()));
                }
            }
        }

        results
    }

    /// Health per agent, derived from {state, enabled}.
    pub async fn health_check_all(&self) -> HashMap<String, AgentHealth> {
        let agents = self.agents.read().await;
        let mut health = HashMap::with_capacity(agents.len());
        for (id, agent) in agents.iter() {
            health.insert(id.clone(), agent.lock().await.core().health());
        }
        health
    }

    /// Dashboard contract: counts plus per-agent status.
    pub async fn factory_status(&self) -> FactoryStatus {
        let agents = self.agents.read().await;
        let mut per_agent = HashMap::with_capacity(agents.len());
        let mut enabled_count = 0;
        let mut active_count = 0;

        for (id, agent) in agents.iter() {
            let agent = agent.lock().await;
            let core = agent.core();
            let health = core.health();
            if core.enabled {
                enabled_count += 1;
                if health != AgentHealth::Unhealthy {
                    active_count += 1;
                }
            }
            per_agent.insert(
                id.clone(),
                AgentStatusEntry {
                    kind: core.config.kind,
                    health,
                    enabled: core.enabled,
                    created_at: core.created_at,
                    last_error_class: core.last_error_class.clone(),
                    last_error_at: core.last_error_at,
                },
            );
        }

        FactoryStatus {
            registered_count: agents.len(),
            active_count,
            enabled_count,
            failed_creations: self.failed_creations(),
            per_agent,
        }
    }

    /// Intraday hook dispatch: market-open entry analysis.
    pub async fn run_market_open(&self, agent_id: &str) -> EngineResult<()> {
        self.with_enabled_agent(agent_id, |agent| Box::pin(agent.on_market_open()))
            .await
    }

    /// Intraday hook dispatch: market-close forced flatten.
    pub async fn run_market_close(&self, agent_id: &str) -> EngineResult<()> {
        self.with_enabled_agent(agent_id, |agent| Box::pin(agent.on_market_close()))
            .await
    }

    /// Intraday workflow for generic agents: one full daily pipeline over
    /// freshly fetched disclosures.
    pub async fn run_agent_workflow(
        &self,
        agent_id: &str,
        disclosures: &[TradeDisclosure],
    ) -> EngineResult<ExecutionResult> {
        let agent = {
            let agents = self.agents.read().await;
            agents
                .get(agent_id)
                .cloned()
                .ok_or_else(|| EngineError::permanent(format!("unknown agent {agent_id}")))?
        };
        let mut agent = agent.lock().await;
        if !agent.is_enabled() {
            return Err(EngineError::permanent(format!("agent {agent_id} disabled")));
        }
        Ok(run_daily_workflow(&mut *agent, disclosures).await)
    }

    async fn with_enabled_agent<F>(&self, agent_id: &str, f: F) -> EngineResult<()>
    where
        F: for<'a> FnOnce(
            &'a mut dyn Agent,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = EngineResult<()>> + Send + 'a>,
        >,
    {
        let agent = {
            let agents = self.agents.read().await;
            agents
                .get(agent_id)
                .cloned()
                .ok_or_else(|| EngineError::permanent(format!("unknown agent {agent_id}")))?
        };
        let mut agent = agent.lock().await;
        if !agent.is_enabled() {
            return Err(EngineError::permanent(format!("agent {agent_id} disabled")));
        }
        f(&mut *agent).await
    }
}
