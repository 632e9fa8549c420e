//! Top-level execution driver.
//!
//! Given a set of changed inputs (or none, meaning everything), the
//! orchestrator asks the dependency graph which agents are affected,
//! builds a level-grouped execution plan, and drives the pool through
//! each level with a global concurrency cap. One run at a time; levels
//! are hard barriers.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::OrchestratorSettings;
use crate::domain::{
    AgentOutcome, AgentOverrides, ExecutionPlan, ExecutionReport, OrchestratorStatus,
    OutcomeStatus, PlanGroup,
};
use crate::invoke::Invocable;

use super::graph::{DependencyGraph, GraphError};
use super::pool::AgentPool;

/// Errors surfaced by the orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Only one run may be in flight at a time.
    #[error("Orchestration already in progress")]
    AlreadyInProgress,

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Drives the pool through level-ordered execution plans.
pub struct Orchestrator {
    graph: Mutex<DependencyGraph>,
    pool: Arc<AgentPool>,
    invocables: Mutex<HashMap<String, Arc<dyn Invocable>>>,
    settings: OrchestratorSettings,
    is_executing: AtomicBool,
    completed_agents: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears the in-progress flag on every exit path.
struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

impl Orchestrator {
    /// Create an orchestrator over an existing graph and pool.
    pub fn new(
        graph: DependencyGraph,
        pool: Arc<AgentPool>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            graph: Mutex::new(graph),
            pool,
            invocables: Mutex::new(HashMap::new()),
            settings,
            is_executing: AtomicBool::new(false),
            completed_agents: AtomicUsize::new(0),
        }
    }

    /// Register an agent in one step: pool record, dependency edges, and
    /// the operation to run for it.
    pub fn register<S: AsRef<str>>(
        &self,
        name: &str,
        dependencies: &[S],
        overrides: AgentOverrides,
        operation: Arc<dyn Invocable>,
    ) {
        self.pool.register_agent(name, overrides);
        lock(&self.graph).add_agent(name, dependencies);
        lock(&self.invocables).insert(name.to_string(), operation);
    }

    /// The pool this orchestrator drives.
    pub fn pool(&self) -> &Arc<AgentPool> {
        &self.pool
    }

    /// Run a closure against the graph, e.g. for ad-hoc queries.
    pub fn with_graph<R>(&self, f: impl FnOnce(&mut DependencyGraph) -> R) -> R {
        f(&mut lock(&self.graph))
    }

    /// Build the plan for a change set.
    ///
    /// An empty change set selects every registered agent. Groups are
    /// always derived from the full graph's levels restricted to the
    /// selected set, so relative ordering between selected agents is
    /// preserved while unaffected agents are skipped entirely and never
    /// waited on.
    pub fn build_execution_plan<S: AsRef<str>>(
        &self,
        changed_inputs: &[S],
    ) -> Result<ExecutionPlan, OrchestratorError> {
        let mut graph = lock(&self.graph);
        let all_groups = graph.parallel_groups()?;

        let selected: HashSet<String> = if changed_inputs.is_empty() {
            graph
                .agent_names()
                .into_iter()
                .filter(|name| self.pool.is_registered(name))
                .collect()
        } else {
            graph
                .affected_agents(changed_inputs)
                .into_iter()
                .filter(|name| self.pool.is_registered(name))
                .collect()
        };

        let groups: Vec<PlanGroup> = all_groups
            .into_iter()
            .filter_map(|group| {
                let agents: Vec<String> = group
                    .agents
                    .into_iter()
                    .filter(|a| selected.contains(a))
                    .collect();
                (!agents.is_empty()).then_some(PlanGroup {
                    level: group.level,
                    agents,
                })
            })
            .collect();

        let mut affected_agents: Vec<String> = selected.into_iter().collect();
        affected_agents.sort();
        let total_agents = affected_agents.len();

        Ok(ExecutionPlan {
            affected_agents,
            groups,
            total_agents,
        })
    }

    /// Execute the plan for a change set.
    ///
    /// Levels run in ascending order with a hard barrier between them:
    /// level k+1 starts only after every planned agent in level k reached
    /// a terminal state. Within a level, agents run with at most
    /// `max_concurrency` in flight. A terminal failure does not abort the
    /// run: same-level independents still execute, and later agents whose
    /// planned dependencies failed (transitively) are skipped rather than
    /// run against known-incomplete upstream state.
    #[instrument(skip(self, changed_inputs))]
    pub async fn execute<S: AsRef<str> + Send + Sync>(
        &self,
        changed_inputs: &[S],
    ) -> Result<ExecutionReport, OrchestratorError> {
        if self
            .is_executing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(OrchestratorError::AlreadyInProgress);
        }
        let _guard = RunGuard {
            flag: &self.is_executing,
        };
        self.completed_agents.store(0, Ordering::SeqCst);

        let run_id = Uuid::new_v4();
        let started_at = chrono::Utc::now();
        let started = Instant::now();

        let plan = self.build_execution_plan(changed_inputs)?;
        info!(
            %run_id,
            agents = plan.total_agents,
            groups = plan.groups.len(),
            "Starting orchestration run"
        );

        // Direct dependencies restricted to the plan, for the skip
        // decision. Transitivity falls out level by level: a skipped or
        // failed agent poisons its dependents in later groups.
        let planned: HashSet<String> = plan.affected_agents.iter().cloned().collect();
        let plan_deps: HashMap<String, Vec<String>> = {
            let graph = lock(&self.graph);
            planned
                .iter()
                .map(|name| {
                    let deps = graph
                        .dependencies(name)
                        .into_iter()
                        .filter(|d| planned.contains(d))
                        .collect();
                    (name.clone(), deps)
                })
                .collect()
        };

        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrency));
        let mut poisoned: HashSet<String> = HashSet::new();
        let mut results: Vec<AgentOutcome> = Vec::with_capacity(plan.total_agents);

        for group in &plan.groups {
            debug!(
                level = group.level,
                agents = group.agents.len(),
                "Starting level"
            );
            let mut join_set: JoinSet<AgentOutcome> = JoinSet::new();

            for agent in &group.agents {
                let failed_deps: Vec<&String> = plan_deps
                    .get(agent)
                    .into_iter()
                    .flatten()
                    .filter(|d| poisoned.contains(*d))
                    .collect();
                if !failed_deps.is_empty() {
                    warn!(
                        agent = %agent,
                        upstream = ?failed_deps,
                        "Skipping agent, upstream dependency failed"
                    );
                    poisoned.insert(agent.clone());
                    results.push(AgentOutcome {
                        agent: agent.clone(),
                        status: OutcomeStatus::Skipped,
                        duration_ms: 0,
                        error: None,
                    });
                    continue;
                }

                let operation = lock(&self.invocables).get(agent).cloned();
                let pool = Arc::clone(&self.pool);
                let semaphore = Arc::clone(&semaphore);
                let name = agent.clone();

                join_set.spawn(async move {
                    let attempt_started = Instant::now();
                    let permit = semaphore.acquire_owned().await;
                    let error = match (permit, operation) {
                        (Err(_), _) => Some("concurrency gate closed".to_string()),
                        (_, None) => Some(format!("agent '{name}' has no registered operation")),
                        (Ok(_permit), Some(operation)) => pool
                            .execute_agent(&name, operation.as_ref())
                            .await
                            .err()
                            .map(|e| e.to_string()),
                    };
                    AgentOutcome {
                        agent: name,
                        status: if error.is_none() {
                            OutcomeStatus::Succeeded
                        } else {
                            OutcomeStatus::Failed
                        },
                        duration_ms: attempt_started.elapsed().as_millis() as u64,
                        error,
                    }
                });
            }

            // Hard barrier: level k+1 must not start until level k drains.
            while let Some(joined) = join_set.join_next().await {
                let outcome = joined.unwrap_or_else(|e| AgentOutcome {
                    agent: String::new(),
                    status: OutcomeStatus::Failed,
                    duration_ms: 0,
                    error: Some(format!("agent task panicked: {e}")),
                });

                match outcome.status {
                    OutcomeStatus::Succeeded => {
                        self.completed_agents.fetch_add(1, Ordering::SeqCst);
                    }
                    OutcomeStatus::Failed => {
                        error!(agent = %outcome.agent, error = ?outcome.error, "Agent failed");
                        poisoned.insert(outcome.agent.clone());
                    }
                    OutcomeStatus::Skipped => {}
                }
                results.push(outcome);
            }
        }

        let agents_failed = results
            .iter()
            .filter(|o| o.status == OutcomeStatus::Failed)
            .count();
        let agents_executed = results
            .iter()
            .filter(|o| o.status != OutcomeStatus::Skipped)
            .count();
        let success = agents_failed == 0;
        let duration_ms = started.elapsed().as_millis() as u64;

        info!(
            %run_id,
            success,
            agents_executed,
            agents_failed,
            duration_ms,
            "Orchestration run finished"
        );

        Ok(ExecutionReport {
            run_id,
            success,
            started_at,
            duration_ms,
            agents_executed,
            agents_failed,
            results,
        })
    }

    /// Observability snapshot.
    pub fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            is_executing: self.is_executing.load(Ordering::SeqCst),
            currently_running: self.pool.running_agents(),
            completed_agents: self.completed_agents.load(Ordering::SeqCst),
        }
    }
}
