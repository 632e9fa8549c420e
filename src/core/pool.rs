//! Agent pool: runtime state and invocation policy for every agent.
//!
//! The pool is the only component that actually runs caller-supplied
//! work. It enforces per-agent admission (cooldown, rate limiting,
//! circular-update detection), retry with timeout on each attempt, and
//! records every terminal outcome in a bounded history.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, error, info, instrument, warn};

use crate::config::PoolSettings;
use crate::domain::{
    Agent, AgentOverrides, AgentStats, AgentStatus, ExecutionHistory, ExecutionRecord,
};
use crate::invoke::Invocable;

use super::clock::Clock;

/// Why an invocation was refused before any work started.
///
/// Renders as the machine-readable snake code so callers (and error
/// messages) can match on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionReason {
    NotRegistered,
    AlreadyRunning,
    Cooldown,
    RateLimited,
    CircularUpdate,
}

impl fmt::Display for AdmissionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Self::NotRegistered => "not_registered",
            Self::AlreadyRunning => "already_running",
            Self::Cooldown => "cooldown",
            Self::RateLimited => "rate_limited",
            Self::CircularUpdate => "circular_update",
        };
        f.write_str(code)
    }
}

/// Admission verdict from [`AgentPool::can_execute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    pub reason: Option<AdmissionReason>,
}

impl Admission {
    fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn denied(reason: AdmissionReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

/// Errors surfaced by the pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Refused before any work started; no counters were touched.
    #[error("agent '{agent}' refused: {reason}")]
    Refused {
        agent: String,
        reason: AdmissionReason,
    },

    /// Retries exhausted; carries the final attempt's error verbatim.
    #[error("agent '{agent}' failed after {attempts} attempts: {source}")]
    Failed {
        agent: String,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },
}

/// Pool-wide status counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total_agents: usize,
    pub idle: usize,
    pub running: usize,
    pub failed: usize,
}

/// Owns every registered agent and executes work on their behalf.
pub struct AgentPool {
    agents: Mutex<HashMap<String, Agent>>,
    history: Mutex<ExecutionHistory>,
    settings: PoolSettings,
    clock: Arc<dyn Clock>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AgentPool {
    /// Create a pool with the given settings and time source.
    pub fn new(settings: PoolSettings, clock: Arc<dyn Clock>) -> Self {
        let max_history = settings.max_history;
        Self {
            agents: Mutex::new(HashMap::new()),
            history: Mutex::new(ExecutionHistory::new(max_history)),
            settings,
            clock,
        }
    }

    /// Register an agent, or merge config overrides into an existing one.
    ///
    /// First registration starts idle with zeroed counters, with
    /// unsupplied fields falling back to the pool defaults.
    /// Re-registration only merges the supplied fields; counters and
    /// status are untouched.
    pub fn register_agent(&self, name: &str, overrides: AgentOverrides) {
        let mut agents = lock(&self.agents);
        match agents.get_mut(name) {
            Some(agent) => {
                agent.config = agent.config.merge(&overrides);
                debug!(agent = name, "Agent config merged");
            }
            None => {
                let config = self.settings.defaults.merge(&overrides);
                agents.insert(name.to_string(), Agent::new(name, config));
                info!(agent = name, "Agent registered");
            }
        }
    }

    /// Whether the named agent exists.
    pub fn is_registered(&self, name: &str) -> bool {
        lock(&self.agents).contains_key(name)
    }

    /// Pure admission decision, evaluated in fixed priority order:
    /// not-registered, already-running, cooldown, rate-limited,
    /// circular-update. Returns on the first failing check.
    pub fn can_execute(&self, name: &str) -> Admission {
        let agents = lock(&self.agents);
        self.admit(&agents, name)
    }

    fn admit(&self, agents: &HashMap<String, Agent>, name: &str) -> Admission {
        let Some(agent) = agents.get(name) else {
            return Admission::denied(AdmissionReason::NotRegistered);
        };

        if agent.status == AgentStatus::Running {
            return Admission::denied(AdmissionReason::AlreadyRunning);
        }

        let now = self.clock.now();

        if agent.config.cooldown_ms > 0 {
            if let Some(last) = agent.last_execution_time {
                let since_ms = (now - last).num_milliseconds();
                if since_ms < agent.config.cooldown_ms as i64 {
                    return Admission::denied(AdmissionReason::Cooldown);
                }
            }
        }

        let in_window = |window_ms: u64| {
            agent
                .recent_completions
                .iter()
                .filter(|t| (now - **t).num_milliseconds() <= window_ms as i64)
                .count()
        };

        if in_window(self.settings.rate_limit_window_ms) > self.settings.rate_limit_max {
            return Admission::denied(AdmissionReason::RateLimited);
        }

        if in_window(self.settings.circular_update_window_ms)
            > self.settings.circular_update_threshold
        {
            return Admission::denied(AdmissionReason::CircularUpdate);
        }

        Admission::allowed()
    }

    /// Whether the agent is inside its cooldown window right now.
    pub fn is_in_cooldown(&self, name: &str) -> bool {
        self.can_execute(name).reason == Some(AdmissionReason::Cooldown)
    }

    /// Execute the supplied operation on behalf of `name`.
    ///
    /// The sole execution entry point. Refusals carry no side effects.
    /// Each attempt runs under the agent's timeout; transient failures
    /// retry after sleeping the cooldown, up to `max_retries` for the
    /// whole invocation, without re-checking admission (a retry is part
    /// of the same logical invocation). Exhaustion marks the agent
    /// failed and re-raises the final error.
    #[instrument(skip(self, operation), fields(agent = name))]
    pub async fn execute_agent(
        &self,
        name: &str,
        operation: &dyn Invocable,
    ) -> Result<Value, PoolError> {
        let config = {
            let mut agents = lock(&self.agents);
            let admission = self.admit(&agents, name);
            if let Some(reason) = admission.reason {
                debug!(agent = name, %reason, "Invocation refused");
                return Err(PoolError::Refused {
                    agent: name.to_string(),
                    reason,
                });
            }

            // Admission guarantees presence; transition under the same
            // lock so concurrent callers see already_running.
            let Some(agent) = agents.get_mut(name) else {
                return Err(PoolError::Refused {
                    agent: name.to_string(),
                    reason: AdmissionReason::NotRegistered,
                });
            };
            agent.status = AgentStatus::Running;
            agent.config
        };

        let started_at = self.clock.now();
        let started = Instant::now();
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;

            let attempt = timeout(Duration::from_millis(config.timeout_ms), operation.invoke())
                .await
                .unwrap_or_else(|_| {
                    Err(anyhow::anyhow!("timed out after {}ms", config.timeout_ms))
                });

            match attempt {
                Ok(value) => {
                    let duration_ms = started.elapsed().as_millis() as u64;
                    self.finish(name, true);
                    self.record(name, started_at, duration_ms, true, None);
                    info!(agent = name, attempts, duration_ms, "Agent succeeded");
                    return Ok(value);
                }
                Err(e) => {
                    let will_retry = {
                        let mut agents = lock(&self.agents);
                        match agents.get_mut(name) {
                            Some(agent) if agent.retry_count < config.max_retries => {
                                agent.retry_count += 1;
                                true
                            }
                            _ => false,
                        }
                    };

                    if will_retry {
                        warn!(
                            agent = name,
                            attempts,
                            cooldown_ms = config.cooldown_ms,
                            error = %e,
                            "Agent attempt failed, retrying after cooldown"
                        );
                        if config.cooldown_ms > 0 {
                            sleep(Duration::from_millis(config.cooldown_ms)).await;
                        }
                        continue;
                    }

                    let duration_ms = started.elapsed().as_millis() as u64;
                    self.finish(name, false);
                    self.record(name, started_at, duration_ms, false, Some(e.to_string()));
                    error!(agent = name, attempts, error = %e, "Agent failed permanently");
                    return Err(PoolError::Failed {
                        agent: name.to_string(),
                        attempts,
                        source: e,
                    });
                }
            }
        }
    }

    /// Book a terminal completion on the agent record.
    fn finish(&self, name: &str, success: bool) {
        let now = self.clock.now();
        let retain_ms = self
            .settings
            .rate_limit_window_ms
            .max(self.settings.circular_update_window_ms);

        let mut agents = lock(&self.agents);
        let Some(agent) = agents.get_mut(name) else {
            // Unregistered mid-flight; nothing left to book against.
            return;
        };

        agent.total_executions += 1;
        if success {
            agent.successful_executions += 1;
            agent.retry_count = 0;
            agent.status = AgentStatus::Idle;
        } else {
            agent.failed_executions += 1;
            agent.status = AgentStatus::Failed;
        }
        agent.last_execution_time = Some(now);

        agent.recent_completions.push_back(now);
        while let Some(front) = agent.recent_completions.front() {
            if (now - *front).num_milliseconds() > retain_ms as i64 {
                agent.recent_completions.pop_front();
            } else {
                break;
            }
        }
    }

    fn record(
        &self,
        name: &str,
        start_time: chrono::DateTime<chrono::Utc>,
        duration_ms: u64,
        success: bool,
        error: Option<String>,
    ) {
        lock(&self.history).push(ExecutionRecord {
            agent: name.to_string(),
            start_time,
            duration_ms,
            success,
            error,
        });
    }

    /// Force an agent back to idle with a zeroed retry budget.
    ///
    /// Operator recovery: lets a failed agent run again immediately,
    /// bypassing cooldown. Historical counters are untouched.
    pub fn reset_agent(&self, name: &str) -> Result<(), PoolError> {
        let mut agents = lock(&self.agents);
        let Some(agent) = agents.get_mut(name) else {
            return Err(PoolError::Refused {
                agent: name.to_string(),
                reason: AdmissionReason::NotRegistered,
            });
        };
        agent.status = AgentStatus::Idle;
        agent.retry_count = 0;
        agent.last_execution_time = None;
        info!(agent = name, "Agent reset");
        Ok(())
    }

    /// Remove the agent and purge its history entries.
    pub fn unregister_agent(&self, name: &str) -> bool {
        let removed = lock(&self.agents).remove(name).is_some();
        if removed {
            lock(&self.history).purge_agent(name);
            info!(agent = name, "Agent unregistered");
        }
        removed
    }

    /// Read-only stats for one agent.
    pub fn agent_stats(&self, name: &str) -> Option<AgentStats> {
        lock(&self.agents).get(name).map(AgentStats::from)
    }

    /// Pool-wide status counts.
    pub fn pool_stats(&self) -> PoolStats {
        let agents = lock(&self.agents);
        let mut stats = PoolStats {
            total_agents: agents.len(),
            idle: 0,
            running: 0,
            failed: 0,
        };
        for agent in agents.values() {
            match agent.status {
                AgentStatus::Idle => stats.idle += 1,
                AgentStatus::Running => stats.running += 1,
                AgentStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Names of agents currently running, sorted.
    pub fn running_agents(&self) -> Vec<String> {
        let agents = lock(&self.agents);
        let mut running: Vec<String> = agents
            .values()
            .filter(|a| a.status == AgentStatus::Running)
            .map(|a| a.name.clone())
            .collect();
        running.sort();
        running
    }

    /// Snapshot of the execution history, oldest first.
    pub fn execution_history(&self) -> Vec<ExecutionRecord> {
        lock(&self.history).snapshot()
    }

    /// Drop one agent's records from the history.
    pub fn clear_agent_history(&self, name: &str) {
        lock(&self.history).purge_agent(name);
    }

    /// Drop all execution records.
    pub fn clear_all_history(&self) {
        lock(&self.history).clear();
    }
}
