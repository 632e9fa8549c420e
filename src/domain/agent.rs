//! Agent runtime state.
//!
//! An Agent is the pool-side record for one named unit of work: its
//! status, invocation policy, and lifetime counters. The pool is the only
//! writer; everything here is plain data.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where an agent currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Registered and available to run.
    Idle,

    /// An invocation is in flight.
    Running,

    /// The last invocation exhausted its retries.
    Failed,
}

/// Per-agent invocation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Per-attempt timeout in milliseconds (default: 30s)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Retries allowed within one invocation before it fails terminally
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Minimum gap between the end of one invocation and the start of the
    /// next, in milliseconds (default: 0 = none)
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

fn default_timeout_ms() -> u64 {
    30_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_cooldown_ms() -> u64 {
    0
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

impl AgentConfig {
    /// Apply partial overrides, field by field.
    pub fn merge(&self, overrides: &AgentOverrides) -> Self {
        Self {
            timeout_ms: overrides.timeout_ms.unwrap_or(self.timeout_ms),
            max_retries: overrides.max_retries.unwrap_or(self.max_retries),
            cooldown_ms: overrides.cooldown_ms.unwrap_or(self.cooldown_ms),
        }
    }
}

/// Partial config supplied at registration.
///
/// Fields left unset fall back to whatever the agent already has (on
/// re-registration) or to the pool-wide defaults (on first registration).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentOverrides {
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub cooldown_ms: Option<u64>,
}

/// Runtime record for one registered agent.
#[derive(Debug, Clone, Serialize)]
pub struct Agent {
    /// Unique name
    pub name: String,

    /// Current lifecycle status
    pub status: AgentStatus,

    /// Effective invocation policy
    pub config: AgentConfig,

    /// Top-level invocations that reached a terminal state
    pub total_executions: u64,

    /// Invocations that succeeded
    pub successful_executions: u64,

    /// Invocations that exhausted their retries
    pub failed_executions: u64,

    /// Retries consumed; reset to 0 by any successful completion
    pub retry_count: u32,

    /// Wall-clock time of the last terminal completion
    pub last_execution_time: Option<DateTime<Utc>>,

    /// Completion timestamps still inside the sliding windows
    #[serde(skip)]
    pub(crate) recent_completions: VecDeque<DateTime<Utc>>,
}

impl Agent {
    /// Create an idle agent with zeroed counters.
    pub fn new(name: impl Into<String>, config: AgentConfig) -> Self {
        Self {
            name: name.into(),
            status: AgentStatus::Idle,
            config,
            total_executions: 0,
            successful_executions: 0,
            failed_executions: 0,
            retry_count: 0,
            last_execution_time: None,
            recent_completions: VecDeque::new(),
        }
    }

    /// Success rate as a display string; "0%" when nothing has run.
    pub fn success_rate(&self) -> String {
        if self.total_executions == 0 {
            return "0%".to_string();
        }
        let rate = self.successful_executions as f64 / self.total_executions as f64;
        format!("{:.1}%", rate * 100.0)
    }
}

/// Read-only per-agent view returned by the pool.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStats {
    pub name: String,
    pub status: AgentStatus,
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub retry_count: u32,
    pub success_rate: String,
    pub last_execution_time: Option<DateTime<Utc>>,
}

impl From<&Agent> for AgentStats {
    fn from(agent: &Agent) -> Self {
        Self {
            name: agent.name.clone(),
            status: agent.status,
            total_executions: agent.total_executions,
            successful_executions: agent.successful_executions,
            failed_executions: agent.failed_executions,
            retry_count: agent.retry_count,
            success_rate: agent.success_rate(),
            last_execution_time: agent.last_execution_time,
        }
    }
}
