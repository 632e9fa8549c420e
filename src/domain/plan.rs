//! Execution plans and run reports.
//!
//! A plan is transient: it is rebuilt on every orchestration request from
//! the current graph and change set, never persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One level of the plan; agents inside a group have no dependency
/// relation and may run concurrently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanGroup {
    pub level: u32,
    pub agents: Vec<String>,
}

/// The ordered, level-grouped set of agents selected for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Agents selected by the change set (or all agents when none given)
    pub affected_agents: Vec<String>,

    /// Groups ascending by level, restricted to the affected set
    pub groups: Vec<PlanGroup>,

    pub total_agents: usize,
}

/// How one planned agent ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Succeeded,
    Failed,
    /// Not attempted because an upstream dependency failed
    Skipped,
}

/// Per-agent result within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOutcome {
    pub agent: String,
    pub status: OutcomeStatus,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate result of one orchestration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Unique identifier for this run
    pub run_id: Uuid,

    /// True only if every attempted agent succeeded
    pub success: bool,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// Wall-clock duration of the whole run in milliseconds
    pub duration_ms: u64,

    /// Agents that reached a terminal state (success or failure)
    pub agents_executed: usize,

    /// Agents that failed terminally
    pub agents_failed: usize,

    pub results: Vec<AgentOutcome>,
}

impl ExecutionReport {
    /// Look up the outcome for a named agent.
    pub fn outcome(&self, agent: &str) -> Option<&AgentOutcome> {
        self.results.iter().find(|o| o.agent == agent)
    }
}

/// Observability snapshot of the orchestrator.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub is_executing: bool,
    pub currently_running: Vec<String>,
    pub completed_agents: usize,
}
