//! Data structures shared across the scheduling core.

pub mod agent;
pub mod plan;
pub mod record;

pub use agent::{Agent, AgentConfig, AgentOverrides, AgentStats, AgentStatus};
pub use plan::{
    AgentOutcome, ExecutionPlan, ExecutionReport, OrchestratorStatus, OutcomeStatus, PlanGroup,
};
pub use record::{ExecutionHistory, ExecutionRecord};
