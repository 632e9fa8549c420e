//! marshal - dependency-aware agent scheduling core
//!
//! Coordinates many independent, named units of work ("agents") that
//! declare dependencies on one another, must not run unboundedly
//! concurrently, are retried on transient failure, and are protected
//! against runaway re-triggering.
//!
//! # Architecture
//!
//! Three components compose the core, leaves first:
//! - `DependencyGraph` stores edges, orders execution, assigns levels
//! - `AgentPool` owns agent state and enforces invocation policy
//! - `Orchestrator` plans affected agents and drives levels with a
//!   global concurrency cap
//!
//! Data flows one direction: change signals go to the orchestrator, the
//! graph produces a plan, the pool executes it, results come back up.
//! The pool never queries the graph; the graph never executes anything.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use marshal::config::{OrchestratorSettings, PoolSettings};
//! use marshal::core::{AgentPool, DependencyGraph, Orchestrator, SystemClock};
//! use marshal::invoke::invocable;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let pool = Arc::new(AgentPool::new(PoolSettings::default(), Arc::new(SystemClock)));
//! let orch = Orchestrator::new(
//!     DependencyGraph::new(),
//!     pool,
//!     OrchestratorSettings::default(),
//! );
//!
//! orch.register("document-agent", &[] as &[&str], Default::default(),
//!     invocable(|| async { Ok(serde_json::json!({"pages": 12})) }));
//! orch.register("backend-agent", &["document-agent"], Default::default(),
//!     invocable(|| async { Ok(serde_json::json!(null)) }));
//!
//! let report = orch.execute(&[] as &[&str]).await?;
//! assert!(report.success);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod domain;
pub mod invoke;

// Re-export main types at crate root for convenience
pub use config::{Config, OrchestratorSettings, PoolSettings};
pub use core::{
    Admission, AdmissionReason, AgentPool, Clock, DependencyGraph, GraphError, ManualClock,
    Orchestrator, OrchestratorError, PoolError, PoolStats, SystemClock, WatchTable,
};
pub use domain::{
    Agent, AgentConfig, AgentOutcome, AgentOverrides, AgentStats, AgentStatus, ExecutionPlan,
    ExecutionRecord, ExecutionReport, OrchestratorStatus, OutcomeStatus, PlanGroup,
};
pub use invoke::{invocable, Invocable};
