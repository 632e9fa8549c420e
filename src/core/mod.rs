//! Scheduling core.
//!
//! This module contains:
//! - Clock: injectable time source
//! - DependencyGraph: edges, topological order, levels
//! - AgentPool: agent state, admission policy, execution
//! - Orchestrator: level-ordered execution driver

pub mod clock;
pub mod graph;
pub mod orchestrator;
pub mod pool;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use graph::{DependencyGraph, DependencyNode, GraphError, WatchTable};
pub use orchestrator::{Orchestrator, OrchestratorError};
pub use pool::{Admission, AdmissionReason, AgentPool, PoolError, PoolStats};
