//! Execution history: a bounded, append-only log of completed invocations.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one top-level invocation (success or terminal failure).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Agent that ran
    pub agent: String,

    /// When the invocation started
    pub start_time: DateTime<Utc>,

    /// Total invocation duration in milliseconds, retries included
    pub duration_ms: u64,

    /// Whether the invocation succeeded
    pub success: bool,

    /// Final error for terminal failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// FIFO-bounded record log.
///
/// Appends beyond the cap evict the oldest records immediately, so the log
/// never holds more than `cap` entries between calls.
#[derive(Debug)]
pub struct ExecutionHistory {
    records: VecDeque<ExecutionRecord>,
    cap: usize,
}

impl ExecutionHistory {
    /// Create a history bounded to `cap` records.
    pub fn new(cap: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(cap.min(128)),
            cap,
        }
    }

    /// Append a record, evicting oldest entries past the cap.
    pub fn push(&mut self, record: ExecutionRecord) {
        self.records.push_back(record);
        while self.records.len() > self.cap {
            self.records.pop_front();
        }
    }

    /// Remove every record belonging to the named agent.
    pub fn purge_agent(&mut self, name: &str) {
        self.records.retain(|r| r.agent != name);
    }

    /// Drop all records.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Snapshot of the current records, oldest first.
    pub fn snapshot(&self) -> Vec<ExecutionRecord> {
        self.records.iter().cloned().collect()
    }
}
