//! Runtime settings for the scheduling core.
//!
//! Everything here is a deployment tuning knob, not a hardcoded constant.
//! Settings can be built in code or loaded from a YAML file:
//!
//! ```yaml
//! pool:
//!   defaults:
//!     timeout_ms: 30000
//!     max_retries: 3
//!   rate_limit_max: 10
//!   rate_limit_window_ms: 60000
//! orchestrator:
//!   max_concurrency: 5
//! watch:
//!   document-agent:
//!     - "docs/**/*.md"
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use glob::Pattern;
use serde::{Deserialize, Serialize};

use crate::core::graph::WatchTable;
use crate::domain::AgentConfig;

/// Pool-wide policy: per-agent defaults plus the sliding windows shared by
/// every agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Defaults applied where registration supplies no override
    #[serde(default)]
    pub defaults: AgentConfig,

    /// Completed invocations allowed per agent inside the rate window
    /// before further requests are refused (default: 10)
    #[serde(default = "default_rate_limit_max")]
    pub rate_limit_max: usize,

    /// Trailing window for ordinary rate limiting (default: 60s)
    #[serde(default = "default_rate_limit_window_ms")]
    pub rate_limit_window_ms: u64,

    /// Completions allowed inside the circular-update window; a tighter,
    /// independent threshold meant to catch feedback loops rather than
    /// overload (default: 5)
    #[serde(default = "default_circular_update_threshold")]
    pub circular_update_threshold: usize,

    /// Trailing window for circular-update detection (default: 10s)
    #[serde(default = "default_circular_update_window_ms")]
    pub circular_update_window_ms: u64,

    /// Most-recent execution records retained (default: 100)
    #[serde(default = "default_max_history")]
    pub max_history: usize,
}

fn default_rate_limit_max() -> usize {
    10
}
fn default_rate_limit_window_ms() -> u64 {
    60_000
}
fn default_circular_update_threshold() -> usize {
    5
}
fn default_circular_update_window_ms() -> u64 {
    10_000
}
fn default_max_history() -> usize {
    100
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            defaults: AgentConfig::default(),
            rate_limit_max: default_rate_limit_max(),
            rate_limit_window_ms: default_rate_limit_window_ms(),
            circular_update_threshold: default_circular_update_threshold(),
            circular_update_window_ms: default_circular_update_window_ms(),
            max_history: default_max_history(),
        }
    }
}

/// Orchestrator-level policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    /// Agents allowed in flight at once within a level (default: 5)
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_max_concurrency() -> usize {
    5
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
        }
    }
}

/// Complete configuration for the core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pool: PoolSettings,

    #[serde(default)]
    pub orchestrator: OrchestratorSettings,

    /// Agent name → glob patterns over changed input paths
    #[serde(default)]
    pub watch: WatchTable,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content).context("Failed to parse config YAML")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.pool.rate_limit_window_ms == 0 {
            anyhow::bail!("rate_limit_window_ms must be greater than 0");
        }
        if self.pool.circular_update_window_ms == 0 {
            anyhow::bail!("circular_update_window_ms must be greater than 0");
        }
        if self.pool.max_history == 0 {
            anyhow::bail!("max_history must be at least 1");
        }
        if self.orchestrator.max_concurrency == 0 {
            anyhow::bail!("max_concurrency must be at least 1");
        }

        for (agent, patterns) in &self.watch {
            if agent.is_empty() {
                anyhow::bail!("Watch table contains an empty agent name");
            }
            for pattern in patterns {
                Pattern::new(pattern).with_context(|| {
                    format!("Invalid watch pattern '{}' for agent '{}'", pattern, agent)
                })?;
            }
        }

        Ok(())
    }
}
