//! Runtime configuration.
//!
//! Every section has serde defaults, so a partial JSON document (or none at
//! all) yields a usable configuration:
//!
//! ```rust,ignore
//! let config = RuntimeConfig::from_json(r#"{ "scheduler": { "loop_threshold": 4 } }"#)?;
//! let rt = Runtime::with_config(config)?;
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level configuration for a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub scheduler: SchedulerConfig,
    pub offload: OffloadConfig,
    pub list: ListConfig,

    /// Advisory budget for synchronous lifecycle callbacks.
    pub lifecycle_budget_ms: u64,

    /// Number of diagnostics kept before the oldest are dropped.
    pub diagnostics_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            offload: OffloadConfig::default(),
            list: ListConfig::default(),
            lifecycle_budget_ms: 4,
            diagnostics_capacity: 256,
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.loop_threshold == 0 {
            return Err(ConfigError::Invalid {
                field: "scheduler.loop_threshold",
                reason: "must be at least 1",
            });
        }
        if self.offload.workers == 0 {
            return Err(ConfigError::Invalid {
                field: "offload.workers",
                reason: "must be at least 1",
            });
        }
        if self.diagnostics_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "diagnostics_capacity",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }

    pub fn lifecycle_budget(&self) -> Duration {
        Duration::from_millis(self.lifecycle_budget_ms)
    }
}

/// Render scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Consecutive self-sustained re-marks tolerated before a node is
    /// suspended with a render loop error.
    pub loop_threshold: u32,

    /// Frame budget used by [`Runtime::tick_default`](crate::Runtime::tick_default).
    pub default_budget_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            loop_threshold: 16,
            default_budget_ms: 16,
        }
    }
}

impl SchedulerConfig {
    pub fn default_budget(&self) -> Duration {
        Duration::from_millis(self.default_budget_ms)
    }
}

/// Task offload pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OffloadConfig {
    /// Number of worker threads, started on first submit.
    pub workers: usize,
}

impl Default for OffloadConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get().min(4))
            .unwrap_or(2);
        Self { workers }
    }
}

/// Defaults for windowed lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListConfig {
    /// Rows materialized beyond each edge of the visible range.
    pub overscan: usize,

    /// Pooled render resources kept per template.
    pub pool_capacity: usize,
}

impl Default for ListConfig {
    fn default() -> Self {
        Self {
            overscan: 5,
            pool_capacity: 64,
        }
    }
}
