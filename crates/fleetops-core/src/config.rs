//! fleetops.toml configuration parser.
//!
//! Every section is optional; missing fields fall back to defaults.
//!
//! ```toml
//! [retry]
//! initial_interval_ms = 500
//! multiplier = 1.5
//! max_interval_ms = 60000
//! max_attempts = 25
//!
//! [rollback_retry]
//! max_attempts = 10
//!
//! [drain]
//! max_concurrency = 4
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Polling policy for validation and drain loops.
    pub retry: RetryPolicy,
    /// Polling policy for rollback validation. Defaults to `retry` when absent.
    pub rollback_retry: Option<RetryPolicy>,
    pub drain: DrainSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrainSection {
    /// Instances drained at the same time.
    pub max_concurrency: usize,
}

impl Default for DrainSection {
    fn default() -> Self {
        Self { max_concurrency: 8 }
    }
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FleetConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn rollback_retry(&self) -> RetryPolicy {
        self.rollback_retry.clone().unwrap_or_else(|| self.retry.clone())
    }
}
