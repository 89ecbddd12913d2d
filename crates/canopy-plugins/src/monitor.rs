//! Monitor capability: health queries against a metrics backend.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use canopy_state::PluginStateStore;

use crate::error::{ConfigError, PluginResult};

/// Outcome of one health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckResult {
    /// Every query was within tolerance.
    Success,
    /// The backend answered but a query was out of tolerance.
    Failed,
    /// The backend answered with no data.
    NoMetrics,
    /// The check could not be evaluated.
    Error,
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckResult::Success => f.write_str("success"),
            CheckResult::Failed => f.write_str("failed"),
            CheckResult::NoMetrics => f.write_str("no_metrics"),
            CheckResult::Error => f.write_str("error"),
        }
    }
}

/// What a monitor is constructed to watch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorTarget {
    pub release_name: String,
    /// Namespace from the runtime config.
    pub namespace: String,
    /// Runtime plugin name, so queries can be written per platform.
    pub runtime: String,
}

#[async_trait]
pub trait Monitor: Send + Sync {
    fn configure(
        &mut self,
        config: &serde_json::Value,
        store: Arc<dyn PluginStateStore>,
    ) -> Result<(), ConfigError>;

    /// Evaluate the configured queries for `candidate` over `interval`.
    async fn check(&self, candidate: &str, interval: Duration) -> PluginResult<CheckResult>;
}
