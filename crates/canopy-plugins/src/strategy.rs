//! Strategy capability: health outcomes to traffic schedule.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use canopy_state::PluginStateStore;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, PluginResult};

/// Status reported by a strategy after each step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyStatus {
    /// Healthy; traffic should move to the returned percentage.
    #[default]
    #[serde(rename = "strategy_status_progressing")]
    Success,
    /// Checks are failing but the error threshold has not been reached.
    #[serde(rename = "strategy_status_failing")]
    Failing,
    /// The error threshold was reached; roll back.
    #[serde(rename = "strategy_status_failed")]
    Failed,
    /// Traffic reached its maximum; promote.
    #[serde(rename = "strategy_status_complete")]
    Complete,
}

impl StrategyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyStatus::Success => "strategy_status_progressing",
            StrategyStatus::Failing => "strategy_status_failing",
            StrategyStatus::Failed => "strategy_status_failed",
            StrategyStatus::Complete => "strategy_status_complete",
        }
    }
}

impl fmt::Display for StrategyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait Strategy: Send + Sync {
    fn configure(
        &mut self,
        config: &serde_json::Value,
        store: Arc<dyn PluginStateStore>,
    ) -> Result<(), ConfigError>;

    /// Run one step of the strategy against `candidate`, returning the
    /// status and the candidate traffic percentage to apply.
    async fn execute(&self, candidate: &str) -> PluginResult<(StrategyStatus, u32)>;

    /// Current primary traffic share, clamped to 0..=100.
    fn primary_traffic(&self) -> u32;

    /// Current candidate traffic share, clamped to 0..=100.
    fn candidate_traffic(&self) -> u32;
}
