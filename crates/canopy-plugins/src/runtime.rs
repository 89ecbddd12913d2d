//! Runtime capability: primary and candidate workloads on the platform.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use canopy_state::PluginStateStore;
use serde::{Deserialize, Serialize};

use crate::base::{RuntimeBaseConfig, RuntimeBaseState};
use crate::error::{ConfigError, PluginResult};

/// Label set on workloads the engine itself modified, holding their version.
pub const RUNTIME_VERSION_LABEL: &str = "canopy-release-version";

/// Outcome of a runtime operation that may or may not change anything.
///
/// Internal failures are reported as `Err(PluginError)` rather than a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeStatus {
    /// The platform was changed (e.g. a primary clone was created).
    Update,
    /// Nothing needed doing.
    NoAction,
    /// The workload to act on does not exist.
    NotFound,
}

impl fmt::Display for RuntimeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeStatus::Update => f.write_str("update"),
            RuntimeStatus::NoAction => f.write_str("no_action"),
            RuntimeStatus::NotFound => f.write_str("not_found"),
        }
    }
}

#[async_trait]
pub trait Runtime: Send + Sync {
    fn configure(
        &mut self,
        config: &serde_json::Value,
        store: Arc<dyn PluginStateStore>,
    ) -> Result<(), ConfigError>;

    fn base_config(&self) -> RuntimeBaseConfig;

    fn base_state(&self) -> RuntimeBaseState;

    /// Clone the current workload into an engine-owned primary if none exists.
    /// Returns `Update` when a primary was created, `NoAction` otherwise.
    async fn init_primary(&self, release_name: &str) -> PluginResult<RuntimeStatus>;

    /// Copy the candidate over the primary. `NotFound` when there is no candidate.
    async fn promote_candidate(&self) -> PluginResult<RuntimeStatus>;

    async fn remove_candidate(&self) -> PluginResult<()>;

    /// Re-instate the workload that existed before the engine took ownership.
    async fn restore_original(&self) -> PluginResult<()>;

    async fn remove_primary(&self) -> PluginResult<()>;

    /// Mesh subset filter selecting candidate instances.
    fn candidate_subset_filter(&self) -> String;

    /// Mesh subset filter selecting primary instances.
    fn primary_subset_filter(&self) -> String;
}
