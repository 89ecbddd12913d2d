//! Releaser capability: service mesh traffic control.

use std::sync::Arc;

use async_trait::async_trait;
use canopy_state::PluginStateStore;

use crate::base::ReleaserBaseConfig;
use crate::error::{ConfigError, PluginResult};

#[async_trait]
pub trait Releaser: Send + Sync {
    fn configure(
        &mut self,
        config: &serde_json::Value,
        store: Arc<dyn PluginStateStore>,
    ) -> Result<(), ConfigError>;

    fn base_config(&self) -> ReleaserBaseConfig;

    /// Create the mesh configuration that routes between the two subsets.
    async fn setup(&self, primary_filter: &str, candidate_filter: &str) -> PluginResult<()>;

    /// Send `candidate_percent` of traffic to the candidate, the rest to the primary.
    async fn scale(&self, candidate_percent: u32) -> PluginResult<()>;

    /// Remove everything `setup` created.
    async fn destroy(&self) -> PluginResult<()>;

    /// Block until every mesh instance matching `filter` passes its health
    /// checks, or fail once the plugin's own deadline passes.
    async fn wait_until_healthy(&self, filter: &str) -> PluginResult<()>;
}
