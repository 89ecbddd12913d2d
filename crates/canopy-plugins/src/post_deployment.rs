//! Post-deployment test capability: a functional gate run once before the strategy loop.

use std::sync::Arc;

use async_trait::async_trait;
use canopy_state::PluginStateStore;

use crate::error::{ConfigError, PluginResult};

/// What a post-deployment test is constructed to exercise.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestTarget {
    /// Mesh service name from the releaser config.
    pub service: String,
    /// Namespace from the releaser config.
    pub namespace: String,
    pub runtime: String,
}

#[async_trait]
pub trait PostDeploymentTest: Send + Sync {
    fn configure(
        &mut self,
        config: &serde_json::Value,
        store: Arc<dyn PluginStateStore>,
    ) -> Result<(), ConfigError>;

    /// Run the tests against `candidate`; an error fails the gate.
    async fn execute(&self, candidate: &str) -> PluginResult<()>;
}
