//! Error types shared by all plugins.

use std::time::Duration;

use canopy_state::StoreError;
use thiserror::Error;

/// Result type alias for plugin step operations.
pub type PluginResult<T> = Result<T, PluginError>;

/// Failure of a plugin step during a release workflow.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("{0}")]
    Failed(String),

    #[error("not healthy: {0}")]
    NotHealthy(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Invalid plugin configuration, surfaced synchronously when a plugin is configured.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to decode {plugin} config: {source}")]
    Decode {
        plugin: String,
        #[source]
        source: serde_json::Error,
    },

    /// Every problem found, not just the first.
    #[error("invalid {plugin} config:\n{}", .problems.join("\n"))]
    Invalid {
        plugin: String,
        problems: Vec<String>,
    },
}

impl ConfigError {
    /// `Ok(())` when `problems` is empty, otherwise an `Invalid` listing all of them.
    pub fn check(plugin: &str, problems: Vec<String>) -> Result<(), ConfigError> {
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid {
                plugin: plugin.to_string(),
                problems,
            })
        }
    }
}
