//! Base config and state embedded by concrete plugin implementations.
//!
//! Concrete plugins compose these by value (`#[serde(flatten)]`) so the engine
//! and the admission gate can read the common fields without knowing the
//! plugin's full shape.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Fields every runtime plugin's config carries.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeBaseConfig {
    /// Regular expression selecting the deployments that trigger a release.
    #[serde(default, rename = "deployment")]
    pub deployment_selector: String,
    /// Namespace of the triggering deployments.
    #[serde(default)]
    pub namespace: String,
}

/// Fields every runtime plugin's persisted state carries.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeBaseState {
    /// Full name of the active candidate deployment.
    #[serde(default)]
    pub candidate_name: String,
    /// Full name of the primary clone owned by the engine.
    #[serde(default)]
    pub primary_name: String,
}

/// Fields every releaser plugin's config carries.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReleaserBaseConfig {
    /// Mesh service name whose traffic is split.
    #[serde(default, alias = "consul_service")]
    pub service: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub partition: String,
}

/// Decode a plugin's opaque JSON config. A `null` config decodes as `{}`.
pub fn decode_config<T: DeserializeOwned>(
    plugin: &str,
    config: &serde_json::Value,
) -> Result<T, ConfigError> {
    let value = if config.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        config.clone()
    };

    serde_json::from_value(value).map_err(|source| ConfigError::Decode {
        plugin: plugin.to_string(),
        source,
    })
}
