//! canopy.toml daemon configuration.
//!
//! ```toml
//! listen_port = 9443
//! data_dir = "/var/lib/canopy"
//! log_format = "json"
//!
//! [engine]
//! step_delay = "5s"
//! step_timeout = "30m"
//! destroy_timeout = "300s"
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use canopy_engine::EngineSettings;
use canopy_plugins::parse_duration;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub listen_port: u16,
    pub data_dir: PathBuf,
    /// `tracing` filter directive; `RUST_LOG` wins when set.
    pub log_filter: Option<String>,
    pub log_format: LogFormat,
    pub engine: EngineConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen_port: 9443,
            data_dir: PathBuf::from("/var/lib/canopy"),
            log_filter: None,
            log_format: LogFormat::Text,
            engine: EngineConfig::default(),
        }
    }
}

/// Workflow timings as duration strings (`"5s"`, `"1m30s"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub step_delay: String,
    pub step_timeout: String,
    pub destroy_timeout: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_delay: "5s".to_string(),
            step_timeout: "30m".to_string(),
            destroy_timeout: "300s".to_string(),
        }
    }
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: DaemonConfig = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn engine_settings(&self) -> anyhow::Result<EngineSettings> {
        let duration = |field: &str, value: &str| {
            parse_duration(value)
                .with_context(|| format!("invalid engine.{field} duration {value:?}"))
        };

        let settings = EngineSettings {
            step_delay: duration("step_delay", &self.engine.step_delay)?,
            step_timeout: duration("step_timeout", &self.engine.step_timeout)?,
            destroy_timeout: duration("destroy_timeout", &self.engine.destroy_timeout)?,
        };
        if settings.step_timeout.is_zero() {
            bail!("engine.step_timeout must be greater than zero");
        }
        Ok(settings)
    }
}
