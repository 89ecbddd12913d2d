//! Canary configuration.

use std::time::Duration;

use canopy_plugins::{ConfigError, decode_config, parse_duration};
use serde::{Deserialize, Serialize};

const DURATION_HINT: &str = "use duration notation e.g. 30s, 500ms, 5m";

/// Configuration for a canary release, as written in the release's strategy slot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanaryConfig {
    /// Wait before the first traffic split. Defaults to `interval`.
    #[serde(default)]
    pub initial_delay: String,
    /// Wait between health checks.
    #[serde(default)]
    pub interval: String,
    /// Percentage of traffic for the first split; 0 means one `traffic_step`.
    #[serde(default)]
    pub initial_traffic: i32,
    /// Percentage added after every healthy check.
    #[serde(default)]
    pub traffic_step: i32,
    /// Candidate share at which the release is promoted.
    #[serde(default)]
    pub max_traffic: i32,
    /// Consecutive failed checks before rolling back.
    #[serde(default)]
    pub error_threshold: i32,
    #[serde(default)]
    pub delete_canary_on_failed: bool,
    #[serde(default)]
    pub manual_promotion: bool,
}

impl CanaryConfig {
    pub const PLUGIN: &'static str = "canary";

    /// Decode and validate, applying the `initial_delay` default.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, ConfigError> {
        let mut config: CanaryConfig = decode_config(Self::PLUGIN, value)?;
        if config.initial_delay.is_empty() {
            config.initial_delay = config.interval.clone();
        }
        config.validate()?;
        Ok(config)
    }

    /// Check every field, reporting all problems together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if parse_duration(&self.initial_delay).is_none() {
            problems.push(format!(
                "initial_delay {:?} is not a valid duration, {DURATION_HINT}",
                self.initial_delay
            ));
        }
        if parse_duration(&self.interval).is_none() {
            problems.push(format!(
                "interval {:?} is not a valid duration, {DURATION_HINT}",
                self.interval
            ));
        }
        if !(0..=100).contains(&self.initial_traffic) {
            problems.push("initial_traffic must be between 0 and 100".to_string());
        }
        if !(1..=100).contains(&self.traffic_step) {
            problems.push("traffic_step must be between 1 and 100".to_string());
        }
        if !(1..=100).contains(&self.max_traffic) {
            problems.push("max_traffic must be between 1 and 100".to_string());
        }
        if self.error_threshold < 1 {
            problems.push("error_threshold must be greater than 0".to_string());
        }

        ConfigError::check(Self::PLUGIN, problems)
    }

    pub fn initial_delay(&self) -> Duration {
        parse_duration(&self.initial_delay).unwrap_or_default()
    }

    pub fn interval(&self) -> Duration {
        parse_duration(&self.interval).unwrap_or_default()
    }

    /// Candidate share for the first split.
    pub fn first_step(&self) -> i32 {
        if self.initial_traffic == 0 {
            self.traffic_step
        } else {
            self.initial_traffic
        }
    }
}
