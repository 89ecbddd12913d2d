//! Webhook capability: notifications on workflow outcomes.
//!
//! Sends are fire-and-forget from the engine's point of view. A failed send
//! is logged by the caller and never changes the release's state.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use canopy_state::PluginStateStore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::base::decode_config;
use crate::error::{ConfigError, PluginResult};

/// Notification describing the outcome of one workflow step.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookMessage {
    pub title: String,
    pub name: String,
    pub namespace: String,
    /// Event the step fired.
    pub outcome: String,
    /// State whose work produced the outcome.
    pub state: String,
    pub primary_traffic: u32,
    pub candidate_traffic: u32,
    /// Empty unless the step failed.
    #[serde(default)]
    pub error: String,
}

impl WebhookMessage {
    /// Plain-text rendering for chat and log sinks.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", self.title);
        let _ = writeln!(
            out,
            "Release \"{}\" in namespace \"{}\" changed state to \"{}\".",
            self.name, self.namespace, self.state
        );
        let _ = writeln!(
            out,
            "Primary traffic: {}, candidate traffic: {}.",
            self.primary_traffic, self.candidate_traffic
        );
        if self.error.is_empty() {
            let _ = write!(out, "Outcome: \"{}\".", self.outcome);
        } else {
            let _ = write!(out, "An error occurred when processing: {}", self.error);
        }
        out
    }
}

/// Config shared by all webhooks.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookBaseConfig {
    /// States to notify on; empty means all of them.
    #[serde(default)]
    pub status: Vec<String>,
}

impl WebhookBaseConfig {
    pub fn allows(&self, message: &WebhookMessage) -> bool {
        self.status.is_empty() || self.status.iter().any(|s| *s == message.state)
    }
}

#[async_trait]
pub trait Webhook: Send + Sync {
    fn configure(
        &mut self,
        config: &serde_json::Value,
        store: Arc<dyn PluginStateStore>,
    ) -> Result<(), ConfigError>;

    async fn send(&self, message: &WebhookMessage) -> PluginResult<()>;
}

// ── Log webhook ───────────────────────────────────────────────────

/// Built-in webhook that writes messages to the process log.
#[derive(Debug, Default)]
pub struct LogWebhook {
    config: WebhookBaseConfig,
}

impl LogWebhook {
    pub const NAME: &'static str = "log";

    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Webhook for LogWebhook {
    fn configure(
        &mut self,
        config: &serde_json::Value,
        _store: Arc<dyn PluginStateStore>,
    ) -> Result<(), ConfigError> {
        self.config = decode_config(Self::NAME, config)?;
        Ok(())
    }

    async fn send(&self, message: &WebhookMessage) -> PluginResult<()> {
        if !self.config.allows(message) {
            debug!(
                release = %message.name,
                state = %message.state,
                "webhook message filtered by status"
            );
            return Ok(());
        }

        let text = message.render();
        if message.error.is_empty() {
            info!(release = %message.name, outcome = %message.outcome, "{text}");
        } else {
            warn!(release = %message.name, outcome = %message.outcome, "{text}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_state::{PluginRole, PluginStateHandle, ReleaseStore, Store};
    use serde_json::json;

    fn message(state: &str, error: &str) -> WebhookMessage {
        WebhookMessage {
            title: "New deployment succeeded".to_string(),
            name: "api".to_string(),
            namespace: "default".to_string(),
            outcome: "event_deployed".to_string(),
            state: state.to_string(),
            primary_traffic: 100,
            candidate_traffic: 0,
            error: error.to_string(),
        }
    }

    fn handle() -> Arc<dyn PluginStateStore> {
        let store: Arc<dyn Store> = Arc::new(ReleaseStore::open_in_memory().unwrap());
        Arc::new(PluginStateHandle::new(store, "api", PluginRole::Webhook))
    }

    #[test]
    fn empty_status_allows_everything() {
        let config = WebhookBaseConfig::default();
        assert!(config.allows(&message("state_deploy", "")));
        assert!(config.allows(&message("state_fail", "boom")));
    }

    #[test]
    fn status_filter_matches_state() {
        let config = WebhookBaseConfig {
            status: vec!["state_fail".to_string()],
        };
        assert!(config.allows(&message("state_fail", "boom")));
        assert!(!config.allows(&message("state_deploy", "")));
    }

    #[test]
    fn render_includes_outcome_or_error() {
        let ok = message("state_deploy", "").render();
        assert!(ok.starts_with("New deployment succeeded\n"));
        assert!(ok.contains("Outcome: \"event_deployed\""));

        let failed = message("state_deploy", "primary not healthy").render();
        assert!(failed.contains("An error occurred when processing: primary not healthy"));
        assert!(!failed.contains("Outcome:"));
    }

    #[tokio::test]
    async fn log_webhook_configures_and_sends() {
        let mut webhook = LogWebhook::new();
        webhook
            .configure(&json!({"status": ["state_idle"]}), handle())
            .unwrap();
        assert_eq!(webhook.config.status, vec!["state_idle".to_string()]);

        webhook.send(&message("state_idle", "")).await.unwrap();
        webhook.send(&message("state_deploy", "")).await.unwrap();
    }

    #[test]
    fn log_webhook_rejects_malformed_config() {
        let mut webhook = LogWebhook::new();
        let err = webhook
            .configure(&json!({"status": "state_idle"}), handle())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Decode { .. }));
    }
}
