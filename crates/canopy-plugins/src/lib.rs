//! canopy-plugins: the capability contracts the release engine drives.
//!
//! The engine never talks to a service mesh, an orchestrator or a metrics
//! backend directly. It sequences calls through six independently swappable
//! capabilities:
//!
//! - **`releaser`**: mesh traffic configuration and splitting
//! - **`runtime`**: primary/candidate workload lifecycle on the platform
//! - **`monitor`**: health queries against a metrics backend
//! - **`strategy`**: turns health outcomes into a traffic schedule
//! - **`post_deployment`**: one-shot functional test gate
//! - **`webhook`**: fire-and-forget notifications
//!
//! Every plugin is configured from opaque JSON plus a [`PluginStateStore`]
//! scoped to its role, and must tolerate being configured with no prior state.
//!
//! [`PluginStateStore`]: canopy_state::PluginStateStore

pub mod base;
pub mod duration;
pub mod error;
pub mod monitor;
pub mod post_deployment;
pub mod releaser;
pub mod runtime;
pub mod strategy;
pub mod webhook;

pub use base::{ReleaserBaseConfig, RuntimeBaseConfig, RuntimeBaseState, decode_config};
pub use duration::parse_duration;
pub use error::{ConfigError, PluginError, PluginResult};
pub use monitor::{CheckResult, Monitor, MonitorTarget};
pub use post_deployment::{PostDeploymentTest, TestTarget};
pub use releaser::Releaser;
pub use runtime::{RUNTIME_VERSION_LABEL, Runtime, RuntimeStatus};
pub use strategy::{Strategy, StrategyStatus};
pub use webhook::{LogWebhook, Webhook, WebhookBaseConfig, WebhookMessage};
