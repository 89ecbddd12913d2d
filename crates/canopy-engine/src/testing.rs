//! Recording mock plugins for engine and API tests.
//!
//! Every mock registered by [`mock_registry`] shares one [`MockState`], which
//! records the calls made (`"releaser.scale(40)"`), the webhook messages
//! sent and the monitor target, and lets a test inject failures by method
//! name (`"runtime.init_primary"`).

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use canopy_plugins::{
    CheckResult, ConfigError, Monitor, MonitorTarget, PluginError, PluginResult,
    PostDeploymentTest, Releaser, ReleaserBaseConfig, Runtime, RuntimeBaseConfig,
    RuntimeBaseState, RuntimeStatus, Strategy, StrategyStatus, Webhook, WebhookMessage,
    decode_config,
};
use canopy_state::{PluginSlot, PluginStateStore, Release};
use serde_json::json;

use crate::registry::PluginRegistry;
use crate::settings::EngineSettings;

/// Name every mock plugin is registered under.
pub const MOCK: &str = "mock";

struct MockInner {
    calls: Vec<String>,
    failures: HashSet<String>,
    init_primary: RuntimeStatus,
    promote: RuntimeStatus,
    strategy_script: VecDeque<(StrategyStatus, u32)>,
    candidate_traffic: u32,
    messages: Vec<WebhookMessage>,
    monitor_target: Option<MonitorTarget>,
}

/// Shared recorder behind every mock plugin.
pub struct MockState {
    inner: Mutex<MockInner>,
}

impl MockState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(MockInner {
                calls: Vec::new(),
                failures: HashSet::new(),
                init_primary: RuntimeStatus::NoAction,
                promote: RuntimeStatus::Update,
                strategy_script: VecDeque::new(),
                candidate_traffic: 0,
                messages: Vec::new(),
                monitor_target: None,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, MockInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every recorded call, in order.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of recorded calls equal to `call`.
    pub fn count(&self, call: &str) -> usize {
        self.lock().calls.iter().filter(|c| *c == call).count()
    }

    /// Status returned by `runtime.init_primary`.
    pub fn set_init_primary(&self, status: RuntimeStatus) {
        self.lock().init_primary = status;
    }

    /// Status returned by `runtime.promote_candidate`.
    pub fn set_promote_status(&self, status: RuntimeStatus) {
        self.lock().promote = status;
    }

    /// Queue results for `strategy.execute`. With the queue empty, `execute`
    /// never returns.
    pub fn script_strategy(&self, results: impl IntoIterator<Item = (StrategyStatus, u32)>) {
        self.lock().strategy_script.extend(results);
    }

    /// Make every call to `method` (e.g. `"releaser.scale"`) fail.
    pub fn fail_on(&self, method: &str) {
        self.lock().failures.insert(method.to_string());
    }

    /// Webhook messages received, in order.
    pub fn messages(&self) -> Vec<WebhookMessage> {
        self.lock().messages.clone()
    }

    /// Target the last mock monitor was built for.
    pub fn monitor_target(&self) -> Option<MonitorTarget> {
        self.lock().monitor_target.clone()
    }

    fn record(&self, method: &str, call: String) -> PluginResult<()> {
        let mut inner = self.lock();
        inner.calls.push(call);
        if inner.failures.contains(method) {
            return Err(PluginError::Failed(format!("{method} failed")));
        }
        Ok(())
    }

    fn record_plain(&self, method: &str) -> PluginResult<()> {
        self.record(method, method.to_string())
    }
}

/// Registry with the built-ins plus a mock for every capability.
pub fn mock_registry(state: &Arc<MockState>) -> PluginRegistry {
    let mut registry = PluginRegistry::with_builtins();

    let s = state.clone();
    registry.register_releaser(MOCK, move || {
        Box::new(MockReleaser {
            state: s.clone(),
            config: ReleaserBaseConfig::default(),
        })
    });

    let s = state.clone();
    registry.register_runtime(MOCK, move || {
        Box::new(MockRuntime {
            state: s.clone(),
            config: RuntimeBaseConfig::default(),
            store: None,
        })
    });

    let s = state.clone();
    registry.register_monitor(MOCK, move |target| {
        s.lock().monitor_target = Some(target.clone());
        Box::new(MockMonitor)
    });

    let s = state.clone();
    registry.register_strategy(MOCK, move |_monitor| Box::new(MockStrategy { state: s.clone() }));

    let s = state.clone();
    registry.register_webhook(MOCK, move || Box::new(MockWebhook { state: s.clone() }));

    let s = state.clone();
    registry.register_test(MOCK, move |_target, _monitor| Box::new(MockTest { state: s.clone() }));

    registry
}

/// A release wired entirely to mocks, whose runtime selects deployments
/// matching `name` exactly.
pub fn mock_release(name: &str) -> Release {
    Release {
        name: name.to_string(),
        namespace: "default".to_string(),
        version: "1".to_string(),
        releaser: PluginSlot::new(MOCK, json!({"service": name})),
        runtime: PluginSlot::new(MOCK, json!({"deployment": name, "namespace": "default"})),
        strategy: PluginSlot::new(MOCK, json!({})),
        monitor: PluginSlot::new(MOCK, json!({})),
        webhooks: vec![PluginSlot::new(MOCK, json!({}))],
        post_deployment_test: None,
        state_history: Vec::new(),
    }
}

/// Settings with millisecond delays.
pub fn fast_settings() -> EngineSettings {
    EngineSettings {
        step_delay: Duration::from_millis(1),
        destroy_timeout: Duration::from_secs(5),
        ..EngineSettings::default()
    }
}

// ── Mocks ──────────────────────────────────────────────────────────

struct MockReleaser {
    state: Arc<MockState>,
    config: ReleaserBaseConfig,
}

#[async_trait]
impl Releaser for MockReleaser {
    fn configure(
        &mut self,
        config: &serde_json::Value,
        _store: Arc<dyn PluginStateStore>,
    ) -> Result<(), ConfigError> {
        self.config = decode_config(MOCK, config)?;
        Ok(())
    }

    fn base_config(&self) -> ReleaserBaseConfig {
        self.config.clone()
    }

    async fn setup(&self, _primary_filter: &str, _candidate_filter: &str) -> PluginResult<()> {
        self.state.record_plain("releaser.setup")
    }

    async fn scale(&self, candidate_percent: u32) -> PluginResult<()> {
        self.state
            .record("releaser.scale", format!("releaser.scale({candidate_percent})"))
    }

    async fn destroy(&self) -> PluginResult<()> {
        self.state.record_plain("releaser.destroy")
    }

    async fn wait_until_healthy(&self, filter: &str) -> PluginResult<()> {
        self.state.record(
            "releaser.wait_until_healthy",
            format!("releaser.wait_until_healthy({filter})"),
        )
    }
}

struct MockRuntime {
    state: Arc<MockState>,
    config: RuntimeBaseConfig,
    store: Option<Arc<dyn PluginStateStore>>,
}

#[async_trait]
impl Runtime for MockRuntime {
    fn configure(
        &mut self,
        config: &serde_json::Value,
        store: Arc<dyn PluginStateStore>,
    ) -> Result<(), ConfigError> {
        self.config = decode_config(MOCK, config)?;
        self.store = Some(store);
        Ok(())
    }

    fn base_config(&self) -> RuntimeBaseConfig {
        self.config.clone()
    }

    fn base_state(&self) -> RuntimeBaseState {
        self.store
            .as_ref()
            .and_then(|store| store.get_state().ok())
            .and_then(|data| serde_json::from_slice(&data).ok())
            .unwrap_or_default()
    }

    async fn init_primary(&self, _release_name: &str) -> PluginResult<RuntimeStatus> {
        self.state.record_plain("runtime.init_primary")?;
        Ok(self.state.lock().init_primary)
    }

    async fn promote_candidate(&self) -> PluginResult<RuntimeStatus> {
        self.state.record_plain("runtime.promote_candidate")?;
        Ok(self.state.lock().promote)
    }

    async fn remove_candidate(&self) -> PluginResult<()> {
        self.state.record_plain("runtime.remove_candidate")
    }

    async fn restore_original(&self) -> PluginResult<()> {
        self.state.record_plain("runtime.restore_original")
    }

    async fn remove_primary(&self) -> PluginResult<()> {
        self.state.record_plain("runtime.remove_primary")
    }

    fn candidate_subset_filter(&self) -> String {
        "candidate".to_string()
    }

    fn primary_subset_filter(&self) -> String {
        "primary".to_string()
    }
}

struct MockMonitor;

#[async_trait]
impl Monitor for MockMonitor {
    fn configure(
        &mut self,
        _config: &serde_json::Value,
        _store: Arc<dyn PluginStateStore>,
    ) -> Result<(), ConfigError> {
        Ok(())
    }

    async fn check(&self, _candidate: &str, _interval: Duration) -> PluginResult<CheckResult> {
        Ok(CheckResult::Success)
    }
}

struct MockStrategy {
    state: Arc<MockState>,
}

#[async_trait]
impl Strategy for MockStrategy {
    fn configure(
        &mut self,
        _config: &serde_json::Value,
        _store: Arc<dyn PluginStateStore>,
    ) -> Result<(), ConfigError> {
        Ok(())
    }

    async fn execute(&self, _candidate: &str) -> PluginResult<(StrategyStatus, u32)> {
        self.state.record_plain("strategy.execute")?;

        let next = {
            let mut inner = self.state.lock();
            let next = inner.strategy_script.pop_front();
            if let Some((_, traffic)) = next {
                inner.candidate_traffic = traffic;
            }
            next
        };

        match next {
            Some(result) => Ok(result),
            None => std::future::pending().await,
        }
    }

    fn primary_traffic(&self) -> u32 {
        100 - self.candidate_traffic()
    }

    fn candidate_traffic(&self) -> u32 {
        self.state.lock().candidate_traffic.min(100)
    }
}

struct MockWebhook {
    state: Arc<MockState>,
}

#[async_trait]
impl Webhook for MockWebhook {
    fn configure(
        &mut self,
        _config: &serde_json::Value,
        _store: Arc<dyn PluginStateStore>,
    ) -> Result<(), ConfigError> {
        Ok(())
    }

    async fn send(&self, message: &WebhookMessage) -> PluginResult<()> {
        self.state.lock().messages.push(message.clone());
        Ok(())
    }
}

struct MockTest {
    state: Arc<MockState>,
}

#[async_trait]
impl PostDeploymentTest for MockTest {
    fn configure(
        &mut self,
        _config: &serde_json::Value,
        _store: Arc<dyn PluginStateStore>,
    ) -> Result<(), ConfigError> {
        Ok(())
    }

    async fn execute(&self, _candidate: &str) -> PluginResult<()> {
        self.state.record_plain("test.execute")
    }
}
