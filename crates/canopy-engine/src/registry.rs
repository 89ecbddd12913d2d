//! Plugin registry: maps configured plugin names to constructors.
//!
//! A release names one plugin per capability. The registry looks each name
//! up, constructs the plugin with the collaborators it needs, and configures
//! it with its own state handle before anything is shared.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use canopy_plugins::{
    LogWebhook, Monitor, MonitorTarget, PostDeploymentTest, Releaser, Runtime, Strategy,
    TestTarget, Webhook,
};
use canopy_rollout::CanaryStrategy;
use canopy_state::{PluginRole, PluginStateHandle, PluginStateStore, Release, Store};
use tracing::debug;

use crate::error::{EngineError, EngineResult};

pub type ReleaserFactory = Arc<dyn Fn() -> Box<dyn Releaser> + Send + Sync>;
pub type RuntimeFactory = Arc<dyn Fn() -> Box<dyn Runtime> + Send + Sync>;
pub type MonitorFactory = Arc<dyn Fn(&MonitorTarget) -> Box<dyn Monitor> + Send + Sync>;
pub type StrategyFactory = Arc<dyn Fn(Arc<dyn Monitor>) -> Box<dyn Strategy> + Send + Sync>;
pub type WebhookFactory = Arc<dyn Fn() -> Box<dyn Webhook> + Send + Sync>;
pub type TestFactory =
    Arc<dyn Fn(&TestTarget, Arc<dyn Monitor>) -> Box<dyn PostDeploymentTest> + Send + Sync>;

/// The configured plugins driving one release.
#[derive(Clone)]
pub struct PluginSet {
    pub releaser: Arc<dyn Releaser>,
    pub runtime: Arc<dyn Runtime>,
    pub monitor: Arc<dyn Monitor>,
    pub strategy: Arc<dyn Strategy>,
    pub webhooks: Vec<Arc<dyn Webhook>>,
    pub test: Option<Arc<dyn PostDeploymentTest>>,
}

/// Name → constructor maps, one per capability.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    releasers: HashMap<String, ReleaserFactory>,
    runtimes: HashMap<String, RuntimeFactory>,
    monitors: HashMap<String, MonitorFactory>,
    strategies: HashMap<String, StrategyFactory>,
    webhooks: HashMap<String, WebhookFactory>,
    tests: HashMap<String, TestFactory>,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn names<V>(map: &HashMap<String, V>) -> Vec<&str> {
            let mut names: Vec<_> = map.keys().map(String::as_str).collect();
            names.sort();
            names
        }

        f.debug_struct("PluginRegistry")
            .field("releasers", &names(&self.releasers))
            .field("runtimes", &names(&self.runtimes))
            .field("monitors", &names(&self.monitors))
            .field("strategies", &names(&self.strategies))
            .field("webhooks", &names(&self.webhooks))
            .field("tests", &names(&self.tests))
            .finish()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the plugins that ship with Canopy: the `canary` strategy
    /// and the `log` webhook.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .register_strategy(CanaryStrategy::NAME, |monitor| {
                Box::new(CanaryStrategy::new(monitor))
            })
            .register_webhook(LogWebhook::NAME, || Box::new(LogWebhook::new()));
        registry
    }

    // ── Registration ───────────────────────────────────────────────

    pub fn register_releaser(
        &mut self,
        name: &str,
        factory: impl Fn() -> Box<dyn Releaser> + Send + Sync + 'static,
    ) -> &mut Self {
        self.releasers.insert(name.to_string(), Arc::new(factory));
        self
    }

    pub fn register_runtime(
        &mut self,
        name: &str,
        factory: impl Fn() -> Box<dyn Runtime> + Send + Sync + 'static,
    ) -> &mut Self {
        self.runtimes.insert(name.to_string(), Arc::new(factory));
        self
    }

    pub fn register_monitor(
        &mut self,
        name: &str,
        factory: impl Fn(&MonitorTarget) -> Box<dyn Monitor> + Send + Sync + 'static,
    ) -> &mut Self {
        self.monitors.insert(name.to_string(), Arc::new(factory));
        self
    }

    pub fn register_strategy(
        &mut self,
        name: &str,
        factory: impl Fn(Arc<dyn Monitor>) -> Box<dyn Strategy> + Send + Sync + 'static,
    ) -> &mut Self {
        self.strategies.insert(name.to_string(), Arc::new(factory));
        self
    }

    pub fn register_webhook(
        &mut self,
        name: &str,
        factory: impl Fn() -> Box<dyn Webhook> + Send + Sync + 'static,
    ) -> &mut Self {
        self.webhooks.insert(name.to_string(), Arc::new(factory));
        self
    }

    pub fn register_test(
        &mut self,
        name: &str,
        factory: impl Fn(&TestTarget, Arc<dyn Monitor>) -> Box<dyn PostDeploymentTest>
        + Send
        + Sync
        + 'static,
    ) -> &mut Self {
        self.tests.insert(name.to_string(), Arc::new(factory));
        self
    }

    /// Required capabilities with no plugin registered. Every release needs
    /// a releaser, a runtime, a monitor and a strategy.
    pub fn missing_capabilities(&self) -> Vec<PluginRole> {
        [
            (PluginRole::Releaser, self.releasers.is_empty()),
            (PluginRole::Runtime, self.runtimes.is_empty()),
            (PluginRole::Monitor, self.monitors.is_empty()),
            (PluginRole::Strategy, self.strategies.is_empty()),
        ]
        .into_iter()
        .filter_map(|(role, missing)| missing.then_some(role))
        .collect()
    }

    // ── Construction ───────────────────────────────────────────────

    /// Construct and configure every plugin a release names.
    ///
    /// Order: releaser, runtime, monitor, strategy, webhooks, post-deployment
    /// test. The first unknown name or configuration error aborts.
    pub fn build(&self, release: &Release, store: Arc<dyn Store>) -> EngineResult<PluginSet> {
        let handle = |role: PluginRole| -> Arc<dyn PluginStateStore> {
            Arc::new(PluginStateHandle::new(store.clone(), &release.name, role))
        };

        let factory = lookup(&self.releasers, PluginRole::Releaser, &release.releaser.plugin_name)?;
        let mut releaser = factory();
        releaser.configure(&release.releaser.config, handle(PluginRole::Releaser))?;
        let releaser_config = releaser.base_config();

        let factory = lookup(&self.runtimes, PluginRole::Runtime, &release.runtime.plugin_name)?;
        let mut runtime = factory();
        runtime.configure(&release.runtime.config, handle(PluginRole::Runtime))?;
        let runtime_config = runtime.base_config();

        let target = MonitorTarget {
            release_name: release.name.clone(),
            namespace: runtime_config.namespace,
            runtime: release.runtime.plugin_name.clone(),
        };
        let factory = lookup(&self.monitors, PluginRole::Monitor, &release.monitor.plugin_name)?;
        let mut monitor = factory(&target);
        monitor.configure(&release.monitor.config, handle(PluginRole::Monitor))?;
        let monitor: Arc<dyn Monitor> = Arc::from(monitor);

        let factory = lookup(&self.strategies, PluginRole::Strategy, &release.strategy.plugin_name)?;
        let mut strategy = factory(monitor.clone());
        strategy.configure(&release.strategy.config, handle(PluginRole::Strategy))?;

        let mut webhooks: Vec<Arc<dyn Webhook>> = Vec::with_capacity(release.webhooks.len());
        for slot in &release.webhooks {
            let factory = lookup(&self.webhooks, PluginRole::Webhook, &slot.plugin_name)?;
            let mut webhook = factory();
            webhook.configure(&slot.config, handle(PluginRole::Webhook))?;
            webhooks.push(Arc::from(webhook));
        }

        let test = match &release.post_deployment_test {
            Some(slot) => {
                let target = TestTarget {
                    service: releaser_config.service,
                    namespace: releaser_config.namespace,
                    runtime: release.runtime.plugin_name.clone(),
                };
                let factory = lookup(&self.tests, PluginRole::Test, &slot.plugin_name)?;
                let mut test = factory(&target, monitor.clone());
                test.configure(&slot.config, handle(PluginRole::Test))?;
                Some(Arc::from(test))
            }
            None => None,
        };

        debug!(
            release = %release.name,
            releaser = %release.releaser.plugin_name,
            runtime = %release.runtime.plugin_name,
            monitor = %release.monitor.plugin_name,
            strategy = %release.strategy.plugin_name,
            webhooks = webhooks.len(),
            "plugins configured"
        );

        Ok(PluginSet {
            releaser: Arc::from(releaser),
            runtime: Arc::from(runtime),
            monitor,
            strategy: Arc::from(strategy),
            webhooks,
            test,
        })
    }
}

fn lookup<'a, F>(
    factories: &'a HashMap<String, F>,
    role: PluginRole,
    name: &str,
) -> EngineResult<&'a F> {
    factories.get(name).ok_or_else(|| EngineError::PluginNotFound {
        role,
        name: name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockState, mock_registry, mock_release};
    use canopy_plugins::ConfigError;
    use canopy_state::{PluginSlot, ReleaseStore};
    use serde_json::json;

    fn store() -> Arc<dyn Store> {
        Arc::new(ReleaseStore::open_in_memory().unwrap())
    }

    #[test]
    fn builtins_are_registered() {
        let registry = PluginRegistry::with_builtins();
        assert!(registry.strategies.contains_key("canary"));
        assert!(registry.webhooks.contains_key("log"));
        assert!(registry.releasers.is_empty());
        assert_eq!(
            registry.missing_capabilities(),
            vec![PluginRole::Releaser, PluginRole::Runtime, PluginRole::Monitor]
        );
        assert!(mock_registry(&MockState::new()).missing_capabilities().is_empty());
    }

    #[test]
    fn builds_every_slot() {
        let mocks = MockState::new();
        let registry = mock_registry(&mocks);
        let mut release = mock_release("api");
        release.post_deployment_test = Some(PluginSlot::new("mock", json!({})));
        release.webhooks.push(PluginSlot::new("log", json!({})));

        let plugins = registry.build(&release, store()).unwrap();
        assert_eq!(plugins.webhooks.len(), 2);
        assert!(plugins.test.is_some());
        assert_eq!(plugins.runtime.base_config().deployment_selector, "api");
    }

    #[test]
    fn monitor_target_comes_from_runtime_config() {
        let mocks = MockState::new();
        let registry = mock_registry(&mocks);
        let mut release = mock_release("api");
        release.runtime.config = json!({"deployment": "api-(.*)", "namespace": "shop"});

        registry.build(&release, store()).unwrap();
        let target = mocks.monitor_target().unwrap();
        assert_eq!(target.release_name, "api");
        assert_eq!(target.namespace, "shop");
        assert_eq!(target.runtime, "mock");
    }

    #[test]
    fn unknown_plugin_is_reported_with_role() {
        let mocks = MockState::new();
        let registry = mock_registry(&mocks);
        let mut release = mock_release("api");
        release.monitor.plugin_name = "datadog".to_string();

        let err = registry.build(&release, store()).err().unwrap();
        assert!(matches!(
            err,
            EngineError::PluginNotFound { role: PluginRole::Monitor, ref name } if name == "datadog"
        ));
    }

    #[test]
    fn strategy_config_errors_abort_build() {
        let mocks = MockState::new();
        let registry = mock_registry(&mocks);
        let mut release = mock_release("api");
        release.strategy = PluginSlot::new("canary", json!({"interval": "nope"}));

        let err = registry.build(&release, store()).err().unwrap();
        assert!(matches!(err, EngineError::Config(ConfigError::Invalid { .. })));
    }
}
