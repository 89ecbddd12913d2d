//! Provider: owns the plugin registry and the live state machines.
//!
//! Machines are keyed by `name-namespace` and created lazily from the
//! release definition. Creating a machine builds and configures its plugins,
//! so a bad plugin configuration surfaces here.
//!
//! Anything that rebuilds a machine or fires an event from outside the
//! workflow (submit, destroy, admission) holds [`Provider::lock_releases`]
//! across its check-and-act section.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use canopy_state::{Release, Store};
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::MutexGuard as AsyncMutexGuard;
use tracing::debug;

use crate::error::EngineResult;
use crate::machine::StateMachine;
use crate::metrics::EngineMetrics;
use crate::registry::PluginRegistry;
use crate::settings::EngineSettings;

pub struct Provider {
    registry: PluginRegistry,
    store: Arc<dyn Store>,
    metrics: Arc<EngineMetrics>,
    settings: EngineSettings,
    machines: Mutex<HashMap<String, StateMachine>>,
    releases: AsyncMutex<()>,
}

impl Provider {
    pub fn new(registry: PluginRegistry, store: Arc<dyn Store>, settings: EngineSettings) -> Self {
        Self {
            registry,
            store,
            metrics: Arc::new(EngineMetrics::new()),
            settings,
            machines: Mutex::new(HashMap::new()),
            releases: AsyncMutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, StateMachine>> {
        self.machines.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return the machine for `release`, creating it if none is live.
    pub fn get_state_machine(&self, release: &Release) -> EngineResult<StateMachine> {
        let key = release.registry_key();
        let mut machines = self.lock();
        if let Some(sm) = machines.get(&key) {
            return Ok(sm.clone());
        }

        let plugins = self.registry.build(release, self.store.clone())?;
        let sm = StateMachine::new(
            release.clone(),
            plugins,
            self.store.clone(),
            self.metrics.clone(),
            self.settings,
        );
        debug!(release = %release.name, %key, "state machine registered");
        machines.insert(key, sm.clone());
        Ok(sm)
    }

    /// Serialize release operations that decide on a machine's state and
    /// then act on it.
    pub async fn lock_releases(&self) -> AsyncMutexGuard<'_, ()> {
        self.releases.lock().await
    }

    /// The live machine for `release`, without creating one.
    pub fn live_state_machine(&self, release: &Release) -> Option<StateMachine> {
        self.lock().get(&release.registry_key()).cloned()
    }

    /// Forget the machine for `release`. Returns whether one was live.
    pub fn delete_state_machine(&self, release: &Release) -> bool {
        let removed = self.lock().remove(&release.registry_key()).is_some();
        if removed {
            debug!(release = %release.name, "state machine removed");
        }
        removed
    }

    pub fn has_state_machine(&self, release: &Release) -> bool {
        self.lock().contains_key(&release.registry_key())
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::testing::{MockState, fast_settings, mock_registry, mock_release};
    use canopy_state::{ReleaseStore, State};

    fn provider() -> Provider {
        let store: Arc<dyn Store> = Arc::new(ReleaseStore::open_in_memory().unwrap());
        Provider::new(mock_registry(&MockState::new()), store, fast_settings())
    }

    #[test]
    fn machines_are_cached_per_release() {
        let provider = provider();
        let release = mock_release("api");

        let first = provider.get_state_machine(&release).unwrap();
        let mut later = release.clone();
        later.update_state(State::Idle);
        let second = provider.get_state_machine(&later).unwrap();

        // The cached machine is returned; the newer history is ignored.
        assert_eq!(first.current_state(), State::Start);
        assert_eq!(second.current_state(), State::Start);
        assert!(provider.has_state_machine(&release));
    }

    #[test]
    fn live_state_machine_never_builds() {
        let provider = provider();
        let release = mock_release("api");
        assert!(provider.live_state_machine(&release).is_none());

        provider.get_state_machine(&release).unwrap();
        assert!(provider.live_state_machine(&release).is_some());
    }

    #[tokio::test]
    async fn release_lock_is_exclusive() {
        let provider = provider();
        let guard = provider.lock_releases().await;
        assert!(provider.releases.try_lock().is_err());
        drop(guard);
        assert!(provider.releases.try_lock().is_ok());
    }

    #[test]
    fn namespaces_get_separate_machines() {
        let provider = provider();
        let release = mock_release("api");
        let mut other = mock_release("api");
        other.namespace = "staging".to_string();
        other.update_state(State::Idle);

        provider.get_state_machine(&release).unwrap();
        let sm = provider.get_state_machine(&other).unwrap();
        assert_eq!(sm.current_state(), State::Idle);
    }

    #[test]
    fn delete_then_get_builds_fresh_machine() {
        let provider = provider();
        let mut release = mock_release("api");
        provider.get_state_machine(&release).unwrap();

        assert!(provider.delete_state_machine(&release));
        assert!(!provider.delete_state_machine(&release));

        release.update_state(State::Fail);
        let sm = provider.get_state_machine(&release).unwrap();
        assert_eq!(sm.current_state(), State::Fail);
    }

    #[test]
    fn plugin_errors_are_not_cached() {
        let provider = provider();
        let mut release = mock_release("api");
        release.releaser.plugin_name = "nginx".to_string();

        let err = provider.get_state_machine(&release).err().unwrap();
        assert!(matches!(err, EngineError::PluginNotFound { .. }));
        assert!(!provider.has_state_machine(&release));
    }
}
