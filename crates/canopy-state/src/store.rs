//! ReleaseStore: redb-backed release persistence for Canopy.
//!
//! Provides CRUD operations over releases and the per-plugin state blobs
//! owned by each release. Releases are JSON-serialized into redb's `&[u8]`
//! value columns; plugin state is stored exactly as the plugin wrote it.
//! Both on-disk and in-memory backends are supported (the latter for tests).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

/// Storage contract consumed by the engine.
pub trait Store: Send + Sync {
    /// Insert or replace a release, keyed by name.
    fn upsert_release(&self, release: &Release) -> StoreResult<()>;

    /// Fetch a release; `ReleaseNotFound` when absent.
    fn get_release(&self, name: &str) -> StoreResult<Release>;

    /// List releases, optionally filtered.
    fn list_releases(&self, options: Option<&ListOptions>) -> StoreResult<Vec<Release>>;

    /// Delete a release and every plugin state it owns. Returns true if it existed.
    fn delete_release(&self, name: &str) -> StoreResult<bool>;

    /// Insert or replace the state blob for one plugin role of a release.
    fn upsert_plugin_state(&self, release: &str, role: PluginRole, data: &[u8])
    -> StoreResult<()>;

    /// Fetch a plugin state blob; `PluginStateNotFound` when absent.
    fn get_plugin_state(&self, release: &str, role: PluginRole) -> StoreResult<Vec<u8>>;
}

fn plugin_state_key(release: &str, role: PluginRole) -> String {
    format!("{release}/{role}")
}

/// Thread-safe release store backed by redb.
#[derive(Clone)]
pub struct ReleaseStore {
    db: Arc<Database>,
}

impl ReleaseStore {
    /// Open (or create) a persistent release store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "release store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory release store.
    pub fn open_in_memory() -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory release store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(RELEASES).map_err(map_err!(Table))?;
        txn.open_table(PLUGIN_STATES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Number of stored plugin state blobs for a release.
    pub fn count_plugin_states(&self, release: &str) -> StoreResult<usize> {
        let prefix = format!("{release}/");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PLUGIN_STATES).map_err(map_err!(Table))?;
        let mut count = 0;
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                count += 1;
            }
        }
        Ok(count)
    }
}

impl Store for ReleaseStore {
    // ── Releases ───────────────────────────────────────────────────

    fn upsert_release(&self, release: &Release) -> StoreResult<()> {
        if release.name.is_empty() {
            return Err(StoreError::InvalidRelease(
                "release name must not be empty".to_string(),
            ));
        }
        // Plugin state keys are `{release}/{role}`.
        if release.name.contains('/') {
            return Err(StoreError::InvalidRelease(format!(
                "release name {:?} must not contain '/'",
                release.name
            )));
        }

        let value = serde_json::to_vec(release).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(RELEASES).map_err(map_err!(Table))?;
            table
                .insert(release.name.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(release = %release.name, state = release.current_state_name(), "release stored");
        Ok(())
    }

    fn get_release(&self, name: &str) -> StoreResult<Release> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RELEASES).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize)),
            None => Err(StoreError::ReleaseNotFound(name.to_string())),
        }
    }

    fn list_releases(&self, options: Option<&ListOptions>) -> StoreResult<Vec<Release>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RELEASES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let release: Release =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if options.is_none_or(|o| o.matches(&release)) {
                results.push(release);
            }
        }
        Ok(results)
    }

    fn delete_release(&self, name: &str) -> StoreResult<bool> {
        let prefix = format!("{name}/");
        let state_keys: Vec<String> = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(PLUGIN_STATES).map_err(map_err!(Table))?;
            let mut keys = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, _) = entry.map_err(map_err!(Read))?;
                if key.value().starts_with(&prefix) {
                    keys.push(key.value().to_string());
                }
            }
            keys
        };

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut releases = txn.open_table(RELEASES).map_err(map_err!(Table))?;
            existed = releases.remove(name).map_err(map_err!(Write))?.is_some();

            let mut states = txn.open_table(PLUGIN_STATES).map_err(map_err!(Table))?;
            for key in &state_keys {
                states.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(release = %name, existed, plugin_states = state_keys.len(), "release deleted");
        Ok(existed)
    }

    // ── Plugin state ───────────────────────────────────────────────

    fn upsert_plugin_state(
        &self,
        release: &str,
        role: PluginRole,
        data: &[u8],
    ) -> StoreResult<()> {
        let key = plugin_state_key(release, role);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(PLUGIN_STATES).map_err(map_err!(Table))?;
            table.insert(key.as_str(), data).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, bytes = data.len(), "plugin state stored");
        Ok(())
    }

    fn get_plugin_state(&self, release: &str, role: PluginRole) -> StoreResult<Vec<u8>> {
        let key = plugin_state_key(release, role);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PLUGIN_STATES).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => Ok(guard.value().to_vec()),
            None => Err(StoreError::PluginStateNotFound {
                release: release.to_string(),
                role,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_release(name: &str, runtime: &str) -> Release {
        Release {
            name: name.to_string(),
            namespace: "default".to_string(),
            version: "1".to_string(),
            releaser: PluginSlot::new("consul", json!({"consul_service": name})),
            runtime: PluginSlot::new(runtime, json!({"deployment": format!("{name}-(.*)")})),
            strategy: PluginSlot::new("canary", json!({"interval": "30s"})),
            monitor: PluginSlot::new("prometheus", json!({})),
            webhooks: vec![],
            post_deployment_test: None,
            state_history: vec![],
        }
    }

    #[test]
    fn release_upsert_and_get() {
        let store = ReleaseStore::open_in_memory().unwrap();
        let mut release = test_release("api", "kubernetes");
        release.update_state(State::Idle);
        store.upsert_release(&release).unwrap();

        let loaded = store.get_release("api").unwrap();
        assert_eq!(loaded, release);
        assert_eq!(loaded.current_state(), Some(State::Idle));
    }

    #[test]
    fn release_get_nonexistent_is_not_found() {
        let store = ReleaseStore::open_in_memory().unwrap();
        let err = store.get_release("missing").unwrap_err();
        assert!(matches!(err, StoreError::ReleaseNotFound(ref n) if n == "missing"));
        assert!(err.is_not_found());
    }

    #[test]
    fn release_upsert_rejects_empty_name() {
        let store = ReleaseStore::open_in_memory().unwrap();
        let release = test_release("", "kubernetes");
        assert!(matches!(
            store.upsert_release(&release),
            Err(StoreError::InvalidRelease(_))
        ));
    }

    #[test]
    fn release_upsert_rejects_slash_in_name() {
        let store = ReleaseStore::open_in_memory().unwrap();
        store
            .upsert_release(&test_release("api", "kubernetes"))
            .unwrap();
        store
            .upsert_plugin_state("api", PluginRole::Runtime, b"{}")
            .unwrap();

        let nested = test_release("api/x", "kubernetes");
        assert!(matches!(
            store.upsert_release(&nested),
            Err(StoreError::InvalidRelease(_))
        ));
        assert!(store.get_release("api/x").unwrap_err().is_not_found());
        assert!(store.get_plugin_state("api", PluginRole::Runtime).is_ok());
    }

    #[test]
    fn release_update_in_place() {
        let store = ReleaseStore::open_in_memory().unwrap();
        let mut release = test_release("api", "kubernetes");
        store.upsert_release(&release).unwrap();

        release.version = "2".to_string();
        store.upsert_release(&release).unwrap();

        assert_eq!(store.get_release("api").unwrap().version, "2");
        assert_eq!(store.list_releases(None).unwrap().len(), 1);
    }

    #[test]
    fn release_list_filters_on_runtime() {
        let store = ReleaseStore::open_in_memory().unwrap();
        store
            .upsert_release(&test_release("api", "kubernetes"))
            .unwrap();
        store
            .upsert_release(&test_release("web", "kubernetes"))
            .unwrap();
        store.upsert_release(&test_release("db", "nomad")).unwrap();

        assert_eq!(store.list_releases(None).unwrap().len(), 3);

        let k8s = store
            .list_releases(Some(&ListOptions::runtime("kubernetes")))
            .unwrap();
        let mut names: Vec<_> = k8s.iter().map(|r| r.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["api", "web"]);
    }

    #[test]
    fn plugin_state_get_absent_is_not_found() {
        let store = ReleaseStore::open_in_memory().unwrap();
        let err = store
            .get_plugin_state("api", PluginRole::Strategy)
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::PluginStateNotFound {
                role: PluginRole::Strategy,
                ..
            }
        ));
    }

    #[test]
    fn plugin_state_is_partitioned_by_role() {
        let store = ReleaseStore::open_in_memory().unwrap();
        store
            .upsert_plugin_state("api", PluginRole::Strategy, b"strategy")
            .unwrap();
        store
            .upsert_plugin_state("api", PluginRole::Runtime, b"runtime")
            .unwrap();
        store
            .upsert_plugin_state("api", PluginRole::Strategy, b"strategy-2")
            .unwrap();

        assert_eq!(
            store.get_plugin_state("api", PluginRole::Strategy).unwrap(),
            b"strategy-2"
        );
        assert_eq!(
            store.get_plugin_state("api", PluginRole::Runtime).unwrap(),
            b"runtime"
        );
    }

    #[test]
    fn delete_release_removes_owned_plugin_states_only() {
        let store = ReleaseStore::open_in_memory().unwrap();
        store
            .upsert_release(&test_release("api", "kubernetes"))
            .unwrap();
        store
            .upsert_plugin_state("api", PluginRole::Strategy, b"{}")
            .unwrap();
        store
            .upsert_plugin_state("api", PluginRole::Runtime, b"{}")
            .unwrap();
        store
            .upsert_plugin_state("api-v2", PluginRole::Runtime, b"{}")
            .unwrap();

        assert!(store.delete_release("api").unwrap());
        assert!(!store.delete_release("api").unwrap());

        assert_eq!(store.count_plugin_states("api").unwrap(), 0);
        assert_eq!(store.count_plugin_states("api-v2").unwrap(), 1);
        assert!(store.get_release("api").unwrap_err().is_not_found());
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("canopy.redb");

        {
            let store = ReleaseStore::open(&path).unwrap();
            let mut release = test_release("api", "kubernetes");
            release.update_state(State::Monitor);
            store.upsert_release(&release).unwrap();
            store
                .upsert_plugin_state("api", PluginRole::Strategy, br#"{"candidate_traffic":30}"#)
                .unwrap();
        }

        let store = ReleaseStore::open(&path).unwrap();
        let release = store.get_release("api").unwrap();
        assert_eq!(release.current_state(), Some(State::Monitor));
        assert_eq!(
            store.get_plugin_state("api", PluginRole::Strategy).unwrap(),
            br#"{"candidate_traffic":30}"#
        );
    }
}
