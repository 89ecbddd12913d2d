//! Per-plugin state handles.
//!
//! Each configured plugin receives a handle scoped to its `(release, role)`
//! pair so it can persist progress without knowing about other plugins.

use std::fmt;
use std::sync::Arc;

use crate::error::StoreResult;
use crate::store::Store;
use crate::types::PluginRole;

/// State persistence as seen by a single plugin.
pub trait PluginStateStore: Send + Sync {
    /// Replace this plugin's state blob.
    fn upsert_state(&self, data: &[u8]) -> StoreResult<()>;

    /// Read this plugin's state blob; `PluginStateNotFound` when never written.
    fn get_state(&self) -> StoreResult<Vec<u8>>;
}

/// A [`PluginStateStore`] bound to one release and role of a shared [`Store`].
#[derive(Clone)]
pub struct PluginStateHandle {
    store: Arc<dyn Store>,
    release: String,
    role: PluginRole,
}

impl PluginStateHandle {
    pub fn new(store: Arc<dyn Store>, release: &str, role: PluginRole) -> Self {
        Self {
            store,
            release: release.to_string(),
            role,
        }
    }

    pub fn role(&self) -> PluginRole {
        self.role
    }
}

impl fmt::Debug for PluginStateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginStateHandle")
            .field("release", &self.release)
            .field("role", &self.role)
            .finish()
    }
}

impl PluginStateStore for PluginStateHandle {
    fn upsert_state(&self, data: &[u8]) -> StoreResult<()> {
        self.store.upsert_plugin_state(&self.release, self.role, data)
    }

    fn get_state(&self) -> StoreResult<Vec<u8>> {
        self.store.get_plugin_state(&self.release, self.role)
    }
}
