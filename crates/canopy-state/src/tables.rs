//! redb table definitions for the Canopy release store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON for releases, opaque
//! plugin-defined bytes for plugin state).

use redb::TableDefinition;

/// Releases keyed by `{name}`.
pub const RELEASES: TableDefinition<&str, &[u8]> = TableDefinition::new("releases");

/// Plugin state blobs keyed by `{release}/{role}`.
pub const PLUGIN_STATES: TableDefinition<&str, &[u8]> = TableDefinition::new("plugin_states");
