//! canopy-state: release model and persistence for Canopy.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for releases and the opaque per-plugin state blobs that let a
//! restarted process resume a release mid-flight.
//!
//! # Architecture
//!
//! Releases are JSON-serialized into redb's `&[u8]` value columns, keyed by
//! release name. Plugin state is keyed by `{release}/{role}` so that every
//! blob owned by a release can be found (and removed) with a prefix scan.
//!
//! The engine consumes storage through the [`Store`] trait; [`ReleaseStore`]
//! is the redb implementation. It is `Clone` + `Send` + `Sync` (backed by
//! `Arc<Database>`) and can be shared across async tasks.

pub mod error;
pub mod plugin_state;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use plugin_state::{PluginStateHandle, PluginStateStore};
pub use store::{ReleaseStore, Store};
pub use types::*;
