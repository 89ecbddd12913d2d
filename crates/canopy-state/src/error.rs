//! Error types for the Canopy release store.

use thiserror::Error;

use crate::types::PluginRole;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("release not found: {0}")]
    ReleaseNotFound(String),

    #[error("plugin state not found: {release}/{role}")]
    PluginStateNotFound { release: String, role: PluginRole },

    #[error("invalid release: {0}")]
    InvalidRelease(String),
}

impl StoreError {
    /// True for the "absent" variants that callers commonly treat as a default.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::ReleaseNotFound(_) | StoreError::PluginStateNotFound { .. }
        )
    }
}
