//! Engine error types.

use canopy_plugins::ConfigError;
use canopy_state::{PluginRole, State, StoreError};
use thiserror::Error;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// An event that is not legal in the machine's current state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("event {event} inappropriate in current state {state}")]
pub struct TransitionError {
    pub event: String,
    pub state: State,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no {role} plugin registered with name {name:?}")]
    PluginNotFound { role: PluginRole, name: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("release {name} is active, current state: {state}")]
    ReleaseActive { name: String, state: State },
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::Store(e) if e.is_not_found())
    }
}

/// Internal failure of the admission gate.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("unable to list releases: {0}")]
    ListReleases(#[source] StoreError),

    #[error("unable to save runtime state for release {release}: {source}")]
    SaveState {
        release: String,
        #[source]
        source: StoreError,
    },

    #[error("unable to create state machine for release {release}: {source}")]
    StateMachine {
        release: String,
        #[source]
        source: Box<EngineError>,
    },

    #[error("unable to start deployment for release {release}: {source}")]
    Deploy {
        release: String,
        #[source]
        source: TransitionError,
    },
}
