//! canopy-engine: release orchestration for Canopy.
//!
//! One [`StateMachine`] per release sequences the plugin calls of a canary
//! release: setup, deployment, health-gated traffic shifting, promotion,
//! rollback and teardown. The [`Provider`] owns the plugin registry and the
//! live state machines; the [`AdmissionGate`] decides whether a deployment
//! observed on the runtime platform may start a release.
//!
//! # Architecture
//!
//! ```text
//! runtime watcher ──▶ AdmissionGate::check ──▶ StateMachine::deploy
//!                                                   │
//!   ReleaseController::submit ──▶ configure         ▼
//!                                       step task (tokio::spawn, timeout)
//!                                                   │ next event
//!                                                   ▼
//!                                       StateMachine (epoch-guarded)
//! ```

pub mod admission;
pub mod controller;
pub mod error;
pub mod event;
pub mod machine;
pub mod metrics;
pub mod provider;
pub mod registry;
pub mod settings;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use admission::{Admission, AdmissionGate, AdmissionRequest};
pub use controller::{ReleaseController, ReleaseDetail, ReleaseSummary, SubmitOutcome};
pub use error::{AdmissionError, EngineError, EngineResult, TransitionError};
pub use event::{Event, next_state};
pub use machine::StateMachine;
pub use metrics::{EngineMetrics, ExitOutcome};
pub use provider::Provider;
pub use registry::{PluginRegistry, PluginSet};
pub use settings::EngineSettings;
