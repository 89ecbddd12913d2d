//! Canopy canary rollout: health-gated traffic shifting.
//!
//! The canary strategy moves traffic to a candidate in fixed steps. Each step
//! waits one interval and then asks the monitor whether the candidate is
//! healthy. Enough consecutive failures roll the release back; reaching the
//! maximum traffic share completes it.
//!
//! # Components
//!
//! - **`config`**: Canary configuration and validation
//! - **`canary`**: The strategy itself and its persisted progress

pub mod canary;
pub mod config;

pub use canary::{CHECK_TIMEOUT, CanaryState, CanaryStrategy};
pub use config::CanaryConfig;
