//! Engine tunables.

use std::time::Duration;

/// Timing knobs for the release workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Pause that lets mesh configuration converge in the data plane.
    pub step_delay: Duration,
    /// Upper bound on the work done on entering a single state.
    pub step_timeout: Duration,
    /// How long a destroy may take to reach Idle before its release is left in place.
    pub destroy_timeout: Duration,
}

impl EngineSettings {
    /// Longer convergence pause used before removing a workload.
    pub fn long_delay(&self) -> Duration {
        self.step_delay * 4
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            step_delay: Duration::from_secs(5),
            step_timeout: Duration::from_secs(30 * 60),
            destroy_timeout: Duration::from_secs(300),
        }
    }
}
