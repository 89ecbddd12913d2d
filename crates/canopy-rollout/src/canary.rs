//! Canary strategy: converts health check outcomes into a traffic schedule.
//!
//! ```text
//!   first call ──▶ initial split, no check
//!        │
//!        ▼
//!   sleep(interval) ──▶ check ──ok──▶ +traffic_step ──▶ < max ──▶ Success
//!        ▲                │                              └─ ≥ max ──▶ Complete(100)
//!        │              fail
//!        └── Failing ◀─── < threshold
//!                         └─ ≥ threshold ──▶ Failed(0)
//! ```
//!
//! Progress (`candidate_traffic`, `status`) is persisted after every status
//! change so a restarted process resumes at the right traffic level. The
//! consecutive-failure counter lives only for the duration of one `execute`.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use canopy_plugins::{
    CheckResult, ConfigError, Monitor, PluginResult, Strategy, StrategyStatus,
};
use canopy_state::PluginStateStore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::CanaryConfig;

/// Upper bound on a single monitor check.
pub const CHECK_TIMEOUT: Duration = Duration::from_secs(30);

/// Traffic value meaning "no rollout in progress".
const NOT_STARTED: i32 = -1;

/// Persisted canary progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanaryState {
    /// Candidate traffic share; -1 before the first split.
    pub candidate_traffic: i32,
    pub status: StrategyStatus,
}

impl Default for CanaryState {
    fn default() -> Self {
        Self {
            candidate_traffic: NOT_STARTED,
            status: StrategyStatus::Success,
        }
    }
}

/// Canary strategy plugin.
pub struct CanaryStrategy {
    monitor: Arc<dyn Monitor>,
    config: CanaryConfig,
    store: Option<Arc<dyn PluginStateStore>>,
    state: Mutex<CanaryState>,
}

impl CanaryStrategy {
    pub const NAME: &'static str = "canary";

    pub fn new(monitor: Arc<dyn Monitor>) -> Self {
        Self {
            monitor,
            config: CanaryConfig::default(),
            store: None,
            state: Mutex::new(CanaryState::default()),
        }
    }

    pub fn config(&self) -> &CanaryConfig {
        &self.config
    }

    /// Snapshot of the current progress.
    pub fn state(&self) -> CanaryState {
        *self.lock_state()
    }

    fn lock_state(&self) -> MutexGuard<'_, CanaryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply `update` to the state and persist the result.
    fn update_state(&self, update: impl FnOnce(&mut CanaryState)) -> CanaryState {
        let snapshot = {
            let mut state = self.lock_state();
            update(&mut state);
            *state
        };
        self.save_state(&snapshot);
        snapshot
    }

    fn save_state(&self, state: &CanaryState) {
        let Some(store) = &self.store else {
            return;
        };

        match serde_json::to_vec(state) {
            Ok(data) => {
                if let Err(e) = store.upsert_state(&data) {
                    warn!(strategy = Self::NAME, error = %e, "unable to save strategy state");
                }
            }
            Err(e) => warn!(strategy = Self::NAME, error = %e, "unable to encode strategy state"),
        }
    }

    /// One bounded health check. `Err` carries the reason the check did not pass.
    async fn check(&self, candidate: &str, interval: Duration) -> Result<(), String> {
        match tokio::time::timeout(CHECK_TIMEOUT, self.monitor.check(candidate, interval)).await {
            Ok(Ok(CheckResult::Success)) => Ok(()),
            Ok(Ok(result)) => Err(format!("check returned {result}")),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("check timed out after {CHECK_TIMEOUT:?}")),
        }
    }
}

#[async_trait]
impl Strategy for CanaryStrategy {
    fn configure(
        &mut self,
        config: &serde_json::Value,
        store: Arc<dyn PluginStateStore>,
    ) -> Result<(), ConfigError> {
        self.config = CanaryConfig::from_value(config)?;

        let state = match store.get_state() {
            Ok(data) => serde_json::from_slice(&data).unwrap_or_else(|e| {
                debug!(strategy = Self::NAME, error = %e, "unable to decode state, starting fresh");
                CanaryState::default()
            }),
            Err(e) => {
                debug!(strategy = Self::NAME, error = %e, "no saved state, starting fresh");
                CanaryState::default()
            }
        };

        *self.lock_state() = state;
        self.store = Some(store);
        Ok(())
    }

    async fn execute(&self, candidate: &str) -> PluginResult<(StrategyStatus, u32)> {
        let traffic = self.lock_state().candidate_traffic;
        info!(strategy = Self::NAME, %candidate, traffic, "executing strategy");

        // First call primes the rollout without a health check.
        if traffic == NOT_STARTED {
            let first = self.config.first_step();
            self.lock_state().candidate_traffic = first;

            let delay = self.config.initial_delay();
            debug!(strategy = Self::NAME, ?delay, "waiting for initial grace before starting rollout");
            tokio::time::sleep(delay).await;

            self.update_state(|s| s.status = StrategyStatus::Success);
            debug!(strategy = Self::NAME, traffic = first, "strategy setup");
            return Ok((StrategyStatus::Success, first.clamp(0, 100) as u32));
        }

        let interval = self.config.interval();
        let mut fail_count = 0;
        loop {
            tokio::time::sleep(interval).await;

            debug!(strategy = Self::NAME, %candidate, "checking metrics");
            if let Err(reason) = self.check(candidate, interval).await {
                fail_count += 1;
                debug!(
                    strategy = Self::NAME,
                    %candidate,
                    fail_count,
                    threshold = self.config.error_threshold,
                    %reason,
                    "check failed"
                );

                if fail_count >= self.config.error_threshold {
                    self.update_state(|s| {
                        s.candidate_traffic = NOT_STARTED;
                        s.status = StrategyStatus::Failed;
                    });
                    info!(strategy = Self::NAME, %candidate, "error threshold reached");
                    return Ok((StrategyStatus::Failed, 0));
                }

                self.update_state(|s| s.status = StrategyStatus::Failing);
                continue;
            }

            let state = self.update_state(|s| {
                s.candidate_traffic += self.config.traffic_step;
                s.status = StrategyStatus::Success;
            });

            if state.candidate_traffic >= self.config.max_traffic {
                self.update_state(|s| {
                    s.candidate_traffic = NOT_STARTED;
                    s.status = StrategyStatus::Complete;
                });
                debug!(strategy = Self::NAME, %candidate, "strategy complete");
                return Ok((StrategyStatus::Complete, 100));
            }

            debug!(strategy = Self::NAME, traffic = state.candidate_traffic, "strategy success");
            return Ok((StrategyStatus::Success, state.candidate_traffic as u32));
        }
    }

    fn primary_traffic(&self) -> u32 {
        let traffic = self.lock_state().candidate_traffic;
        if traffic < 0 {
            100
        } else if traffic > 100 {
            0
        } else {
            (100 - traffic) as u32
        }
    }

    fn candidate_traffic(&self) -> u32 {
        self.lock_state().candidate_traffic.clamp(0, 100) as u32
    }
}
