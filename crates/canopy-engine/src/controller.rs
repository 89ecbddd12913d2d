//! Release controller: declarative release management over the provider.
//!
//! Submitting a release persists it and starts `Configure`; destroying one
//! starts `Destroy` and removes the release once its machine is back at
//! `Idle`. On process start, [`ReleaseController::rehydrate`] rebuilds a
//! machine for every persisted release.

use std::sync::Arc;

use canopy_state::{PluginRole, Release, State};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::provider::Provider;

/// What [`ReleaseController::submit`] did with a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Created,
    Updated,
    /// Same name and version already stored; nothing was changed.
    Unchanged,
}

/// One row of the release listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseSummary {
    pub name: String,
    /// Current state name, `unknown` when the state machine cannot be built.
    pub status: String,
    /// Last status reported by the strategy.
    pub last_deployment_status: String,
    pub candidate_traffic: i64,
    pub version: String,
}

/// A release with its current state.
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseDetail {
    #[serde(flatten)]
    pub release: Release,
    pub current_state: String,
}

pub struct ReleaseController {
    provider: Arc<Provider>,
}

impl ReleaseController {
    pub fn new(provider: Arc<Provider>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &Arc<Provider> {
        &self.provider
    }

    /// Create or update a release and start configuring it.
    pub async fn submit(&self, mut release: Release) -> EngineResult<SubmitOutcome> {
        let _guard = self.provider.lock_releases().await;
        let store = self.provider.store();

        let existing = match store.get_release(&release.name) {
            Ok(existing) => Some(existing),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };

        let outcome = match existing {
            Some(existing) if existing.version == release.version => {
                debug!(release = %release.name, version = %release.version, "release unchanged");
                return Ok(SubmitOutcome::Unchanged);
            }
            Some(existing) => {
                // A live machine is ahead of the stored history.
                let live = self.provider.live_state_machine(&existing);
                let state = match &live {
                    Some(sm) => Some(sm.current_state()),
                    None => existing.current_state(),
                };
                if let Some(state) = state.filter(|s| !s.is_resting() && *s != State::Start) {
                    return Err(EngineError::ReleaseActive {
                        name: release.name,
                        state,
                    });
                }
                self.provider.delete_state_machine(&existing);
                release.state_history = match live {
                    Some(sm) => sm.release().state_history,
                    None => existing.state_history,
                };
                SubmitOutcome::Updated
            }
            None => {
                release.state_history.clear();
                SubmitOutcome::Created
            }
        };

        // Building the machine configures every plugin; reject bad config
        // before anything is stored.
        self.provider.delete_state_machine(&release);
        let sm = self.provider.get_state_machine(&release)?;
        if let Err(e) = store.upsert_release(&release) {
            self.provider.delete_state_machine(&release);
            return Err(e.into());
        }

        sm.configure()?;
        info!(release = %release.name, version = %release.version, ?outcome, "release submitted");
        Ok(outcome)
    }

    /// Start tearing a release down. The returned task removes the release
    /// once its machine reaches `Idle`.
    pub async fn destroy(&self, name: &str) -> EngineResult<JoinHandle<()>> {
        let _guard = self.provider.lock_releases().await;
        let release = self.provider.store().get_release(name)?;
        let sm = self.provider.get_state_machine(&release)?;
        sm.destroy()?;
        info!(release = %name, "destroying release");

        let provider = self.provider.clone();
        let timeout = provider.settings().destroy_timeout;
        Ok(tokio::spawn(async move {
            let settled = sm.wait_until(|s| matches!(s, State::Idle | State::Fail));
            match tokio::time::timeout(timeout, settled).await {
                Ok(State::Idle) => {
                    provider.delete_state_machine(&release);
                    if let Err(e) = provider.store().delete_release(&release.name) {
                        error!(release = %release.name, error = %e, "unable to delete release");
                        return;
                    }
                    provider.metrics().forget(&release.name);
                    info!(release = %release.name, "destroy complete, release removed");
                }
                Ok(state) => {
                    warn!(release = %release.name, %state, "unable to destroy release");
                }
                Err(_) => {
                    warn!(release = %release.name, ?timeout, "timed out waiting for destroy");
                }
            }
        }))
    }

    /// Build a machine for every persisted release and resume in-flight ones.
    /// Returns the number of releases whose machine was rebuilt.
    pub fn rehydrate(&self) -> EngineResult<usize> {
        let releases = self.provider.store().list_releases(None)?;
        let mut count = 0;

        for release in &releases {
            let sm = match self.provider.get_state_machine(release) {
                Ok(sm) => sm,
                Err(e) => {
                    error!(release = %release.name, error = %e, "unable to rebuild state machine");
                    continue;
                }
            };
            if let Err(e) = sm.resume() {
                error!(release = %release.name, error = %e, "unable to resume release");
                continue;
            }
            count += 1;
        }

        info!(count, total = releases.len(), "releases rehydrated");
        Ok(count)
    }

    pub fn summaries(&self) -> EngineResult<Vec<ReleaseSummary>> {
        let releases = self.provider.store().list_releases(None)?;

        Ok(releases
            .into_iter()
            .map(|release| {
                let status = match self.provider.get_state_machine(&release) {
                    Ok(sm) => sm.current_state().to_string(),
                    Err(e) => {
                        error!(release = %release.name, error = %e, "unable to get state machine");
                        "unknown".to_string()
                    }
                };
                let (candidate_traffic, last_deployment_status) = self.strategy_progress(&release);

                ReleaseSummary {
                    name: release.name,
                    status,
                    last_deployment_status,
                    candidate_traffic,
                    version: release.version,
                }
            })
            .collect())
    }

    pub fn get(&self, name: &str) -> EngineResult<ReleaseDetail> {
        let release = self.provider.store().get_release(name)?;
        Ok(ReleaseDetail {
            current_state: release.current_state_name().to_string(),
            release,
        })
    }

    /// `(candidate_traffic, status)` from the strategy's persisted state.
    fn strategy_progress(&self, release: &Release) -> (i64, String) {
        let Ok(data) = self
            .provider
            .store()
            .get_plugin_state(&release.name, PluginRole::Strategy)
        else {
            return (0, String::new());
        };

        let state: serde_json::Value = match serde_json::from_slice(&data) {
            Ok(state) => state,
            Err(e) => {
                error!(release = %release.name, error = %e, "unable to decode strategy state");
                return (0, String::new());
            }
        };

        // -1 marks a rollout that has not started.
        (
            state["candidate_traffic"].as_i64().unwrap_or(0).clamp(0, 100),
            state["status"].as_str().unwrap_or_default().to_string(),
        )
    }
}
