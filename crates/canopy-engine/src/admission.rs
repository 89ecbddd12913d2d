//! Admission gate: decides whether an observed deployment may start a release.
//!
//! A deployment is matched against every release managed by its runtime
//! platform. The release's deployment selector is a regular expression,
//! implicitly anchored at the end. A matching release that is resting
//! (`Idle` or `Fail`) records the deployment as its candidate and starts a
//! new deployment; one that is mid-workflow rejects it.

use std::collections::HashMap;
use std::sync::Arc;

use canopy_plugins::{RUNTIME_VERSION_LABEL, RuntimeBaseConfig, decode_config};
use canopy_state::{ListOptions, PluginRole, Release, State};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, error, info};

use crate::error::AdmissionError;
use crate::provider::Provider;

/// A deployment observed on a runtime platform.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdmissionRequest {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Platform resource version of the deployment.
    #[serde(default)]
    pub version: String,
    /// Runtime plugin name the deployment was observed on.
    pub runtime: String,
}

/// Decision for an admitted deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Granted,
    /// A matching release is mid-workflow.
    Rejected {
        release: String,
        state: State,
        reason: String,
    },
}

pub struct AdmissionGate {
    provider: Arc<Provider>,
}

impl AdmissionGate {
    pub fn new(provider: Arc<Provider>) -> Self {
        Self { provider }
    }

    pub async fn check(&self, request: &AdmissionRequest) -> Result<Admission, AdmissionError> {
        info!(
            deployment = %request.name,
            namespace = %request.namespace,
            version = %request.version,
            "handle deployment admission"
        );

        // Written by the engine's own runtime changes; never re-admit those.
        if !request.version.is_empty()
            && request.labels.get(RUNTIME_VERSION_LABEL) == Some(&request.version)
        {
            debug!(deployment = %request.name, "ignoring deployment modified by the controller");
            return Ok(Admission::Granted);
        }

        // Held across check-and-deploy, shared with submit and destroy.
        let _guard = self.provider.lock_releases().await;

        let releases = self
            .provider
            .store()
            .list_releases(Some(&ListOptions::runtime(&request.runtime)))
            .map_err(AdmissionError::ListReleases)?;

        for release in releases {
            let Some(config) = runtime_config(&release) else {
                continue;
            };
            let Some(selector) = compile_selector(&release.name, &config.deployment_selector)
            else {
                continue;
            };

            debug!(
                release = %release.name,
                deployment = %request.name,
                selector = %selector,
                "checking release"
            );
            if !selector.is_match(&request.name) || config.namespace != request.namespace {
                continue;
            }

            return self.admit(&release, request).await;
        }

        Ok(Admission::Granted)
    }

    async fn admit(
        &self,
        release: &Release,
        request: &AdmissionRequest,
    ) -> Result<Admission, AdmissionError> {
        let state_machine_error = |source| AdmissionError::StateMachine {
            release: release.name.clone(),
            source: Box::new(source),
        };

        let sm = self
            .provider
            .get_state_machine(release)
            .map_err(state_machine_error)?;
        let state = sm.current_state();
        debug!(release = %release.name, deployment = %request.name, %state, "found release for deployment");

        match state {
            State::Destroy => {
                debug!(release = %release.name, "ignoring release being destroyed");
                Ok(Admission::Granted)
            }
            State::Idle | State::Fail => {
                self.save_candidate(release, &request.name)?;

                // Rebuild so plugins load the new candidate from their state.
                // The live machine's history is newer than the listed one.
                let current = sm.release();
                self.provider.delete_state_machine(&current);
                let sm = self
                    .provider
                    .get_state_machine(&current)
                    .map_err(state_machine_error)?;

                sm.deploy().map_err(|source| AdmissionError::Deploy {
                    release: release.name.clone(),
                    source,
                })?;

                info!(release = %release.name, candidate = %request.name, "deployment admitted");
                Ok(Admission::Granted)
            }
            _ => {
                debug!(release = %release.name, %state, "rejecting deployment, release active");
                Ok(Admission::Rejected {
                    release: release.name.clone(),
                    state,
                    reason: format!(
                        "a release for the deployment {} is currently active, state: {state}",
                        request.name
                    ),
                })
            }
        }
    }

    /// Record `candidate` in the runtime plugin's state, keeping its other fields.
    fn save_candidate(&self, release: &Release, candidate: &str) -> Result<(), AdmissionError> {
        let store = self.provider.store();

        let mut state = match store.get_plugin_state(&release.name, PluginRole::Runtime) {
            Ok(data) => serde_json::from_slice::<serde_json::Value>(&data)
                .ok()
                .filter(|v| v.is_object())
                .unwrap_or_else(|| {
                    error!(release = %release.name, "unable to decode runtime state, starting empty");
                    serde_json::json!({})
                }),
            Err(e) => {
                if !e.is_not_found() {
                    error!(release = %release.name, error = %e, "unable to fetch runtime state");
                }
                serde_json::json!({})
            }
        };
        state["candidate_name"] = serde_json::Value::String(candidate.to_string());

        debug!(release = %release.name, %candidate, "set candidate name in runtime state");
        store
            .upsert_plugin_state(&release.name, PluginRole::Runtime, state.to_string().as_bytes())
            .map_err(|source| AdmissionError::SaveState {
                release: release.name.clone(),
                source,
            })
    }
}

fn runtime_config(release: &Release) -> Option<RuntimeBaseConfig> {
    match decode_config(&release.runtime.plugin_name, &release.runtime.config) {
        Ok(config) => Some(config),
        Err(e) => {
            error!(release = %release.name, error = %e, "unable to decode runtime config");
            None
        }
    }
}

/// Compile a deployment selector, anchoring it at the end.
fn compile_selector(release: &str, selector: &str) -> Option<Regex> {
    let anchored = if selector.ends_with('$') {
        selector.to_string()
    } else {
        format!("{selector}$")
    };

    match Regex::new(&anchored) {
        Ok(re) => Some(re),
        Err(e) => {
            error!(%release, selector = %anchored, error = %e, "invalid deployment selector");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use canopy_plugins::RuntimeBaseState;
    use canopy_state::{ReleaseStore, Store, StoreError, StoreResult};
    use serde_json::json;

    use crate::testing::{MockState, fast_settings, mock_registry, mock_release};

    /// Store whose plugin state writes always fail.
    struct ReadOnlyPluginState(ReleaseStore);

    impl Store for ReadOnlyPluginState {
        fn upsert_release(&self, release: &Release) -> StoreResult<()> {
            self.0.upsert_release(release)
        }
        fn get_release(&self, name: &str) -> StoreResult<Release> {
            self.0.get_release(name)
        }
        fn list_releases(&self, options: Option<&ListOptions>) -> StoreResult<Vec<Release>> {
            self.0.list_releases(options)
        }
        fn delete_release(&self, name: &str) -> StoreResult<bool> {
            self.0.delete_release(name)
        }
        fn upsert_plugin_state(&self, _: &str, _: PluginRole, _: &[u8]) -> StoreResult<()> {
            Err(StoreError::Write("read only".to_string()))
        }
        fn get_plugin_state(&self, release: &str, role: PluginRole) -> StoreResult<Vec<u8>> {
            self.0.get_plugin_state(release, role)
        }
    }

    struct Harness {
        mocks: Arc<MockState>,
        store: Arc<dyn Store>,
        provider: Arc<Provider>,
        gate: AdmissionGate,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_store(Arc::new(ReleaseStore::open_in_memory().unwrap()))
        }

        fn with_store(store: Arc<dyn Store>) -> Self {
            let mocks = MockState::new();
            let provider = Arc::new(Provider::new(
                mock_registry(&mocks),
                store.clone(),
                fast_settings(),
            ));
            Self {
                mocks,
                store,
                gate: AdmissionGate::new(provider.clone()),
                provider,
            }
        }

        /// Persist a release selecting `selector` in namespace `default`.
        fn release(&self, selector: &str, states: &[State]) -> Release {
            let mut release = mock_release("api");
            release.runtime.config = json!({"deployment": selector, "namespace": "default"});
            for state in states {
                release.update_state(*state);
            }
            self.store.upsert_release(&release).unwrap();
            release
        }

        fn runtime_state(&self) -> serde_json::Value {
            let data = self.store.get_plugin_state("api", PluginRole::Runtime).unwrap();
            serde_json::from_slice(&data).unwrap()
        }
    }

    fn request(name: &str) -> AdmissionRequest {
        AdmissionRequest {
            name: name.to_string(),
            namespace: "default".to_string(),
            labels: HashMap::new(),
            version: "12".to_string(),
            runtime: "mock".to_string(),
        }
    }

    #[tokio::test]
    async fn own_changes_are_granted_without_lookup() {
        let h = Harness::new();
        h.release("api-deployment", &[State::Monitor]);
        let mut req = request("api-deployment");
        req.labels.insert(RUNTIME_VERSION_LABEL.to_string(), "12".to_string());

        assert_eq!(h.gate.check(&req).await.unwrap(), Admission::Granted);
        assert!(!h.provider.has_state_machine(&mock_release("api")));
    }

    #[tokio::test]
    async fn no_matching_release_is_granted() {
        let h = Harness::new();
        assert_eq!(h.gate.check(&request("web")).await.unwrap(), Admission::Granted);
    }

    #[tokio::test]
    async fn namespace_mismatch_is_granted_without_deploy() {
        let h = Harness::new();
        h.release("api-deployment", &[State::Idle]);
        let mut req = request("api-deployment");
        req.namespace = "shop".to_string();

        assert_eq!(h.gate.check(&req).await.unwrap(), Admission::Granted);
        assert!(h.store.get_plugin_state("api", PluginRole::Runtime).is_err());
        assert_eq!(h.store.get_release("api").unwrap().current_state(), Some(State::Idle));
    }

    #[tokio::test]
    async fn idle_release_records_candidate_and_deploys() {
        let h = Harness::new();
        h.release("api-deployment", &[State::Idle]);

        assert_eq!(h.gate.check(&request("api-deployment")).await.unwrap(), Admission::Granted);

        let state: RuntimeBaseState = serde_json::from_value(h.runtime_state()).unwrap();
        assert_eq!(state.candidate_name, "api-deployment");

        let release = h.store.get_release("api").unwrap();
        assert_eq!(release.current_state(), Some(State::Deploy));
    }

    #[tokio::test]
    async fn failed_release_deploys_and_keeps_runtime_state() {
        let h = Harness::new();
        h.release("api-(.*)", &[State::Fail]);
        h.store
            .upsert_plugin_state(
                "api",
                PluginRole::Runtime,
                br#"{"candidate_name":"api-v1","primary_name":"api-primary","replicas":3}"#,
            )
            .unwrap();

        assert_eq!(h.gate.check(&request("api-v2")).await.unwrap(), Admission::Granted);

        let state = h.runtime_state();
        assert_eq!(state["candidate_name"], "api-v2");
        assert_eq!(state["primary_name"], "api-primary");
        assert_eq!(state["replicas"], 3);
        assert_eq!(h.store.get_release("api").unwrap().current_state(), Some(State::Deploy));
    }

    #[tokio::test]
    async fn admitted_release_runs_deployment() {
        let h = Harness::new();
        h.release("api-(.*)", &[State::Idle]);

        h.gate.check(&request("api-v2")).await.unwrap();
        let sm = h.provider.get_state_machine(&mock_release("api")).unwrap();
        tokio::time::timeout(Duration::from_secs(5), sm.wait_until(|s| s == State::Monitor))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(h.mocks.count("strategy.execute"), 1);
        assert_eq!(
            h.mocks.calls()[..3],
            [
                "runtime.init_primary",
                "releaser.wait_until_healthy(primary)",
                "releaser.scale(0)",
            ]
        );
    }

    #[tokio::test]
    async fn check_waits_for_release_lock() {
        let h = Harness::new();
        h.release("api-(.*)", &[State::Idle]);
        let guard = h.provider.lock_releases().await;

        let req = request("api-v2");
        let check = h.gate.check(&req);
        tokio::pin!(check);
        assert!(
            tokio::time::timeout(Duration::from_millis(20), &mut check)
                .await
                .is_err()
        );
        assert!(h.store.get_plugin_state("api", PluginRole::Runtime).is_err());

        drop(guard);
        assert_eq!(check.await.unwrap(), Admission::Granted);
        assert_eq!(h.runtime_state()["candidate_name"], "api-v2");
    }

    #[tokio::test]
    async fn selector_is_anchored_at_the_end() {
        let h = Harness::new();
        h.release("test-", &[State::Idle]);

        assert_eq!(h.gate.check(&request("test-deployment")).await.unwrap(), Admission::Granted);
        assert_eq!(h.store.get_release("api").unwrap().current_state(), Some(State::Idle));
    }

    #[tokio::test]
    async fn selector_groups_match() {
        let h = Harness::new();
        h.release("test-(.*)", &[State::Idle]);

        assert_eq!(h.gate.check(&request("test-deployment")).await.unwrap(), Admission::Granted);
        assert_eq!(h.store.get_release("api").unwrap().current_state(), Some(State::Deploy));
    }

    #[tokio::test]
    async fn invalid_selector_is_skipped() {
        let h = Harness::new();
        h.release("api-(", &[State::Idle]);

        assert_eq!(h.gate.check(&request("api-(")).await.unwrap(), Admission::Granted);
        assert_eq!(h.store.get_release("api").unwrap().current_state(), Some(State::Idle));
    }

    #[tokio::test]
    async fn active_release_rejects_without_deploy() {
        let h = Harness::new();
        h.release("api-deployment", &[State::Idle, State::Deploy, State::Monitor]);

        let admission = h.gate.check(&request("api-deployment")).await.unwrap();
        let Admission::Rejected { release, state, reason } = admission else {
            panic!("expected rejection, got {admission:?}");
        };
        assert_eq!(release, "api");
        assert_eq!(state, State::Monitor);
        assert!(reason.contains("state_monitor"));
        assert_eq!(h.store.get_release("api").unwrap().state_history.len(), 3);
        assert!(h.mocks.calls().is_empty());
    }

    #[tokio::test]
    async fn destroying_release_is_granted() {
        let h = Harness::new();
        h.release("api-deployment", &[State::Idle, State::Destroy]);

        assert_eq!(h.gate.check(&request("api-deployment")).await.unwrap(), Admission::Granted);
        assert_eq!(h.store.get_release("api").unwrap().current_state(), Some(State::Destroy));
    }

    #[tokio::test]
    async fn state_save_failure_is_an_error_and_skips_deploy() {
        let h = Harness::with_store(Arc::new(ReadOnlyPluginState(
            ReleaseStore::open_in_memory().unwrap(),
        )));
        h.release("api-deployment", &[State::Idle]);

        let err = h.gate.check(&request("api-deployment")).await.unwrap_err();
        assert!(matches!(err, AdmissionError::SaveState { ref release, .. } if release == "api"));
        assert_eq!(h.store.get_release("api").unwrap().current_state(), Some(State::Idle));
    }

    #[tokio::test]
    async fn releases_on_other_runtimes_are_ignored() {
        let h = Harness::new();
        h.release("api-deployment", &[State::Idle]);
        let mut req = request("api-deployment");
        req.runtime = "nomad".to_string();

        assert_eq!(h.gate.check(&req).await.unwrap(), Admission::Granted);
        assert_eq!(h.store.get_release("api").unwrap().current_state(), Some(State::Idle));
    }

    #[test]
    fn compile_selector_keeps_explicit_anchor() {
        let re = compile_selector("api", "web$").unwrap();
        assert_eq!(re.as_str(), "web$");
        assert_eq!(compile_selector("api", "web").unwrap().as_str(), "web$");
        assert!(compile_selector("api", "(").is_none());
    }
}
