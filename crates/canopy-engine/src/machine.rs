//! Release state machine: sequences plugin calls through the workflow graph.
//!
//! ```text
//!  Start ─▶ Configure ─▶ Idle ─▶ Deploy ─▶ Monitor ◀──▶ Scale
//!               ▲          ▲       │          │  └──▶ Rollback ─▶ Idle
//!               │          │       └─▶ Idle   └─────▶ Promote  ─▶ Idle
//!             Fail ◀── (any)        Destroy ─▶ Idle
//! ```
//!
//! Firing an event only validates and records the transition; the work of
//! the entered state runs in its own spawned task under the step timeout
//! and fires the follow-up event itself. Every accepted transition bumps an
//! epoch, and a step's follow-up event is dropped if the machine has moved
//! on since the step was spawned. An event fired from outside the workflow
//! (`Destroy` while monitoring, say) aborts the step still in flight.

use std::sync::{Arc, Mutex, MutexGuard};

use canopy_plugins::{PluginError, RuntimeStatus, StrategyStatus, WebhookMessage};
use canopy_state::{Release, State, Store};
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::error::TransitionError;
use crate::event::{Event, next_state};
use crate::metrics::{EngineMetrics, ExitOutcome, StateTimer};
use crate::registry::PluginSet;
use crate::settings::EngineSettings;

/// Unwrap a plugin step result, or report the failure and return `Event::Fail`.
macro_rules! try_step {
    ($machine:ident, $call:expr, $title:expr, $state:expr, $traffic:expr) => {
        match $call {
            Ok(value) => value,
            Err(e) => return $machine.fail($title, $state, $traffic, e).await,
        }
    };
}

struct FsmState {
    current: State,
    epoch: u64,
    timer: Option<StateTimer>,
    /// Task running the current state's step, if any.
    step: Option<AbortHandle>,
}

struct Inner {
    name: String,
    namespace: String,
    release: Mutex<Release>,
    plugins: PluginSet,
    store: Arc<dyn Store>,
    metrics: Arc<EngineMetrics>,
    settings: EngineSettings,
    fsm: Mutex<FsmState>,
    state_tx: watch::Sender<State>,
}

/// Handle to one release's state machine. Cheap to clone.
#[derive(Clone)]
pub struct StateMachine {
    inner: Arc<Inner>,
}

impl StateMachine {
    /// Create a machine starting from the release's persisted current state.
    pub fn new(
        release: Release,
        plugins: PluginSet,
        store: Arc<dyn Store>,
        metrics: Arc<EngineMetrics>,
        settings: EngineSettings,
    ) -> Self {
        let initial = release.current_state().unwrap_or(State::Start);
        debug!(release = %release.name, state = %initial, "state machine created");

        let (state_tx, _) = watch::channel(initial);
        Self {
            inner: Arc::new(Inner {
                name: release.name.clone(),
                namespace: release.namespace.clone(),
                release: Mutex::new(release),
                plugins,
                store,
                metrics,
                settings,
                fsm: Mutex::new(FsmState {
                    current: initial,
                    epoch: 0,
                    timer: None,
                    step: None,
                }),
                state_tx,
            }),
        }
    }

    // ── Public surface ─────────────────────────────────────────────

    /// Start (or restart) release setup. Must be called within a Tokio runtime.
    pub fn configure(&self) -> Result<(), TransitionError> {
        self.fire(Event::Configure)
    }

    /// Start a deployment of the current candidate.
    pub fn deploy(&self) -> Result<(), TransitionError> {
        self.fire(Event::Deploy)
    }

    /// Tear the release down and restore the original workload.
    pub fn destroy(&self) -> Result<(), TransitionError> {
        self.fire(Event::Destroy)
    }

    /// Re-drive a release recovered mid-flight. A release persisted in
    /// `Monitor` is re-entered through `Deploy`; other states are left as is.
    pub fn resume(&self) -> Result<(), TransitionError> {
        let epoch = {
            let mut fsm = self.lock_fsm();
            if fsm.current != State::Monitor {
                debug!(release = %self.inner.name, state = %fsm.current, "nothing to resume");
                return Ok(());
            }
            fsm.current = State::Deploy;
            fsm.epoch += 1;
            abort_step(&mut fsm, &self.inner.name);
            fsm.epoch
        };

        info!(release = %self.inner.name, "resuming monitor step");
        self.apply(Event::Deployed, Some(epoch)).map(|_| ())
    }

    pub fn current_state(&self) -> State {
        self.lock_fsm().current
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Snapshot of the release as last recorded by this machine.
    pub fn release(&self) -> Release {
        self.lock_release().clone()
    }

    /// Current `(primary, candidate)` traffic split as reported by the strategy.
    pub fn traffic(&self) -> (u32, u32) {
        let strategy = &self.inner.plugins.strategy;
        (strategy.primary_traffic(), strategy.candidate_traffic())
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<State> {
        self.inner.state_tx.subscribe()
    }

    /// Wait until the current state satisfies `predicate`, returning it.
    pub async fn wait_until(&self, predicate: impl Fn(State) -> bool) -> State {
        let mut rx = self.subscribe();
        match rx.wait_for(|s| predicate(*s)).await {
            Ok(state) => *state,
            // The sender lives as long as `self`.
            Err(_) => self.current_state(),
        }
    }

    // ── Transitions ────────────────────────────────────────────────

    fn lock_fsm(&self) -> MutexGuard<'_, FsmState> {
        self.inner.fsm.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_release(&self) -> MutexGuard<'_, Release> {
        self.inner.release.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn fire(&self, event: Event) -> Result<(), TransitionError> {
        self.apply(event, None).map(|_| ())
    }

    /// Apply `event`. With `expected_epoch`, the event is dropped (returning
    /// `Ok(false)`) unless the machine is still at that epoch.
    fn apply(&self, event: Event, expected_epoch: Option<u64>) -> Result<bool, TransitionError> {
        let (to, epoch) = {
            let mut fsm = self.lock_fsm();
            let from = fsm.current;

            if expected_epoch.is_some_and(|e| e != fsm.epoch) {
                debug!(
                    release = %self.inner.name,
                    %event,
                    state = %from,
                    "state superseded, dropping follow-up event"
                );
                return Ok(false);
            }

            debug!(release = %self.inner.name, %event, state = %from, "handle event");
            let Some(to) = next_state(from, event) else {
                return Err(TransitionError {
                    event: event.to_string(),
                    state: from,
                });
            };

            debug!(release = %self.inner.name, %event, state = %from, "leave state");
            if let Some(timer) = fsm.timer.take() {
                let outcome = match event {
                    Event::Fail => ExitOutcome::Fail,
                    _ => ExitOutcome::Ok,
                };
                self.inner.metrics.state_exited(timer, outcome);
            }

            match expected_epoch {
                // The follow-up of the current step: that task is finishing.
                Some(_) => fsm.step = None,
                None => abort_step(&mut fsm, &self.inner.name),
            }

            fsm.current = to;
            fsm.epoch += 1;
            fsm.timer = Some(self.inner.metrics.state_entered(&self.inner.name, to));
            self.record_state(to);
            self.inner.state_tx.send_replace(to);

            (to, fsm.epoch)
        };

        debug!(release = %self.inner.name, %event, state = %to, "enter state");
        self.spawn_step(to, event, epoch);
        Ok(true)
    }

    /// Append `state` to the release history and persist it.
    fn record_state(&self, state: State) {
        let mut release = self.lock_release();
        release.update_state(state);
        if let Err(e) = self.inner.store.upsert_release(&release) {
            error!(release = %self.inner.name, error = %e, "unable to upsert release");
        }
    }

    fn spawn_step(&self, state: State, event: Event, epoch: u64) {
        if matches!(state, State::Start | State::Idle | State::Fail) {
            return;
        }

        let machine = self.clone();
        let handle = tokio::spawn(async move {
            let timeout = machine.inner.settings.step_timeout;
            let next = match tokio::time::timeout(timeout, machine.run_step(state, event)).await {
                Ok(next) => next,
                Err(_) if !machine.in_state(state) => {
                    debug!(release = %machine.inner.name, %state, "superseded step timed out");
                    return;
                }
                Err(_) => {
                    let err = PluginError::Timeout(timeout);
                    machine
                        .fail("Release step timed out", state, machine.traffic(), err)
                        .await
                }
            };

            if let Err(e) = machine.apply(next, Some(epoch)) {
                warn!(release = %machine.inner.name, error = %e, "unable to apply follow-up event");
            }
        })
        .abort_handle();

        let mut fsm = self.lock_fsm();
        if fsm.epoch == epoch {
            fsm.step = Some(handle);
        } else if !handle.is_finished() {
            // Superseded before the handle could be recorded.
            handle.abort();
        }
    }

    fn in_state(&self, state: State) -> bool {
        self.lock_fsm().current == state
    }

    async fn run_step(&self, state: State, event: Event) -> Event {
        match state {
            State::Configure => self.do_configure().await,
            State::Deploy => self.do_deploy().await,
            State::Monitor => self.do_monitor().await,
            State::Scale => self.do_scale(event).await,
            State::Promote => self.do_promote().await,
            State::Rollback => self.do_rollback().await,
            State::Destroy => self.do_destroy().await,
            State::Start | State::Idle | State::Fail => Event::Fail,
        }
    }

    // ── Webhooks ───────────────────────────────────────────────────

    /// Send a message to every webhook; failures are logged and swallowed.
    async fn notify(
        &self,
        title: &str,
        state: State,
        outcome: Event,
        (primary_traffic, candidate_traffic): (u32, u32),
        error: Option<&PluginError>,
    ) {
        if self.inner.plugins.webhooks.is_empty() {
            return;
        }
        // A step that lost a race with an outside event reports nothing.
        if !self.in_state(state) {
            debug!(release = %self.inner.name, %title, %state, "state superseded, dropping webhook");
            return;
        }

        let message = WebhookMessage {
            title: title.to_string(),
            name: self.inner.name.clone(),
            namespace: self.inner.namespace.clone(),
            outcome: outcome.to_string(),
            state: state.to_string(),
            primary_traffic,
            candidate_traffic,
            error: error.map(|e| e.to_string()).unwrap_or_default(),
        };

        for webhook in &self.inner.plugins.webhooks {
            debug!(release = %self.inner.name, %title, "calling webhook");
            if let Err(e) = webhook.send(&message).await {
                error!(release = %self.inner.name, %title, error = %e, "unable to call webhook");
            }
        }
    }

    async fn fail(&self, title: &str, state: State, traffic: (u32, u32), err: PluginError) -> Event {
        error!(release = %self.inner.name, %state, error = %err, "{title}");
        self.notify(title, state, Event::Fail, traffic, Some(&err)).await;
        Event::Fail
    }

    // ── Steps ──────────────────────────────────────────────────────

    async fn do_configure(&self) -> Event {
        const FAILED: &str = "Configure release failed";
        let (releaser, runtime) = (&self.inner.plugins.releaser, &self.inner.plugins.runtime);
        let state = State::Configure;

        try_step!(
            self,
            releaser
                .setup(&runtime.primary_subset_filter(), &runtime.candidate_subset_filter())
                .await,
            FAILED,
            state,
            (0, 100)
        );

        tokio::time::sleep(self.inner.settings.step_delay).await;

        let status = try_step!(self, runtime.init_primary(&self.inner.name).await, FAILED, state, (0, 100));

        // A new primary was cloned: move all traffic to it and drop the original.
        if status == RuntimeStatus::Update {
            try_step!(
                self,
                releaser.wait_until_healthy(&runtime.primary_subset_filter()).await,
                FAILED,
                state,
                (0, 100)
            );
            try_step!(self, releaser.scale(0).await, FAILED, state, (0, 100));

            tokio::time::sleep(self.inner.settings.long_delay()).await;

            try_step!(self, runtime.remove_candidate().await, FAILED, state, (100, 0));
        }

        debug!(release = %self.inner.name, "configure completed");
        self.notify("Configure release succeeded", state, Event::Configured, (100, 0), None)
            .await;
        Event::Configured
    }

    async fn do_deploy(&self) -> Event {
        const FAILED: &str = "New deployment failed";
        let (releaser, runtime) = (&self.inner.plugins.releaser, &self.inner.plugins.runtime);
        let state = State::Deploy;

        // Deploy fires before the platform has admitted the new workload.
        tokio::time::sleep(self.inner.settings.step_delay).await;

        let status = try_step!(self, runtime.init_primary(&self.inner.name).await, FAILED, state, (100, 0));
        try_step!(
            self,
            releaser.wait_until_healthy(&runtime.primary_subset_filter()).await,
            FAILED,
            state,
            (100, 0)
        );
        try_step!(self, releaser.scale(0).await, FAILED, state, (100, 0));

        // First deployment: the candidate became the primary, nothing to roll out.
        if status == RuntimeStatus::Update {
            debug!(release = %self.inner.name, "deploy created primary, waiting for next candidate");
            tokio::time::sleep(self.inner.settings.long_delay()).await;

            try_step!(self, runtime.remove_candidate().await, FAILED, state, (100, 0));

            self.notify("New deployment succeeded", state, Event::Complete, (100, 0), None)
                .await;
            return Event::Complete;
        }

        debug!(release = %self.inner.name, "deploy completed, executing strategy");
        self.notify(
            "New deployment succeeded, executing strategy",
            state,
            Event::Deployed,
            (100, 0),
            None,
        )
        .await;
        Event::Deployed
    }

    async fn do_monitor(&self) -> Event {
        let plugins = &self.inner.plugins;
        let state = State::Monitor;
        let candidate = plugins.runtime.base_state().candidate_name;

        if let Some(test) = &plugins.test {
            debug!(release = %self.inner.name, %candidate, "executing post deployment tests");
            if let Err(e) = test.execute(&candidate).await {
                error!(release = %self.inner.name, error = %e, "post deployment tests failed");
                self.notify(
                    "Post deployment tests failed",
                    state,
                    Event::Unhealthy,
                    self.traffic(),
                    Some(&e),
                )
                .await;
                return Event::Unhealthy;
            }
        }

        let (status, traffic) = try_step!(
            self,
            plugins.strategy.execute(&candidate).await,
            "Monitoring deployment failed",
            state,
            self.traffic()
        );

        match status {
            StrategyStatus::Success => {
                debug!(release = %self.inner.name, traffic, "candidate healthy");
                Event::Healthy(traffic)
            }
            StrategyStatus::Complete => {
                debug!(release = %self.inner.name, "strategy complete");
                Event::Complete
            }
            StrategyStatus::Failed | StrategyStatus::Failing => {
                debug!(release = %self.inner.name, %status, "candidate unhealthy");
                self.notify("Monitor deployment failed", state, Event::Unhealthy, self.traffic(), None)
                    .await;
                Event::Unhealthy
            }
        }
    }

    async fn do_scale(&self, event: Event) -> Event {
        let state = State::Scale;
        let Event::Healthy(traffic) = event else {
            error!(release = %self.inner.name, %event, "no traffic percentage in event");
            return Event::Fail;
        };

        try_step!(
            self,
            self.inner.plugins.releaser.scale(traffic).await,
            "Scaling deployment failed",
            state,
            self.traffic()
        );

        debug!(release = %self.inner.name, traffic, "scale completed");
        self.notify("Scaling deployment succeeded", state, Event::Scaled, self.traffic(), None)
            .await;
        Event::Scaled
    }

    async fn do_promote(&self) -> Event {
        const FAILED: &str = "Promoting candidate failed";
        let (releaser, runtime) = (&self.inner.plugins.releaser, &self.inner.plugins.runtime);
        let state = State::Promote;

        try_step!(self, releaser.scale(100).await, FAILED, state, (0, 100));

        tokio::time::sleep(self.inner.settings.step_delay).await;

        let status = try_step!(self, runtime.promote_candidate().await, FAILED, state, (0, 100));
        if status == RuntimeStatus::NotFound {
            let err = PluginError::Failed("candidate deployment not found".to_string());
            return self.fail(FAILED, state, (0, 100), err).await;
        }

        try_step!(
            self,
            releaser.wait_until_healthy(&runtime.primary_subset_filter()).await,
            FAILED,
            state,
            (0, 100)
        );
        try_step!(self, releaser.scale(0).await, FAILED, state, (0, 100));

        tokio::time::sleep(self.inner.settings.long_delay()).await;

        try_step!(self, runtime.remove_candidate().await, FAILED, state, (100, 0));

        self.notify(
            "Promoting candidate to primary succeeded",
            state,
            Event::Promoted,
            (100, 0),
            None,
        )
        .await;
        Event::Promoted
    }

    async fn do_rollback(&self) -> Event {
        const FAILED: &str = "Rolling back deployment failed";
        let (releaser, runtime) = (&self.inner.plugins.releaser, &self.inner.plugins.runtime);
        let state = State::Rollback;

        try_step!(self, releaser.scale(0).await, FAILED, state, self.traffic());

        tokio::time::sleep(self.inner.settings.long_delay()).await;

        try_step!(self, runtime.remove_candidate().await, FAILED, state, (100, 0));

        self.notify("Deployment rolled back", state, Event::Complete, (100, 0), None)
            .await;
        Event::Complete
    }

    async fn do_destroy(&self) -> Event {
        const FAILED: &str = "Remove release failed";
        let (releaser, runtime) = (&self.inner.plugins.releaser, &self.inner.plugins.runtime);
        let state = State::Destroy;

        try_step!(self, runtime.restore_original().await, FAILED, state, (100, 0));
        // The restored original carries the candidate subset labels.
        try_step!(
            self,
            releaser.wait_until_healthy(&runtime.candidate_subset_filter()).await,
            FAILED,
            state,
            (100, 0)
        );
        try_step!(self, releaser.scale(100).await, FAILED, state, (100, 0));

        tokio::time::sleep(self.inner.settings.long_delay()).await;

        try_step!(self, runtime.remove_primary().await, FAILED, state, (0, 100));
        try_step!(self, releaser.destroy().await, FAILED, state, (0, 100));

        self.notify("Remove release succeeded", state, Event::Complete, (0, 100), None)
            .await;
        Event::Complete
    }
}

/// Abort the step task recorded in `fsm`, if it is still running.
fn abort_step(fsm: &mut FsmState, release: &str) {
    if let Some(step) = fsm.step.take() {
        if !step.is_finished() {
            debug!(%release, state = %fsm.current, "aborting in-flight step");
            step.abort();
        }
    }
}
