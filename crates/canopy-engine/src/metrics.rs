//! State timing metrics with Prometheus text exposition.
//!
//! Every state entry starts a [`StateTimer`]; leaving the state hands the
//! timer back with an [`ExitOutcome`]. Totals are kept per release and state
//! and rendered on demand for the `/metrics` endpoint.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use canopy_state::State;

/// How a state was left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExitOutcome {
    Ok,
    /// Left through a `Fail` event.
    Fail,
}

impl ExitOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            ExitOutcome::Ok => "ok",
            ExitOutcome::Fail => "fail",
        }
    }
}

/// Started when a release enters a state.
#[derive(Debug)]
pub struct StateTimer {
    release: String,
    state: State,
    started: Instant,
}

#[derive(Debug, Default, Clone, Copy)]
struct StateTiming {
    entries: u64,
    exits: u64,
    total: Duration,
}

#[derive(Default)]
struct MetricsInner {
    /// (release, state) → timing.
    timings: BTreeMap<(String, &'static str), StateTiming>,
    /// (release, state, outcome) → exits.
    exits: BTreeMap<(String, &'static str, ExitOutcome), u64>,
    /// release → current state.
    current: BTreeMap<String, State>,
}

/// Per-release state timing collected by every state machine.
#[derive(Default)]
pub struct EngineMetrics {
    inner: Mutex<MetricsInner>,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MetricsInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record entry into `state`; hand the timer back to [`Self::state_exited`].
    pub fn state_entered(&self, release: &str, state: State) -> StateTimer {
        let mut inner = self.lock();
        inner
            .timings
            .entry((release.to_string(), state.as_str()))
            .or_default()
            .entries += 1;
        inner.current.insert(release.to_string(), state);

        StateTimer {
            release: release.to_string(),
            state,
            started: Instant::now(),
        }
    }

    pub fn state_exited(&self, timer: StateTimer, outcome: ExitOutcome) {
        let elapsed = timer.started.elapsed();
        let mut inner = self.lock();

        let timing = inner
            .timings
            .entry((timer.release.clone(), timer.state.as_str()))
            .or_default();
        timing.exits += 1;
        timing.total += elapsed;

        *inner
            .exits
            .entry((timer.release, timer.state.as_str(), outcome))
            .or_default() += 1;
    }

    /// Drop every series for a deleted release.
    pub fn forget(&self, release: &str) {
        let mut inner = self.lock();
        inner.timings.retain(|(r, _), _| r != release);
        inner.exits.retain(|(r, _, _), _| r != release);
        inner.current.remove(release);
    }

    /// Number of state entries recorded for `(release, state)`.
    pub fn entries(&self, release: &str, state: State) -> u64 {
        self.lock()
            .timings
            .get(&(release.to_string(), state.as_str()))
            .map(|t| t.entries)
            .unwrap_or(0)
    }

    /// Number of exits recorded for `(release, state, outcome)`.
    pub fn exits(&self, release: &str, state: State, outcome: ExitOutcome) -> u64 {
        self.lock()
            .exits
            .get(&(release.to_string(), state.as_str(), outcome))
            .copied()
            .unwrap_or(0)
    }

    /// Releases with a workflow step in flight.
    pub fn active_releases(&self) -> usize {
        self.lock()
            .current
            .values()
            .filter(|s| !s.is_resting() && **s != State::Start)
            .count()
    }

    /// Render all series in the Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let inner = self.lock();
        let mut out = String::new();

        out.push_str("# HELP canopy_state_entries_total Times a release entered a state.\n");
        out.push_str("# TYPE canopy_state_entries_total counter\n");
        for ((release, state), t) in &inner.timings {
            out.push_str(&format!(
                "canopy_state_entries_total{{release=\"{release}\",state=\"{state}\"}} {}\n",
                t.entries
            ));
        }

        out.push_str("# HELP canopy_state_duration_seconds Time spent in a state before leaving it.\n");
        out.push_str("# TYPE canopy_state_duration_seconds summary\n");
        for ((release, state), t) in &inner.timings {
            out.push_str(&format!(
                "canopy_state_duration_seconds_sum{{release=\"{release}\",state=\"{state}\"}} {:.3}\n",
                t.total.as_secs_f64()
            ));
            out.push_str(&format!(
                "canopy_state_duration_seconds_count{{release=\"{release}\",state=\"{state}\"}} {}\n",
                t.exits
            ));
        }

        out.push_str("# HELP canopy_state_exits_total Times a release left a state, by outcome.\n");
        out.push_str("# TYPE canopy_state_exits_total counter\n");
        for ((release, state, outcome), count) in &inner.exits {
            out.push_str(&format!(
                "canopy_state_exits_total{{release=\"{release}\",state=\"{state}\",outcome=\"{}\"}} {count}\n",
                outcome.as_str()
            ));
        }

        let active = inner
            .current
            .values()
            .filter(|s| !s.is_resting() && **s != State::Start)
            .count();
        out.push_str("# HELP canopy_releases_active Releases with a workflow step in flight.\n");
        out.push_str("# TYPE canopy_releases_active gauge\n");
        out.push_str(&format!("canopy_releases_active {active}\n"));

        out
    }
}
