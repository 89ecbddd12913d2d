//! Domain types for the Canopy release store.
//!
//! A [`Release`] identifies one managed workload: the plugins that drive it
//! and the bounded history of states its workflow has passed through. The
//! JSON shape of these types is the stable on-disk and over-the-wire contract.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of entries retained in a release's state history.
pub const MAX_STATE_HISTORY: usize = 50;

// ── State ─────────────────────────────────────────────────────────

/// Fixed set of release workflow states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    #[serde(rename = "state_start")]
    Start,
    #[serde(rename = "state_configure")]
    Configure,
    #[serde(rename = "state_idle")]
    Idle,
    #[serde(rename = "state_deploy")]
    Deploy,
    #[serde(rename = "state_monitor")]
    Monitor,
    #[serde(rename = "state_scale")]
    Scale,
    #[serde(rename = "state_promote")]
    Promote,
    #[serde(rename = "state_rollback")]
    Rollback,
    #[serde(rename = "state_destroy")]
    Destroy,
    #[serde(rename = "state_fail")]
    Fail,
}

impl State {
    pub const ALL: [State; 10] = [
        State::Start,
        State::Configure,
        State::Idle,
        State::Deploy,
        State::Monitor,
        State::Scale,
        State::Promote,
        State::Rollback,
        State::Destroy,
        State::Fail,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            State::Start => "state_start",
            State::Configure => "state_configure",
            State::Idle => "state_idle",
            State::Deploy => "state_deploy",
            State::Monitor => "state_monitor",
            State::Scale => "state_scale",
            State::Promote => "state_promote",
            State::Rollback => "state_rollback",
            State::Destroy => "state_destroy",
            State::Fail => "state_fail",
        }
    }

    /// True when no workflow step is in flight: a new deployment may start.
    pub fn is_resting(&self) -> bool {
        matches!(self, State::Idle | State::Fail)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for State {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        State::ALL
            .iter()
            .find(|state| state.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown state: {s}"))
    }
}

// ── Plugins ───────────────────────────────────────────────────────

/// A plugin slot: which registered plugin fills a role and its opaque config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginSlot {
    pub plugin_name: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

impl PluginSlot {
    pub fn new(plugin_name: &str, config: serde_json::Value) -> Self {
        Self {
            plugin_name: plugin_name.to_string(),
            config,
        }
    }
}

/// The role a plugin plays for a release; plugin state is partitioned by role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginRole {
    Releaser,
    Runtime,
    Monitor,
    Strategy,
    Test,
    Webhook,
}

impl PluginRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginRole::Releaser => "releaser",
            PluginRole::Runtime => "runtime",
            PluginRole::Monitor => "monitor",
            PluginRole::Strategy => "strategy",
            PluginRole::Test => "test",
            PluginRole::Webhook => "webhook",
        }
    }
}

impl fmt::Display for PluginRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Release ───────────────────────────────────────────────────────

/// A state the release entered and when.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateHistory {
    pub time: DateTime<Utc>,
    pub state: State,
}

/// One managed workload and its release workflow configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Release {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    /// Opaque; a changed version marks a re-submitted release definition.
    #[serde(default)]
    pub version: String,
    pub releaser: PluginSlot,
    pub runtime: PluginSlot,
    pub strategy: PluginSlot,
    pub monitor: PluginSlot,
    #[serde(default)]
    pub webhooks: Vec<PluginSlot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_deployment_test: Option<PluginSlot>,
    #[serde(default)]
    pub state_history: Vec<StateHistory>,
}

impl Release {
    /// Append a state to the history, evicting the oldest entries beyond
    /// [`MAX_STATE_HISTORY`]. Timestamps never go backwards.
    pub fn update_state(&mut self, state: State) {
        let mut time = Utc::now();
        if let Some(last) = self.state_history.last() {
            if last.time > time {
                time = last.time;
            }
        }

        self.state_history.push(StateHistory { time, state });

        if self.state_history.len() > MAX_STATE_HISTORY {
            let excess = self.state_history.len() - MAX_STATE_HISTORY;
            self.state_history.drain(..excess);
        }
    }

    /// The most recently entered state, if the workflow has started.
    pub fn current_state(&self) -> Option<State> {
        self.state_history.last().map(|h| h.state)
    }

    /// The current state's name, or the empty string for a fresh release.
    pub fn current_state_name(&self) -> &'static str {
        self.current_state().map(|s| s.as_str()).unwrap_or("")
    }

    /// Key used for the in-memory state machine registry.
    pub fn registry_key(&self) -> String {
        format!("{}-{}", self.name, self.namespace)
    }
}

/// Filter for listing releases.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Only return releases whose runtime plugin has this name.
    pub runtime: Option<String>,
}

impl ListOptions {
    pub fn runtime(name: &str) -> Self {
        Self {
            runtime: Some(name.to_string()),
        }
    }

    pub fn matches(&self, release: &Release) -> bool {
        match &self.runtime {
            Some(runtime) => release.runtime.plugin_name == *runtime,
            None => true,
        }
    }
}
