//! Workflow events and the transition table.

use std::fmt;

use canopy_state::State;

/// Events that move a release between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Configure,
    Configured,
    Deploy,
    Deployed,
    /// The candidate is healthy; carries the candidate traffic share to apply.
    Healthy(u32),
    Scaled,
    Complete,
    Promoted,
    Unhealthy,
    Fail,
    Destroy,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::Configure => "event_configure",
            Event::Configured => "event_configured",
            Event::Deploy => "event_deploy",
            Event::Deployed => "event_deployed",
            Event::Healthy(_) => "event_healthy",
            Event::Scaled => "event_scaled",
            Event::Complete => "event_complete",
            Event::Promoted => "event_promoted",
            Event::Unhealthy => "event_unhealthy",
            Event::Fail => "event_fail",
            Event::Destroy => "event_destroy",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination of `event` from `from`, or `None` when the event is illegal there.
pub fn next_state(from: State, event: Event) -> Option<State> {
    match (event, from) {
        (Event::Configure, State::Start | State::Idle | State::Fail) => Some(State::Configure),
        (Event::Configured, State::Configure) => Some(State::Idle),
        (Event::Deploy, State::Idle | State::Fail) => Some(State::Deploy),
        (Event::Deployed, State::Deploy) => Some(State::Monitor),
        (Event::Healthy(_), State::Monitor) => Some(State::Scale),
        (Event::Scaled, State::Scale) => Some(State::Monitor),
        (Event::Complete, State::Monitor) => Some(State::Promote),
        (Event::Complete, State::Deploy | State::Rollback | State::Destroy) => Some(State::Idle),
        (Event::Promoted, State::Promote) => Some(State::Idle),
        (Event::Unhealthy, State::Monitor) => Some(State::Rollback),
        (Event::Fail, _) => Some(State::Fail),
        (Event::Destroy, State::Start | State::Destroy) => None,
        (Event::Destroy, _) => Some(State::Destroy),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        assert_eq!(next_state(State::Start, Event::Configure), Some(State::Configure));
        assert_eq!(next_state(State::Configure, Event::Configured), Some(State::Idle));
        assert_eq!(next_state(State::Idle, Event::Deploy), Some(State::Deploy));
        assert_eq!(next_state(State::Deploy, Event::Deployed), Some(State::Monitor));
        assert_eq!(next_state(State::Monitor, Event::Healthy(20)), Some(State::Scale));
        assert_eq!(next_state(State::Scale, Event::Scaled), Some(State::Monitor));
        assert_eq!(next_state(State::Monitor, Event::Complete), Some(State::Promote));
        assert_eq!(next_state(State::Promote, Event::Promoted), Some(State::Idle));
    }

    #[test]
    fn complete_depends_on_source_state() {
        assert_eq!(next_state(State::Deploy, Event::Complete), Some(State::Idle));
        assert_eq!(next_state(State::Rollback, Event::Complete), Some(State::Idle));
        assert_eq!(next_state(State::Destroy, Event::Complete), Some(State::Idle));
        assert_eq!(next_state(State::Idle, Event::Complete), None);
        assert_eq!(next_state(State::Scale, Event::Complete), None);
    }

    #[test]
    fn fail_is_legal_everywhere() {
        for state in State::ALL {
            assert_eq!(next_state(state, Event::Fail), Some(State::Fail), "from {state}");
        }
    }

    #[test]
    fn destroy_sources() {
        for state in State::ALL {
            let expected = match state {
                State::Start | State::Destroy => None,
                _ => Some(State::Destroy),
            };
            assert_eq!(next_state(state, Event::Destroy), expected, "from {state}");
        }
    }

    #[test]
    fn deploy_only_from_resting_states() {
        for state in State::ALL {
            let legal = next_state(state, Event::Deploy).is_some();
            assert_eq!(legal, state.is_resting(), "from {state}");
        }
    }

    #[test]
    fn illegal_events_are_rejected() {
        assert_eq!(next_state(State::Monitor, Event::Deploy), None);
        assert_eq!(next_state(State::Deploy, Event::Configure), None);
        assert_eq!(next_state(State::Idle, Event::Scaled), None);
        assert_eq!(next_state(State::Scale, Event::Healthy(10)), None);
    }

    #[test]
    fn event_names() {
        assert_eq!(Event::Healthy(40).to_string(), "event_healthy");
        assert_eq!(Event::Configured.as_str(), "event_configured");
    }
}
