//! The lifecycle transition table.

use voxkit_types::agent::{GeneralAction, GeneralEvent, GeneralState};
use voxkit_types::error::{ServiceError, ServiceResult};

/// One row of the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub action: GeneralAction,
    /// States the action may start from.
    pub from: &'static [GeneralState],
    /// State held while the backend works, if any.
    pub via: Option<GeneralState>,
    pub to: GeneralState,
    pub event: GeneralEvent,
}

/// States in which an agent is up and may be stopped or suspended.
pub const RUNNING: &[GeneralState] = &[
    GeneralState::Activated,
    GeneralState::Started,
    GeneralState::Slept,
];

const TABLE: &[Transition] = &[
    Transition {
        action: GeneralAction::TimeSync,
        from: &[GeneralState::TimeSyncing],
        via: None,
        to: GeneralState::Ready,
        event: GeneralEvent::TimeSynced,
    },
    Transition {
        action: GeneralAction::Activate,
        from: &[GeneralState::Ready],
        via: Some(GeneralState::Activating),
        to: GeneralState::Activated,
        event: GeneralEvent::Activated,
    },
    Transition {
        action: GeneralAction::Start,
        from: &[GeneralState::Activated],
        via: Some(GeneralState::Starting),
        to: GeneralState::Started,
        event: GeneralEvent::Started,
    },
    Transition {
        action: GeneralAction::Sleep,
        from: &[GeneralState::Started],
        via: Some(GeneralState::Sleeping),
        to: GeneralState::Slept,
        event: GeneralEvent::Slept,
    },
    Transition {
        action: GeneralAction::WakeUp,
        from: &[GeneralState::Slept],
        via: Some(GeneralState::WakingUp),
        to: GeneralState::Started,
        event: GeneralEvent::Awake,
    },
    Transition {
        action: GeneralAction::Stop,
        from: RUNNING,
        via: Some(GeneralState::Stopping),
        to: GeneralState::Ready,
        event: GeneralEvent::Stopped,
    },
];

/// The table row for `action`.
pub fn transition(action: GeneralAction) -> &'static Transition {
    let row = match action {
        GeneralAction::TimeSync => 0,
        GeneralAction::Activate => 1,
        GeneralAction::Start => 2,
        GeneralAction::Sleep => 3,
        GeneralAction::WakeUp => 4,
        GeneralAction::Stop => 5,
    };
    &TABLE[row]
}

/// The event reported when `action` completes or fails.
pub fn event_for(action: GeneralAction) -> GeneralEvent {
    transition(action).event
}

/// Look up the transition for `action` out of `state`.
pub fn plan(state: GeneralState, action: GeneralAction) -> ServiceResult<&'static Transition> {
    let t = transition(action);
    if t.from.contains(&state) {
        Ok(t)
    } else {
        Err(ServiceError::invalid_state(state, action))
    }
}

/// Where a freshly selected agent starts.
pub fn initial_state(requires_time_sync: bool) -> GeneralState {
    if requires_time_sync {
        GeneralState::TimeSyncing
    } else {
        GeneralState::Ready
    }
}

pub fn is_running(state: GeneralState) -> bool {
    RUNNING.contains(&state)
}

/// Whether `state` only exists while a transition is in flight.
pub fn is_transient(state: GeneralState) -> bool {
    TABLE.iter().any(|t| t.via == Some(state))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_action_has_a_row() {
        for action in GeneralAction::ALL {
            assert_eq!(transition(*action).action, *action);
        }
    }

    #[test]
    fn test_happy_path_sequence() {
        let mut state = initial_state(true);
        for action in [
            GeneralAction::TimeSync,
            GeneralAction::Activate,
            GeneralAction::Start,
            GeneralAction::Sleep,
            GeneralAction::WakeUp,
            GeneralAction::Stop,
        ] {
            state = plan(state, action).unwrap().to;
        }
        assert_eq!(state, GeneralState::Ready);
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(plan(GeneralState::Ready, GeneralAction::Start).is_err());
        assert!(plan(GeneralState::Ready, GeneralAction::Stop).is_err());
        assert!(plan(GeneralState::TimeSyncing, GeneralAction::Activate).is_err());
        assert!(plan(GeneralState::Activated, GeneralAction::Sleep).is_err());
        let err = plan(GeneralState::Started, GeneralAction::WakeUp).unwrap_err();
        assert_eq!(err, ServiceError::invalid_state("Started", "WakeUp"));
    }

    #[test]
    fn test_stop_allowed_from_running_states() {
        for state in RUNNING {
            assert_eq!(plan(*state, GeneralAction::Stop).unwrap().to, GeneralState::Ready);
        }
    }

    #[test]
    fn test_transient_states() {
        assert!(is_transient(GeneralState::Activating));
        assert!(is_transient(GeneralState::Stopping));
        assert!(!is_transient(GeneralState::TimeSyncing));
        assert!(!is_transient(GeneralState::Started));
        assert!(is_running(GeneralState::Slept));
        assert!(!is_running(GeneralState::Ready));
    }
}
