use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a dedicated execution unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Built with its logic instance, loop not yet running
    Created,
    /// Loop running and accepting signals
    Running,
    /// Cancellation requested, loop finishing its current message
    StopRequested,
    /// Loop exited
    Stopped,
}

impl ExecutionState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// Whether the unit accepts message signals
    pub fn accepts_messages(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Whether a transition from `self` to `next` is allowed
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Running)
                | (Self::Created, Self::Stopped)
                | (Self::Running, Self::StopRequested)
                | (Self::StopRequested, Self::Stopped)
        )
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::StopRequested => write!(f, "stop_requested"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

impl std::str::FromStr for ExecutionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "running" => Ok(Self::Running),
            "stop_requested" => Ok(Self::StopRequested),
            "stopped" => Ok(Self::Stopped),
            _ => Err(format!("Invalid execution state: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        use ExecutionState::*;
        assert!(Created.can_transition_to(Running));
        assert!(Created.can_transition_to(Stopped));
        assert!(Running.can_transition_to(StopRequested));
        assert!(StopRequested.can_transition_to(Stopped));

        assert!(!Running.can_transition_to(Created));
        assert!(!Stopped.can_transition_to(Running));
        assert!(!StopRequested.can_transition_to(Running));
        assert!(Stopped.is_terminal());
        assert!(Running.accepts_messages());
        assert!(!StopRequested.accepts_messages());
    }

    #[test]
    fn test_string_roundtrip() {
        for state in [
            ExecutionState::Created,
            ExecutionState::Running,
            ExecutionState::StopRequested,
            ExecutionState::Stopped,
        ] {
            assert_eq!(state.to_string().parse::<ExecutionState>(), Ok(state));
        }
        assert_eq!(
            serde_json::to_string(&ExecutionState::StopRequested).unwrap(),
            "\"stop_requested\""
        );
    }
}
