use crate::CoreError;
use std::fmt;

/// Lifecycle state of a container.
///
/// `Created` and `Stopped` share one stored representation
/// (`running == false`), so a stored record only ever reads back as
/// `Stopped` or `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    Stopped,
    Removed,
}

impl ContainerState {
    pub fn from_running(running: bool) -> Self {
        if running {
            Self::Running
        } else {
            Self::Stopped
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Removed => write!(f, "removed"),
        }
    }
}

pub fn validate_transition(
    uid: &str,
    from: ContainerState,
    to: ContainerState,
) -> Result<(), CoreError> {
    use ContainerState::{Created, Removed, Running, Stopped};

    let valid = matches!(
        (from, to),
        (Created | Stopped, Running | Removed) | (Running, Stopped)
    );
    if valid {
        return Ok(());
    }

    let reason = match (from, to) {
        (Running, Running) => format!("container {uid} is already running"),
        (Created | Stopped, Stopped) => format!("container {uid} is not running"),
        (Running, Removed) => format!("container {uid} is running, stop it first"),
        (from, to) => format!("container {uid} cannot go from {from} to {to}"),
    };
    Err(CoreError::transition(uid, reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ContainerState::{Created, Removed, Running, Stopped};

    #[test]
    fn valid_transitions() {
        assert!(validate_transition("c", Created, Running).is_ok());
        assert!(validate_transition("c", Stopped, Running).is_ok());
        assert!(validate_transition("c", Running, Stopped).is_ok());
        assert!(validate_transition("c", Created, Removed).is_ok());
        assert!(validate_transition("c", Stopped, Removed).is_ok());
    }

    #[test]
    fn invalid_transitions() {
        assert!(validate_transition("c", Running, Running).is_err());
        assert!(validate_transition("c", Stopped, Stopped).is_err());
        assert!(validate_transition("c", Created, Stopped).is_err());
        assert!(validate_transition("c", Running, Removed).is_err());
        assert!(validate_transition("c", Removed, Running).is_err());
        assert!(validate_transition("c", Removed, Removed).is_err());
    }

    #[test]
    fn guard_messages_name_the_container() {
        let err = validate_transition("4f1c2a9be0", Running, Running).unwrap_err();
        assert!(err.to_string().contains("4f1c2a9be0 is already running"));

        let err = validate_transition("4f1c2a9be0", Stopped, Stopped).unwrap_err();
        assert!(err.to_string().contains("is not running"));

        let err = validate_transition("4f1c2a9be0", Running, Removed).unwrap_err();
        assert!(err.to_string().contains("stop it first"));
    }

    #[test]
    fn stored_flag_maps_to_state() {
        assert_eq!(ContainerState::from_running(true), Running);
        assert_eq!(ContainerState::from_running(false), Stopped);
    }
}
