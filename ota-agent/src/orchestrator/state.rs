//! Update lifecycle states and the transitions allowed between them.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    Checking,
    NoUpdate,
    UpdateAvailable,
    Scheduled,
    Downloading,
    Verifying,
    Applying,
    Succeeded,
    Failed,
    RollbackAvailable,
    RollingBack,
    RolledBack,
    RollbackFailed,
}

impl LifecycleState {
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;

        match (self, next) {
            (Idle, Checking | UpdateAvailable | RollbackAvailable | RollbackFailed) => true,
            (Checking, NoUpdate | UpdateAvailable | Idle) => true,
            (NoUpdate, Idle) => true,
            (UpdateAvailable, Checking | Scheduled | Idle | RollbackAvailable | RollbackFailed) => {
                true
            }
            (Scheduled, Downloading | UpdateAvailable) => true,
            (Downloading, Verifying | Applying | Failed) => true,
            (Verifying, Downloading | Applying | Failed) => true,
            (Applying, Succeeded | Failed) => true,
            (Succeeded, Idle) => true,
            (Failed, Idle | RollbackAvailable | RollbackFailed) => true,
            (RollbackAvailable, RollingBack | Idle) => true,
            (RollingBack, RolledBack | RollbackFailed) => true,
            (RolledBack, Idle) => true,
            (RollbackFailed, Idle) => true,
            _ => false,
        }
    }

    /// An install or rollback is running.
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            LifecycleState::Downloading
                | LifecycleState::Verifying
                | LifecycleState::Applying
                | LifecycleState::RollingBack
        )
    }

    /// States from which a new update check may start.
    pub fn accepts_check(self) -> bool {
        matches!(self, LifecycleState::Idle | LifecycleState::UpdateAvailable)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Checking => "checking",
            LifecycleState::NoUpdate => "no_update",
            LifecycleState::UpdateAvailable => "update_available",
            LifecycleState::Scheduled => "scheduled",
            LifecycleState::Downloading => "downloading",
            LifecycleState::Verifying => "verifying",
            LifecycleState::Applying => "applying",
            LifecycleState::Succeeded => "succeeded",
            LifecycleState::Failed => "failed",
            LifecycleState::RollbackAvailable => "rollback_available",
            LifecycleState::RollingBack => "rolling_back",
            LifecycleState::RolledBack => "rolled_back",
            LifecycleState::RollbackFailed => "rollback_failed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::LifecycleState::*;
    use super::*;

    #[test]
    fn test_install_path_is_connected() {
        let path = [
            Idle,
            Checking,
            UpdateAvailable,
            Scheduled,
            Downloading,
            Verifying,
            Downloading,
            Verifying,
            Applying,
            Succeeded,
            Idle,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_rollback_branch() {
        assert!(Idle.can_transition_to(RollbackAvailable));
        assert!(Failed.can_transition_to(RollbackAvailable));
        assert!(RollbackAvailable.can_transition_to(RollingBack));
        assert!(RollingBack.can_transition_to(RolledBack));
        assert!(RollingBack.can_transition_to(RollbackFailed));
        assert!(RolledBack.can_transition_to(Idle));
    }

    #[test]
    fn test_forbidden_shortcuts() {
        assert!(!Idle.can_transition_to(Applying));
        assert!(!UpdateAvailable.can_transition_to(Downloading));
        assert!(!Scheduled.can_transition_to(RollingBack));
        assert!(!Applying.can_transition_to(Idle));
        assert!(!Checking.can_transition_to(Scheduled));
    }

    #[test]
    fn test_terminal_states_settle_to_idle() {
        for state in [NoUpdate, Succeeded, Failed, RolledBack, RollbackFailed] {
            assert!(state.can_transition_to(Idle), "{} cannot settle", state);
        }
    }

    #[test]
    fn test_serialized_name() {
        assert_eq!(
            serde_json::to_string(&RollbackAvailable).unwrap(),
            "\"rollback_available\""
        );
        assert_eq!(RollbackAvailable.to_string(), "rollback_available");
    }
}
