use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// Operation Lifecycle
// =============================================================================

/// Lifecycle state of an operation inside the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    Created,
    PreValidated,
    Authorized,
    CheckpointTaken,
    Executing,
    ResultValidated,
    /// Terminal success.
    Committed,
    Failed,
    /// Terminal failure, checkpoint restored.
    RolledBack,
    /// Terminal failure, notified out-of-band.
    Escalated,
}

impl OperationState {
    /// States reachable from `self`.
    pub fn allowed_transitions(self) -> &'static [OperationState] {
        use OperationState::*;
        match self {
            Created => &[PreValidated, Failed],
            PreValidated => &[Authorized, Failed],
            // Read-only profiles go straight to Executing.
            Authorized => &[CheckpointTaken, Executing, Failed],
            CheckpointTaken => &[Executing, Failed],
            Executing => &[ResultValidated, Failed],
            ResultValidated => &[Committed, Failed],
            Failed => &[RolledBack, Escalated],
            RolledBack => &[Escalated],
            Committed | Escalated => &[],
        }
    }

    pub fn can_transition_to(self, to: OperationState) -> bool {
        self.allowed_transitions().contains(&to)
    }

    /// Whether no further transition follows in a normal run.
    ///
    /// `Failed` is terminal only when nothing was rolled back or escalated;
    /// callers decide that from the recorded path.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack | Self::Escalated)
    }
}

impl std::fmt::Display for OperationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::PreValidated => "pre_validated",
            Self::Authorized => "authorized",
            Self::CheckpointTaken => "checkpoint_taken",
            Self::Executing => "executing",
            Self::ResultValidated => "result_validated",
            Self::Committed => "committed",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
            Self::Escalated => "escalated",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use OperationState::*;

    #[test]
    fn test_happy_path_is_allowed() {
        let path = [Created, PreValidated, Authorized, CheckpointTaken, Executing, ResultValidated, Committed];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_no_skipping_checks() {
        assert!(!Created.can_transition_to(Authorized));
        assert!(!PreValidated.can_transition_to(Executing));
        assert!(!Executing.can_transition_to(Committed));
        assert!(Committed.allowed_transitions().is_empty());
    }

    #[test]
    fn test_failure_paths() {
        assert!(Executing.can_transition_to(Failed));
        assert!(Failed.can_transition_to(RolledBack));
        assert!(RolledBack.can_transition_to(Escalated));
        assert!(!Committed.can_transition_to(Failed));
    }
}
