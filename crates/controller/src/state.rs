//! Lifecycle tracking for a single operation run.

use bastion_core::{types::OperationState, Error, Result};

/// Ordered record of the states an operation has passed through.
///
/// Every move is checked against [`OperationState::allowed_transitions`].
#[derive(Debug, Clone)]
pub struct StateTracker {
    history: Vec<OperationState>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self {
            history: vec![OperationState::Created],
        }
    }

    pub fn current(&self) -> OperationState {
        self.history
            .last()
            .copied()
            .unwrap_or(OperationState::Created)
    }

    pub fn advance(&mut self, to: OperationState) -> Result<()> {
        let from = self.current();
        if !from.can_transition_to(to) {
            return Err(Error::internal(format!("illegal transition {} -> {}", from, to)));
        }
        tracing::trace!(from = %from, to = %to, "State transition");
        self.history.push(to);
        Ok(())
    }

    /// Move to `Failed` from wherever the run currently is.
    pub fn fail(&mut self) {
        if self.current().can_transition_to(OperationState::Failed) {
            self.history.push(OperationState::Failed);
        }
    }

    pub fn history(&self) -> &[OperationState] {
        &self.history
    }

    pub fn reached(&self, state: OperationState) -> bool {
        self.history.contains(&state)
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use OperationState::*;

    #[test]
    fn test_happy_path() {
        let mut t = StateTracker::new();
        for s in [PreValidated, Authorized, CheckpointTaken, Executing, ResultValidated, Committed] {
            t.advance(s).unwrap();
        }
        assert_eq!(t.current(), Committed);
        assert_eq!(t.history().len(), 7);
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let mut t = StateTracker::new();
        let err = t.advance(Executing).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert_eq!(t.current(), Created);
    }

    #[test]
    fn test_fail_then_rollback_then_escalate() {
        let mut t = StateTracker::new();
        t.advance(PreValidated).unwrap();
        t.fail();
        t.advance(RolledBack).unwrap();
        t.advance(Escalated).unwrap();
        assert_eq!(t.history(), &[Created, PreValidated, Failed, RolledBack, Escalated]);
        assert!(t.reached(Failed));
    }

    #[test]
    fn test_fail_is_noop_after_commit() {
        let mut t = StateTracker::new();
        for s in [PreValidated, Authorized, Executing, ResultValidated, Committed] {
            t.advance(s).unwrap();
        }
        t.fail();
        assert_eq!(t.current(), Committed);
    }
}
