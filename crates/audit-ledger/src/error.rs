//! Ledger errors

use audit_core::{RunId, WorkerRole, WorkerState};

/// Status ledger errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// Run identifier already in use
    #[error("run {0} already exists")]
    DuplicateRun(RunId),

    /// No run with this identifier
    #[error("run {0} not found")]
    UnknownRun(RunId),

    /// Role is not part of the run
    #[error("role {role} is not part of run {run_id}")]
    UnknownRole {
        /// Run identifier
        run_id: RunId,
        /// Offending role
        role: WorkerRole,
    },

    /// Transition not allowed by the lifecycle state machine
    #[error("invalid transition for role {role}: {from} -> {to}")]
    InvalidTransition {
        /// Role being transitioned
        role: WorkerRole,
        /// Current state
        from: WorkerState,
        /// Requested state
        to: WorkerState,
    },

    /// Run already carries a verdict
    #[error("run {0} is sealed")]
    RunSealed(RunId),

    /// Some roles are not terminal yet
    #[error("run {0} still has outstanding roles")]
    RunNotComplete(RunId),

    /// Run created without roles
    #[error("a run needs at least one role")]
    NoRoles,

    /// Role listed twice at creation
    #[error("role {0} listed more than once")]
    DuplicateRole(WorkerRole),
}

impl LedgerError {
    /// Check if the caller must pick a new run identifier
    #[inline]
    #[must_use]
    pub fn is_duplicate_run(&self) -> bool {
        matches!(self, Self::DuplicateRun(_))
    }

    /// Check if this is a rejected lifecycle transition
    #[inline]
    #[must_use]
    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_display() {
        let err = LedgerError::InvalidTransition {
            role: WorkerRole::Build,
            from: WorkerState::Complete,
            to: WorkerState::Failed,
        };
        assert_eq!(
            err.to_string(),
            "invalid transition for role build: complete -> failed"
        );
        assert!(err.is_invalid_transition());
        assert!(!err.is_duplicate_run());
    }
}
