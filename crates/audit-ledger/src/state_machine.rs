//! Worker lifecycle state machine

use audit_core::WorkerState;

/// States reachable in one step from `from`
#[must_use]
pub fn allowed_transitions(from: WorkerState) -> &'static [WorkerState] {
    use WorkerState::*;
    match from {
        Pending => &[Running],
        Running => &[Complete, Failed, TimedOut],
        Complete | Failed | TimedOut => &[],
    }
}

/// Check whether `from -> to` is legal
#[inline]
#[must_use]
pub fn is_allowed(from: WorkerState, to: WorkerState) -> bool {
    allowed_transitions(from).contains(&to)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_have_no_exits() {
        for state in [WorkerState::Complete, WorkerState::Failed, WorkerState::TimedOut] {
            assert!(allowed_transitions(state).is_empty());
        }
    }

    #[test]
    fn pending_cannot_skip_running() {
        assert!(is_allowed(WorkerState::Pending, WorkerState::Running));
        assert!(!is_allowed(WorkerState::Pending, WorkerState::Complete));
        assert!(!is_allowed(WorkerState::Pending, WorkerState::TimedOut));
    }

    #[test]
    fn no_self_loops() {
        for state in [
            WorkerState::Pending,
            WorkerState::Running,
            WorkerState::Complete,
            WorkerState::Failed,
            WorkerState::TimedOut,
        ] {
            assert!(!is_allowed(state, state));
        }
    }
}
