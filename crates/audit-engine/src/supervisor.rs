//! Worker handle supervision
//!
//! Every role runs as two tasks:
//! - the worker task, executing the opaque review
//! - a supervisor task, waiting on the worker under the role deadline
//!
//! The supervisor owns the role's output slot and its single terminal
//! transition. Output is published before `Complete` is recorded; a failed or
//! timed-out role has its slot withheld first, so a late worker can never
//! publish after the role went terminal.

use crate::slots::OutputSlots;
use crate::worker::ReviewWorker;
use audit_core::{FindingRecord, RunId, TaskDescriptor, TimeoutAction, WorkerError, WorkerRole, WorkerState};
use audit_ledger::{LedgerError, StatusLedger};
use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{AbortHandle, JoinError, JoinHandle};

/// Everything a supervisor needs to run one role
pub(crate) struct Assignment {
    pub(crate) run_id: RunId,
    pub(crate) role: WorkerRole,
    pub(crate) task: TaskDescriptor,
    pub(crate) worker: Arc<dyn ReviewWorker>,
    pub(crate) ledger: Arc<StatusLedger>,
    pub(crate) slots: Arc<OutputSlots>,
    pub(crate) deadline: Duration,
    pub(crate) on_timeout: TimeoutAction,
}

/// Handle to one supervised role
#[derive(Debug)]
pub struct WorkerHandle {
    /// Role under supervision
    pub role: WorkerRole,
    supervisor: JoinHandle<WorkerState>,
    worker: AbortHandle,
}

impl WorkerHandle {
    /// Wait for the supervisor to settle the role
    ///
    /// # Returns
    /// The role's terminal state as recorded on the ledger; `Failed` if the
    /// supervisor itself was cancelled
    pub async fn join(self) -> WorkerState {
        match self.supervisor.await {
            Ok(state) => state,
            Err(err) => {
                tracing::warn!(role = %self.role, error = %err, "supervisor task lost");
                WorkerState::Failed
            }
        }
    }

    /// Abort the worker task, leaving the supervisor to record the outcome
    pub fn abort_worker(&self) {
        self.worker.abort();
    }

    /// Check if the supervisor has settled the role
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.supervisor.is_finished()
    }
}

/// Start one role
///
/// Moves the role to `Running` before the worker is spawned, so callers that
/// spawn a whole batch see every role running before any is awaited.
///
/// # Errors
/// `LedgerError` if the role cannot enter `Running`; nothing is spawned then.
pub(crate) fn spawn(assignment: Assignment) -> Result<WorkerHandle, LedgerError> {
    assignment
        .ledger
        .mark_running(&assignment.run_id, assignment.role)?;

    let worker = Arc::clone(&assignment.worker);
    let task = assignment.task.clone();
    let role = assignment.role;
    let worker_task: JoinHandle<Result<Vec<FindingRecord>, WorkerError>> =
        tokio::spawn(async move { worker.review(role, &task).await });
    let abort = worker_task.abort_handle();

    let supervisor = tokio::spawn(supervise(assignment, worker_task));
    Ok(WorkerHandle {
        role,
        supervisor,
        worker: abort,
    })
}

async fn supervise(
    assignment: Assignment,
    mut worker_task: JoinHandle<Result<Vec<FindingRecord>, WorkerError>>,
) -> WorkerState {
    let Assignment {
        run_id,
        role,
        ledger,
        slots,
        deadline,
        on_timeout,
        ..
    } = assignment;
    let started = Instant::now();

    let outcome = tokio::time::timeout(deadline, &mut worker_task).await;
    let settled = match outcome {
        Ok(Ok(Ok(findings))) => {
            let count = findings.len();
            match slots.publish(role, findings) {
                Ok(()) => {
                    tracing::debug!(run_id = %run_id, %role, findings = count, "slot published");
                    settle(&ledger, &run_id, role, WorkerState::Complete, None)
                }
                Err(err) => {
                    tracing::warn!(run_id = %run_id, %role, error = %err, "slot not published");
                    settle(&ledger, &run_id, role, WorkerState::Failed, Some(err.to_string()))
                }
            }
        }
        Ok(Ok(Err(err))) => {
            tracing::warn!(run_id = %run_id, %role, error = %err, "worker failed");
            withhold(&slots, role);
            settle(&ledger, &run_id, role, WorkerState::Failed, Some(err.to_string()))
        }
        Ok(Err(join_err)) => {
            let cause = join_failure(join_err);
            tracing::warn!(run_id = %run_id, %role, error = %cause, "worker task died");
            withhold(&slots, role);
            settle(&ledger, &run_id, role, WorkerState::Failed, Some(cause.to_string()))
        }
        Err(_) => {
            withhold(&slots, role);
            match on_timeout {
                TimeoutAction::Abort => worker_task.abort(),
                TimeoutAction::Detach => drop(worker_task),
            }
            tracing::warn!(
                run_id = %run_id,
                %role,
                deadline_ms = deadline.as_millis(),
                action = ?on_timeout,
                "worker deadline elapsed"
            );
            settle(
                &ledger,
                &run_id,
                role,
                WorkerState::TimedOut,
                Some(format!("no completion within {}ms", deadline.as_millis())),
            )
        }
    };

    metrics::counter!("audit_worker_terminal_total", "state" => settled.to_string()).increment(1);
    metrics::histogram!("audit_worker_duration_seconds").record(started.elapsed().as_secs_f64());
    settled
}

fn withhold(slots: &OutputSlots, role: WorkerRole) {
    if let Err(err) = slots.withhold(role) {
        tracing::warn!(%role, error = %err, "slot could not be withheld");
    }
}

/// Apply the terminal transition, or report what somebody else already applied
fn settle(
    ledger: &StatusLedger,
    run_id: &RunId,
    role: WorkerRole,
    to: WorkerState,
    cause: Option<String>,
) -> WorkerState {
    let applied = match (to, cause) {
        (WorkerState::Complete, _) => ledger.mark_complete(run_id, role),
        (WorkerState::TimedOut, cause) => {
            ledger.mark_timed_out(run_id, role, cause.unwrap_or_default())
        }
        (_, cause) => ledger.mark_failed(run_id, role, cause.unwrap_or_default()),
    };
    match applied {
        Ok(status) => status.status,
        Err(err) => {
            tracing::debug!(run_id = %run_id, %role, error = %err, "terminal transition lost");
            ledger
                .read(run_id)
                .ok()
                .and_then(|state| state.status(role).map(|s| s.status))
                .unwrap_or(WorkerState::Failed)
        }
    }
}

fn join_failure(err: JoinError) -> WorkerError {
    if err.is_panic() {
        WorkerError::Panicked(panic_message(err.into_panic().as_ref()))
    } else {
        WorkerError::failed("worker task cancelled")
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::worker_fn;
    use audit_core::{Classification, Severity};

    fn assignment(
        worker: Arc<dyn ReviewWorker>,
        deadline: Duration,
        on_timeout: TimeoutAction,
    ) -> (Assignment, Arc<StatusLedger>, Arc<OutputSlots>) {
        let ledger = Arc::new(StatusLedger::new());
        let run_id = RunId::new("sup-1");
        ledger
            .create(run_id.clone(), TaskDescriptor::new("t"), &[WorkerRole::Security])
            .unwrap();
        let slots = Arc::new(OutputSlots::new(&[WorkerRole::Security]));
        let assignment = Assignment {
            run_id,
            role: WorkerRole::Security,
            task: TaskDescriptor::new("t"),
            worker,
            ledger: Arc::clone(&ledger),
            slots: Arc::clone(&slots),
            deadline,
            on_timeout,
        };
        (assignment, ledger, slots)
    }

    #[tokio::test]
    async fn completion_publishes_then_completes() {
        let worker = worker_fn(|_, _| async {
            Ok(vec![FindingRecord::new(
                "SEC-1",
                Severity::Blocker,
                Classification::Violation,
                "a.rs",
                "leak",
            )])
        });
        let (a, ledger, slots) = assignment(worker, Duration::from_secs(5), TimeoutAction::Detach);
        let run_id = a.run_id.clone();

        let handle = spawn(a).unwrap();
        assert_eq!(handle.join().await, WorkerState::Complete);
        assert_eq!(slots.findings(WorkerRole::Security).unwrap().len(), 1);
        assert!(ledger.is_run_complete(&run_id).unwrap());
    }

    #[tokio::test]
    async fn spawn_marks_running_immediately() {
        let worker = worker_fn(|_, _| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(vec![])
        });
        let (a, ledger, _) = assignment(worker, Duration::from_secs(5), TimeoutAction::Detach);
        let run_id = a.run_id.clone();

        let handle = spawn(a).unwrap();
        let state = ledger.read(&run_id).unwrap();
        assert_eq!(state.status(WorkerRole::Security).unwrap().status, WorkerState::Running);
        handle.join().await;
    }

    #[tokio::test]
    async fn error_is_recorded_and_slot_withheld() {
        let worker = worker_fn(|_, _| async { Err(WorkerError::failed("model unavailable")) });
        let (a, ledger, slots) = assignment(worker, Duration::from_secs(5), TimeoutAction::Detach);
        let run_id = a.run_id.clone();

        assert_eq!(spawn(a).unwrap().join().await, WorkerState::Failed);
        let state = ledger.read(&run_id).unwrap();
        let status = state.status(WorkerRole::Security).unwrap();
        assert!(status.error_cause.as_deref().unwrap().contains("model unavailable"));
        assert!(slots.is_closed(WorkerRole::Security));
        assert!(slots.findings(WorkerRole::Security).is_none());
    }

    #[tokio::test]
    async fn panic_is_caught_as_failure() {
        let worker = worker_fn(|_, _| async {
            if true {
                panic!("reviewer exploded");
            }
            Ok(vec![])
        });
        let (a, ledger, _) = assignment(worker, Duration::from_secs(5), TimeoutAction::Detach);
        let run_id = a.run_id.clone();

        assert_eq!(spawn(a).unwrap().join().await, WorkerState::Failed);
        let state = ledger.read(&run_id).unwrap();
        let cause = state.status(WorkerRole::Security).unwrap().error_cause.clone().unwrap();
        assert!(cause.contains("reviewer exploded"), "{cause}");
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_times_out_and_late_output_is_ignored() {
        let worker = worker_fn(|_, _| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(vec![FindingRecord::new(
                "SEC-9",
                Severity::Blocker,
                Classification::Violation,
                "late.rs",
                "too late",
            )])
        });
        let (a, ledger, slots) = assignment(worker, Duration::from_secs(1), TimeoutAction::Detach);
        let run_id = a.run_id.clone();

        assert_eq!(spawn(a).unwrap().join().await, WorkerState::TimedOut);
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert!(slots.findings(WorkerRole::Security).is_none());
        let state = ledger.read(&run_id).unwrap();
        assert_eq!(state.status(WorkerRole::Security).unwrap().status, WorkerState::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_action_cancels_worker() {
        let finished = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let worker = worker_fn(move |_, _| {
            let flag = Arc::clone(&flag);
            async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(vec![])
            }
        });
        let (a, _, _) = assignment(worker, Duration::from_secs(1), TimeoutAction::Abort);

        assert_eq!(spawn(a).unwrap().join().await, WorkerState::TimedOut);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(!finished.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn panic_payloads_are_rendered() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42_u8), "non-string panic payload");
    }
}
