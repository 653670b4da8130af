//! Orchestrator
//!
//! Owns the lifecycle of every run started through it:
//! - `start_run` registers the run and spawns all roles in one batch
//! - `await_completion` polls the ledger until every role is terminal or the
//!   run-wide deadline forces the stragglers to `TimedOut`
//! - `finalize` aggregates, persists and seals the verdict exactly once
//! - `forget` releases a finalized run

use crate::aggregator::Aggregator;
use crate::error::{OrchestratorError, WorkspaceError};
use crate::slots::OutputSlots;
use crate::supervisor::{self, Assignment, WorkerHandle};
use crate::worker::WorkerSet;
use crate::workspace::{RunWorkspace, WorkspaceRegistry};
use audit_core::{AuditConfig, RerunPolicy, RunId, RunState, TaskDescriptor, TimeoutAction, Verdict, WorkerRole, WorkerState};
use audit_ledger::{LedgerError, LedgerObserver, StatusLedger};
use dashmap::DashMap;
use futures::future::join_all;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Per-run bookkeeping held by the orchestrator
struct ActiveRun {
    slots: Arc<OutputSlots>,
    handles: Mutex<Vec<WorkerHandle>>,
    started: Instant,
    verdict: OnceCell<Verdict>,
}

/// Run lifecycle owner
pub struct Orchestrator {
    config: AuditConfig,
    workers: WorkerSet,
    ledger: Arc<StatusLedger>,
    workspaces: Arc<WorkspaceRegistry>,
    runs: DashMap<RunId, Arc<ActiveRun>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("workers", &self.workers)
            .field("runs", &self.runs.len())
            .finish()
    }
}

impl Orchestrator {
    /// Create orchestrator
    ///
    /// # Errors
    /// `OrchestratorError::Config` if `config` fails validation.
    pub fn new(config: AuditConfig, workers: WorkerSet) -> Result<Self, OrchestratorError> {
        config.validate()?;
        let workspaces = Arc::new(WorkspaceRegistry::new());
        let observer: Arc<dyn LedgerObserver> = workspaces.clone();
        Ok(Self {
            config,
            workers,
            ledger: Arc::new(StatusLedger::with_observer(observer)),
            workspaces,
            runs: DashMap::new(),
        })
    }

    /// Start a run under a freshly generated identifier
    ///
    /// # Errors
    /// As [`Orchestrator::start_run_with_id`].
    pub fn start_run(&self, task: TaskDescriptor, roles: &[WorkerRole]) -> Result<RunId, OrchestratorError> {
        self.start_run_with_id(RunId::generate(), task, roles)
    }

    /// Start a run under a caller supplied identifier
    ///
    /// Every role is moved to `Running` and spawned before this returns; none
    /// is awaited.
    ///
    /// # Arguments
    /// * `run_id` - Identifier; collisions are governed by the rerun policy
    /// * `task` - Unit of work handed to every worker
    /// * `roles` - Roles to consult, each at most once
    ///
    /// # Errors
    /// - `OrchestratorError::DuplicateRun` if the id is taken and cannot be archived
    /// - `OrchestratorError::NoRuntime` outside a Tokio runtime
    /// - `OrchestratorError::Ledger` for an empty or repeated role list
    /// - `OrchestratorError::Workspace` if the run directory cannot be created
    pub fn start_run_with_id(
        &self,
        run_id: RunId,
        task: TaskDescriptor,
        roles: &[WorkerRole],
    ) -> Result<RunId, OrchestratorError> {
        tokio::runtime::Handle::try_current().map_err(|_| OrchestratorError::NoRuntime)?;
        self.clear_previous(&run_id)?;

        let workspace = self.open_workspace(&run_id)?;
        if let Err(err) = self.ledger.create(run_id.clone(), task.clone(), roles) {
            self.workspaces.unregister(&run_id);
            if let Some(ws) = &workspace {
                // the directory was created by this call; the ledger refused the run
                if let Err(e) = std::fs::remove_dir_all(ws.dir()) {
                    tracing::warn!(run_id = %run_id, dir = %ws.dir().display(), error = %e, "failed to remove run workspace");
                }
            }
            return Err(err.into());
        }

        let slots = Arc::new(match &workspace {
            Some(ws) => OutputSlots::with_workspace(roles, Arc::clone(ws)),
            None => OutputSlots::new(roles),
        });

        let started = Instant::now();
        let mut handles = Vec::with_capacity(roles.len());
        for role in roles {
            let assignment = Assignment {
                run_id: run_id.clone(),
                role: *role,
                task: task.clone(),
                worker: self.workers.resolve(*role),
                ledger: Arc::clone(&self.ledger),
                slots: Arc::clone(&slots),
                deadline: self.config.role_timeout(),
                on_timeout: self.config.on_timeout,
            };
            match supervisor::spawn(assignment) {
                Ok(handle) => handles.push(handle),
                Err(err) => tracing::warn!(run_id = %run_id, %role, error = %err, "role not started"),
            }
        }

        self.runs.insert(
            run_id.clone(),
            Arc::new(ActiveRun {
                slots,
                handles: Mutex::new(handles),
                started,
                verdict: OnceCell::new(),
            }),
        );

        metrics::counter!("audit_runs_started_total").increment(1);
        tracing::info!(run_id = %run_id, task = %task.reference, roles = roles.len(), "run started");
        Ok(run_id)
    }

    /// Wait until every role is terminal or the run-wide deadline elapses
    ///
    /// The deadline counts from `start_run`. When it elapses, roles still
    /// outstanding are forced to `TimedOut`; this never fails because of
    /// slow or broken workers.
    ///
    /// # Arguments
    /// * `run_id` - Run to wait for
    /// * `poll_interval` - Ledger polling period
    /// * `global_deadline` - Run-wide limit measured from run start
    ///
    /// # Returns
    /// Snapshot of the terminal run
    ///
    /// # Errors
    /// `OrchestratorError::UnknownRun` if the run was not started here.
    pub async fn await_completion(
        &self,
        run_id: &RunId,
        poll_interval: Duration,
        global_deadline: Duration,
    ) -> Result<RunState, OrchestratorError> {
        let run = self.active(run_id)?;
        let deadline = run.started + global_deadline;
        let poll = poll_interval.max(Duration::from_millis(1));

        let mut forced = Vec::new();
        loop {
            if self.ledger.is_run_complete(run_id)? {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                forced = self.force_outstanding(run_id, &run, global_deadline)?;
                break;
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }

        let settled: Vec<WorkerHandle> = {
            let mut handles = run.handles.lock();
            let (settled, abandoned): (Vec<_>, Vec<_>) =
                handles.drain(..).partition(|h| !forced.contains(&h.role));
            *handles = abandoned;
            settled
        };
        let states = join_all(settled.into_iter().map(WorkerHandle::join)).await;
        tracing::debug!(run_id = %run_id, joined = states.len(), forced = forced.len(), "supervisors drained");

        Ok(self.ledger.read(run_id)?)
    }

    /// Aggregate the run, persist the verdict and seal the run
    ///
    /// Calling it again returns the verdict produced the first time.
    ///
    /// # Errors
    /// - `OrchestratorError::UnknownRun`
    /// - `OrchestratorError::RunNotComplete` while any role is outstanding
    /// - `OrchestratorError::Workspace` if `verdict.json` cannot be written
    pub fn finalize(&self, run_id: &RunId) -> Result<Verdict, OrchestratorError> {
        let run = self.active(run_id)?;
        let verdict = run.verdict.get_or_try_init(|| self.seal(run_id, &run))?;
        Ok(verdict.clone())
    }

    /// Start, await and finalize in one call using the configured timings
    ///
    /// # Errors
    /// As [`Orchestrator::start_run`] and [`Orchestrator::finalize`].
    pub async fn run(
        &self,
        task: TaskDescriptor,
        roles: &[WorkerRole],
    ) -> Result<(RunState, Verdict), OrchestratorError> {
        let run_id = self.start_run(task, roles)?;
        self.await_completion(&run_id, self.config.poll_interval(), self.config.global_timeout())
            .await?;
        let verdict = self.finalize(&run_id)?;
        let state = self.ledger.read(&run_id)?;
        Ok((state, verdict))
    }

    /// Release a finalized run
    ///
    /// Removes it from the ledger and from this orchestrator and stops
    /// mirroring its workspace; documents on disk are kept. Workers that were
    /// detached by a deadline are left to finish on their own.
    ///
    /// # Returns
    /// The run's sealed state
    ///
    /// # Errors
    /// - `OrchestratorError::UnknownRun`
    /// - `OrchestratorError::RunNotComplete` until [`Orchestrator::finalize`] succeeded
    pub fn forget(&self, run_id: &RunId) -> Result<RunState, OrchestratorError> {
        let run = self.active(run_id)?;
        if run.verdict.get().is_none() {
            return Err(OrchestratorError::RunNotComplete(run_id.clone()));
        }
        let state = self.ledger.retire(run_id)?;
        self.workspaces.unregister(run_id);
        self.runs.remove(run_id);
        let abandoned = run.handles.lock().len();
        tracing::debug!(run_id = %run_id, abandoned, "run released");
        Ok(state)
    }

    /// Shared status ledger
    #[inline]
    #[must_use]
    pub fn ledger(&self) -> &Arc<StatusLedger> {
        &self.ledger
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    /// Output slots of a run
    #[must_use]
    pub fn slots(&self, run_id: &RunId) -> Option<Arc<OutputSlots>> {
        self.runs.get(run_id).map(|r| Arc::clone(&r.slots))
    }

    /// On-disk workspace of a run, when one is configured
    #[must_use]
    pub fn workspace(&self, run_id: &RunId) -> Option<Arc<RunWorkspace>> {
        self.workspaces.get(run_id)
    }

    fn seal(&self, run_id: &RunId, run: &ActiveRun) -> Result<Verdict, OrchestratorError> {
        let state = self.ledger.read(run_id)?;
        let verdict = Aggregator::aggregate(&state, &run.slots)?;
        if let Some(workspace) = self.workspaces.get(run_id) {
            workspace.write_verdict(&verdict)?;
        }
        self.ledger.attach_verdict(run_id, verdict.to_ref()?)?;
        self.workspaces.flush(run_id);

        metrics::counter!("audit_verdicts_total", "recommendation" => verdict.recommendation.to_string())
            .increment(1);
        tracing::info!(
            run_id = %run_id,
            recommendation = %verdict.recommendation,
            blockers = verdict.blockers.len(),
            missing = ?verdict.missing_perspectives,
            "run finalized"
        );
        Ok(verdict)
    }

    /// Move every outstanding role to `TimedOut`
    fn force_outstanding(
        &self,
        run_id: &RunId,
        run: &ActiveRun,
        global_deadline: Duration,
    ) -> Result<Vec<WorkerRole>, OrchestratorError> {
        let state = self.ledger.read(run_id)?;
        let outstanding = state.outstanding_roles();
        let cause = format!("run deadline of {}ms elapsed", global_deadline.as_millis());

        for role in &outstanding {
            if let Err(err) = run.slots.withhold(*role) {
                tracing::warn!(run_id = %run_id, %role, error = %err, "slot could not be withheld");
            }
            if state.status(*role).map(|s| s.status) == Some(WorkerState::Pending) {
                ignore_lost_race(self.ledger.mark_running(run_id, *role))?;
            }
            ignore_lost_race(self.ledger.mark_timed_out(run_id, *role, cause.clone()))?;
            if self.config.on_timeout == TimeoutAction::Abort {
                if let Some(handle) = run.handles.lock().iter().find(|h| h.role == *role) {
                    handle.abort_worker();
                }
            }
        }

        if !outstanding.is_empty() {
            tracing::warn!(run_id = %run_id, roles = ?outstanding, "run deadline forced time-outs");
        }
        Ok(outstanding)
    }

    /// Apply the rerun policy to an identifier already in use
    fn clear_previous(&self, run_id: &RunId) -> Result<(), OrchestratorError> {
        let known = match self.ledger.read(run_id) {
            Ok(state) => Some(state),
            Err(LedgerError::UnknownRun(_)) => None,
            Err(err) => return Err(err.into()),
        };

        match self.config.rerun_policy {
            RerunPolicy::Reject => match known {
                Some(_) => Err(OrchestratorError::DuplicateRun(run_id.clone())),
                None => Ok(()),
            },
            RerunPolicy::Archive => {
                if let Some(state) = known {
                    if !state.all_complete {
                        return Err(OrchestratorError::DuplicateRun(run_id.clone()));
                    }
                    self.ledger.retire(run_id)?;
                    self.runs.remove(run_id);
                    self.workspaces.unregister(run_id);
                    tracing::info!(run_id = %run_id, "previous run retired");
                }
                if let Some(root) = &self.config.workspace_root {
                    RunWorkspace::archive(root, run_id)?;
                }
                Ok(())
            }
        }
    }

    fn open_workspace(&self, run_id: &RunId) -> Result<Option<Arc<RunWorkspace>>, OrchestratorError> {
        let Some(root) = &self.config.workspace_root else {
            return Ok(None);
        };
        let workspace = match RunWorkspace::create(root, run_id) {
            Ok(ws) => Arc::new(ws),
            Err(WorkspaceError::AlreadyExists(_)) => {
                return Err(OrchestratorError::DuplicateRun(run_id.clone()))
            }
            Err(err) => return Err(err.into()),
        };
        self.workspaces.register(Arc::clone(&workspace));
        Ok(Some(workspace))
    }

    fn active(&self, run_id: &RunId) -> Result<Arc<ActiveRun>, OrchestratorError> {
        self.runs
            .get(run_id)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| OrchestratorError::UnknownRun(run_id.clone()))
    }
}

/// A supervisor may settle a role between the snapshot and the forced transition
fn ignore_lost_race<T>(result: Result<T, LedgerError>) -> Result<(), LedgerError> {
    match result {
        Ok(_) => Ok(()),
        Err(err) if err.is_invalid_transition() => Ok(()),
        Err(err) => Err(err),
    }
}
