//! Status ledger
//!
//! Single source of truth for run progress. Runs live in a `DashMap` so
//! lookups of different runs never contend; within a run every role has its
//! own mutex, so transitions on distinct roles proceed in parallel while
//! transitions on the same role are serialized.
//!
//! Snapshots lock every role of the run in canonical order. A transition only
//! ever holds one role lock, so the two cannot deadlock, and a snapshot is a
//! consistent cut: it never observes half of a transition.
//!
//! Every accepted change bumps the run's revision while its lock is held, and
//! a snapshot reads the revision under all of them. A snapshot with a higher
//! revision therefore contains every change of one with a lower revision.

use crate::error::LedgerError;
use crate::state_machine;
use audit_core::{RunId, RunState, TaskDescriptor, VerdictRef, WorkerRole, WorkerState, WorkerStatus};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Receives a fresh snapshot after every accepted change
///
/// Called on the thread that made the change, with no ledger lock held.
/// Changes to different roles notify concurrently, so snapshots of one run
/// may arrive out of order; `RunState::revision` orders them. Implementations
/// should return quickly and hand slow work elsewhere.
pub trait LedgerObserver: Send + Sync {
    /// Called with the run state as of the change
    fn on_change(&self, state: &RunState);
}

/// Extra data carried by a transition
#[derive(Debug, Clone, Default)]
pub struct TransitionDetails {
    /// Cause recorded on `Failed` / `TimedOut`
    pub error_cause: Option<String>,
    /// Transition time; defaults to now
    pub at: Option<DateTime<Utc>>,
}

impl TransitionDetails {
    /// No details
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// With an error cause
    #[inline]
    #[must_use]
    pub fn cause(cause: impl Into<String>) -> Self {
        Self {
            error_cause: Some(cause.into()),
            at: None,
        }
    }

    /// With an explicit timestamp
    #[inline]
    #[must_use]
    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = Some(at);
        self
    }
}

struct RunEntry {
    run_id: RunId,
    task: TaskDescriptor,
    created_at: DateTime<Utc>,
    roles: BTreeMap<WorkerRole, Mutex<WorkerStatus>>,
    verdict: Mutex<Option<VerdictRef>>,
    revision: AtomicU64,
}

impl RunEntry {
    fn snapshot(&self) -> RunState {
        let guards: Vec<_> = self
            .roles
            .iter()
            .map(|(role, status)| (*role, status.lock()))
            .collect();
        let verdict = self.verdict.lock();
        let revision = self.revision.load(Ordering::Acquire);
        let verdict = verdict.clone();

        let roles: BTreeMap<WorkerRole, WorkerStatus> = guards
            .iter()
            .map(|(role, guard)| (*role, (**guard).clone()))
            .collect();
        drop(guards);

        let all_complete = roles.values().all(WorkerStatus::is_terminal);
        RunState {
            run_id: self.run_id.clone(),
            task: self.task.clone(),
            created_at: self.created_at,
            roles,
            all_complete,
            revision,
            verdict,
        }
    }

    fn bump(&self) {
        self.revision.fetch_add(1, Ordering::AcqRel);
    }

    fn is_complete(&self) -> bool {
        self.roles.values().all(|status| status.lock().is_terminal())
    }
}

/// Concurrent status ledger for all runs of a process
pub struct StatusLedger {
    runs: DashMap<RunId, Arc<RunEntry>>,
    observer: Option<Arc<dyn LedgerObserver>>,
}

impl std::fmt::Debug for StatusLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusLedger")
            .field("runs", &self.runs.len())
            .field("observed", &self.observer.is_some())
            .finish()
    }
}

impl StatusLedger {
    /// Create empty ledger
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            runs: DashMap::new(),
            observer: None,
        }
    }

    /// Create ledger that notifies `observer` after every change
    #[inline]
    #[must_use]
    pub fn with_observer(observer: Arc<dyn LedgerObserver>) -> Self {
        Self {
            runs: DashMap::new(),
            observer: Some(observer),
        }
    }

    /// Register a run with every role `Pending`
    ///
    /// # Errors
    /// - `LedgerError::DuplicateRun` if the id is taken
    /// - `LedgerError::NoRoles` / `LedgerError::DuplicateRole` for a bad role list
    pub fn create(
        &self,
        run_id: RunId,
        task: TaskDescriptor,
        roles: &[WorkerRole],
    ) -> Result<RunState, LedgerError> {
        if roles.is_empty() {
            return Err(LedgerError::NoRoles);
        }
        let mut statuses = BTreeMap::new();
        for role in roles {
            if statuses.insert(*role, Mutex::new(WorkerStatus::pending())).is_some() {
                return Err(LedgerError::DuplicateRole(*role));
            }
        }

        let entry = match self.runs.entry(run_id.clone()) {
            Entry::Occupied(_) => return Err(LedgerError::DuplicateRun(run_id)),
            Entry::Vacant(vacant) => {
                let entry = Arc::new(RunEntry {
                    run_id: run_id.clone(),
                    task,
                    created_at: Utc::now(),
                    roles: statuses,
                    verdict: Mutex::new(None),
                    revision: AtomicU64::new(0),
                });
                vacant.insert(Arc::clone(&entry));
                entry
            }
        };

        tracing::debug!(run_id = %run_id, roles = roles.len(), "run registered");
        Ok(self.publish(&entry))
    }

    /// Move one role to `to`
    ///
    /// Compare-and-set against the role's current state: the change is applied
    /// only if the state machine allows it.
    ///
    /// # Returns
    /// The role's status after the transition
    ///
    /// # Errors
    /// - `LedgerError::UnknownRun` / `LedgerError::UnknownRole`
    /// - `LedgerError::RunSealed` once a verdict is attached
    /// - `LedgerError::InvalidTransition` if `to` is unreachable from the current state
    pub fn transition(
        &self,
        run_id: &RunId,
        role: WorkerRole,
        to: WorkerState,
        details: TransitionDetails,
    ) -> Result<WorkerStatus, LedgerError> {
        let entry = self.entry(run_id)?;
        if entry.verdict.lock().is_some() {
            return Err(LedgerError::RunSealed(run_id.clone()));
        }
        let slot = entry.roles.get(&role).ok_or_else(|| LedgerError::UnknownRole {
            run_id: run_id.clone(),
            role,
        })?;

        let updated = {
            let mut status = slot.lock();
            let from = status.status;
            if !state_machine::is_allowed(from, to) {
                tracing::warn!(run_id = %run_id, %role, %from, %to, "rejected transition");
                return Err(LedgerError::InvalidTransition { role, from, to });
            }
            let at = details.at.unwrap_or_else(Utc::now);
            status.status = to;
            if to == WorkerState::Running {
                status.started_at = Some(at);
            }
            if to.is_terminal() {
                status.completed_at = Some(at);
                status.error_cause = details.error_cause;
            }
            entry.bump();
            status.clone()
        };

        tracing::debug!(run_id = %run_id, %role, state = %to, "role transitioned");
        self.publish(&entry);
        Ok(updated)
    }

    /// `Pending -> Running`
    ///
    /// # Errors
    /// As [`StatusLedger::transition`].
    pub fn mark_running(&self, run_id: &RunId, role: WorkerRole) -> Result<WorkerStatus, LedgerError> {
        self.transition(run_id, role, WorkerState::Running, TransitionDetails::none())
    }

    /// `Running -> Complete`
    ///
    /// # Errors
    /// As [`StatusLedger::transition`].
    pub fn mark_complete(&self, run_id: &RunId, role: WorkerRole) -> Result<WorkerStatus, LedgerError> {
        self.transition(run_id, role, WorkerState::Complete, TransitionDetails::none())
    }

    /// `Running -> Failed`
    ///
    /// # Errors
    /// As [`StatusLedger::transition`].
    pub fn mark_failed(
        &self,
        run_id: &RunId,
        role: WorkerRole,
        cause: impl Into<String>,
    ) -> Result<WorkerStatus, LedgerError> {
        self.transition(run_id, role, WorkerState::Failed, TransitionDetails::cause(cause))
    }

    /// `Running -> TimedOut`
    ///
    /// # Errors
    /// As [`StatusLedger::transition`].
    pub fn mark_timed_out(
        &self,
        run_id: &RunId,
        role: WorkerRole,
        cause: impl Into<String>,
    ) -> Result<WorkerStatus, LedgerError> {
        self.transition(run_id, role, WorkerState::TimedOut, TransitionDetails::cause(cause))
    }

    /// Consistent point-in-time copy of a run
    ///
    /// # Errors
    /// `LedgerError::UnknownRun`
    pub fn read(&self, run_id: &RunId) -> Result<RunState, LedgerError> {
        Ok(self.entry(run_id)?.snapshot())
    }

    /// True iff every role of the run is terminal
    ///
    /// # Errors
    /// `LedgerError::UnknownRun`
    pub fn is_run_complete(&self, run_id: &RunId) -> Result<bool, LedgerError> {
        Ok(self.entry(run_id)?.is_complete())
    }

    /// Attach the verdict reference and seal the run
    ///
    /// # Errors
    /// - `LedgerError::RunNotComplete` while any role is outstanding
    /// - `LedgerError::RunSealed` if a verdict is already attached
    pub fn attach_verdict(&self, run_id: &RunId, verdict: VerdictRef) -> Result<RunState, LedgerError> {
        let entry = self.entry(run_id)?;
        if !entry.is_complete() {
            return Err(LedgerError::RunNotComplete(run_id.clone()));
        }
        {
            let mut slot = entry.verdict.lock();
            if slot.is_some() {
                return Err(LedgerError::RunSealed(run_id.clone()));
            }
            *slot = Some(verdict);
            entry.bump();
        }
        tracing::debug!(run_id = %run_id, "run sealed");
        Ok(self.publish(&entry))
    }

    /// Remove a finished run, returning its last state
    ///
    /// # Errors
    /// - `LedgerError::UnknownRun`
    /// - `LedgerError::RunNotComplete` while any role is outstanding
    pub fn retire(&self, run_id: &RunId) -> Result<RunState, LedgerError> {
        let entry = self.entry(run_id)?;
        if !entry.is_complete() {
            return Err(LedgerError::RunNotComplete(run_id.clone()));
        }
        self.runs.remove(run_id);
        Ok(entry.snapshot())
    }

    /// Identifiers of every known run, sorted
    #[must_use]
    pub fn runs(&self) -> Vec<RunId> {
        let mut ids: Vec<RunId> = self.runs.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Number of known runs
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    /// Check if no run is registered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    fn entry(&self, run_id: &RunId) -> Result<Arc<RunEntry>, LedgerError> {
        self.runs
            .get(run_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| LedgerError::UnknownRun(run_id.clone()))
    }

    fn publish(&self, entry: &RunEntry) -> RunState {
        let state = entry.snapshot();
        if let Some(observer) = &self.observer {
            observer.on_change(&state);
        }
        state
    }
}

impl Default for StatusLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_with_run(roles: &[WorkerRole]) -> (StatusLedger, RunId) {
        let ledger = StatusLedger::new();
        let run_id = RunId::new("run-test");
        ledger
            .create(run_id.clone(), TaskDescriptor::new("wo-1"), roles)
            .unwrap();
        (ledger, run_id)
    }

    #[test]
    fn create_initializes_pending() {
        let (ledger, run_id) = ledger_with_run(&WorkerRole::ALL);
        let state = ledger.read(&run_id).unwrap();
        assert_eq!(state.roles.len(), 6);
        assert!(state.roles.values().all(|s| s.status == WorkerState::Pending));
        assert!(!state.all_complete);
    }

    #[test]
    fn duplicate_run_rejected() {
        let (ledger, run_id) = ledger_with_run(&[WorkerRole::Build]);
        let err = ledger
            .create(run_id.clone(), TaskDescriptor::new("again"), &[WorkerRole::Build])
            .unwrap_err();
        assert_eq!(err, LedgerError::DuplicateRun(run_id));
    }

    #[test]
    fn bad_role_lists_rejected() {
        let ledger = StatusLedger::new();
        assert_eq!(
            ledger.create(RunId::new("a"), TaskDescriptor::new("t"), &[]),
            Err(LedgerError::NoRoles)
        );
        assert_eq!(
            ledger.create(
                RunId::new("b"),
                TaskDescriptor::new("t"),
                &[WorkerRole::Build, WorkerRole::Build]
            ),
            Err(LedgerError::DuplicateRole(WorkerRole::Build))
        );
        assert!(ledger.is_empty());
    }

    #[test]
    fn full_lifecycle_sets_timestamps() {
        let (ledger, run_id) = ledger_with_run(&[WorkerRole::Security]);
        let running = ledger.mark_running(&run_id, WorkerRole::Security).unwrap();
        assert!(running.started_at.is_some());
        assert!(running.completed_at.is_none());

        let failed = ledger
            .mark_failed(&run_id, WorkerRole::Security, "boom")
            .unwrap();
        assert_eq!(failed.status, WorkerState::Failed);
        assert_eq!(failed.error_cause.as_deref(), Some("boom"));
        assert!(failed.completed_at.is_some());
        assert!(ledger.is_run_complete(&run_id).unwrap());
    }

    #[test]
    fn second_terminal_transition_rejected() {
        let (ledger, run_id) = ledger_with_run(&[WorkerRole::Build]);
        ledger.mark_running(&run_id, WorkerRole::Build).unwrap();
        ledger.mark_complete(&run_id, WorkerRole::Build).unwrap();

        let err = ledger
            .mark_timed_out(&run_id, WorkerRole::Build, "late")
            .unwrap_err();
        assert!(err.is_invalid_transition());
        assert_eq!(
            ledger.read(&run_id).unwrap().roles[&WorkerRole::Build].status,
            WorkerState::Complete
        );
    }

    #[test]
    fn unknown_role_and_run() {
        let (ledger, run_id) = ledger_with_run(&[WorkerRole::Build]);
        assert!(matches!(
            ledger.mark_running(&run_id, WorkerRole::Coverage),
            Err(LedgerError::UnknownRole { .. })
        ));
        assert!(matches!(
            ledger.read(&RunId::new("nope")),
            Err(LedgerError::UnknownRun(_))
        ));
    }

    #[test]
    fn retire_requires_terminal_run() {
        let (ledger, run_id) = ledger_with_run(&[WorkerRole::Build]);
        ledger.mark_running(&run_id, WorkerRole::Build).unwrap();
        assert_eq!(
            ledger.retire(&run_id),
            Err(LedgerError::RunNotComplete(run_id.clone()))
        );
        ledger.mark_complete(&run_id, WorkerRole::Build).unwrap();
        let last = ledger.retire(&run_id).unwrap();
        assert!(last.all_complete);
        assert!(ledger.runs().is_empty());
    }
}
