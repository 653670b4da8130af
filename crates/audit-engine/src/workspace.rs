//! On-disk run workspace
//!
//! Layout under `<root>/<run_id>/`:
//! - `status.json` ledger document, replaced atomically on every change
//! - `findings/<slot>` one file per completed role
//! - `verdict.json` written on finalize
//! - `generated-tests.json` written by the synthesis stage
//!
//! Every document is written to a temporary file in the same directory and
//! renamed into place, so a concurrent reader sees either the old or the new
//! content, never a torn write.

use crate::error::WorkspaceError;
use audit_core::{FindingRecord, RunId, RunState, Verdict, WorkerRole};
use audit_ledger::LedgerObserver;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use ulid::Ulid;

/// Ledger document file name
pub const STATUS_FILE: &str = "status.json";
/// Verdict document file name
pub const VERDICT_FILE: &str = "verdict.json";
/// Synthesis output file name
pub const TESTS_FILE: &str = "generated-tests.json";
/// Output slot directory name
pub const FINDINGS_DIR: &str = "findings";

/// Directory holding one run's documents
#[derive(Debug, Clone)]
pub struct RunWorkspace {
    run_id: RunId,
    dir: PathBuf,
}

impl RunWorkspace {
    /// Create `<root>/<run_id>/` and its findings directory
    ///
    /// # Errors
    /// - `WorkspaceError::AlreadyExists` if the run directory is present
    /// - `WorkspaceError::Io` on filesystem failure
    pub fn create(root: &Path, run_id: &RunId) -> Result<Self, WorkspaceError> {
        let dir = Self::dir_for(root, run_id);
        std::fs::create_dir_all(root).map_err(|e| WorkspaceError::io(root, e))?;
        match std::fs::create_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(WorkspaceError::AlreadyExists(dir))
            }
            Err(e) => return Err(WorkspaceError::io(&dir, e)),
        }
        let findings = dir.join(FINDINGS_DIR);
        std::fs::create_dir(&findings).map_err(|e| WorkspaceError::io(&findings, e))?;
        tracing::debug!(run_id = %run_id, dir = %dir.display(), "run workspace created");
        Ok(Self {
            run_id: run_id.clone(),
            dir,
        })
    }

    /// Open an existing run directory
    ///
    /// # Errors
    /// `WorkspaceError::Missing` if the directory does not exist.
    pub fn open(root: &Path, run_id: &RunId) -> Result<Self, WorkspaceError> {
        let dir = Self::dir_for(root, run_id);
        if !dir.is_dir() {
            return Err(WorkspaceError::Missing(dir));
        }
        Ok(Self {
            run_id: run_id.clone(),
            dir,
        })
    }

    /// Move an existing run directory aside
    ///
    /// # Returns
    /// The archive path, or `None` when there was nothing to archive
    ///
    /// # Errors
    /// `WorkspaceError::Io` if the rename fails.
    pub fn archive(root: &Path, run_id: &RunId) -> Result<Option<PathBuf>, WorkspaceError> {
        let dir = Self::dir_for(root, run_id);
        if !dir.exists() {
            return Ok(None);
        }
        let target = root.join(format!("{}.archived-{}", sanitize(run_id.as_str()), Ulid::new()));
        std::fs::rename(&dir, &target).map_err(|e| WorkspaceError::io(&dir, e))?;
        tracing::info!(run_id = %run_id, archive = %target.display(), "archived previous run");
        Ok(Some(target))
    }

    /// Run directory for `run_id` under `root`
    #[must_use]
    pub fn dir_for(root: &Path, run_id: &RunId) -> PathBuf {
        root.join(sanitize(run_id.as_str()))
    }

    /// Run identifier
    #[inline]
    #[must_use]
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Run directory
    #[inline]
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the ledger document
    #[inline]
    #[must_use]
    pub fn status_path(&self) -> PathBuf {
        self.dir.join(STATUS_FILE)
    }

    /// Path of the verdict document
    #[inline]
    #[must_use]
    pub fn verdict_path(&self) -> PathBuf {
        self.dir.join(VERDICT_FILE)
    }

    /// Path of the synthesis output
    #[inline]
    #[must_use]
    pub fn tests_path(&self) -> PathBuf {
        self.dir.join(TESTS_FILE)
    }

    /// Path of one role's output slot
    #[inline]
    #[must_use]
    pub fn slot_path(&self, role: WorkerRole) -> PathBuf {
        self.dir.join(FINDINGS_DIR).join(role.slot_name())
    }

    /// Replace the ledger document
    ///
    /// # Errors
    /// `WorkspaceError` on encoding or I/O failure.
    pub fn write_status(&self, state: &RunState) -> Result<(), WorkspaceError> {
        write_json_atomic(&self.status_path(), state)
    }

    /// Write one role's findings
    ///
    /// # Errors
    /// `WorkspaceError` on encoding or I/O failure.
    pub fn write_slot(&self, role: WorkerRole, findings: &[FindingRecord]) -> Result<(), WorkspaceError> {
        write_json_atomic(&self.slot_path(role), findings)
    }

    /// Write the verdict
    ///
    /// # Errors
    /// `WorkspaceError` on encoding or I/O failure.
    pub fn write_verdict(&self, verdict: &Verdict) -> Result<(), WorkspaceError> {
        write_json_atomic(&self.verdict_path(), verdict)
    }

    /// Write the synthesis output
    ///
    /// # Errors
    /// `WorkspaceError` on encoding or I/O failure.
    pub fn write_tests<T: Serialize>(&self, report: &T) -> Result<(), WorkspaceError> {
        write_json_atomic(&self.tests_path(), report)
    }

    /// Read the ledger document
    ///
    /// # Errors
    /// `WorkspaceError::Missing` if absent, otherwise I/O or decoding errors.
    pub fn read_status(&self) -> Result<RunState, WorkspaceError> {
        read_json(&self.status_path())
    }

    /// Read the verdict
    ///
    /// # Errors
    /// `WorkspaceError::Missing` if absent, otherwise I/O or decoding errors.
    pub fn read_verdict(&self) -> Result<Verdict, WorkspaceError> {
        read_json(&self.verdict_path())
    }

    /// Read one slot as raw JSON; `None` when the slot was never written
    ///
    /// # Errors
    /// I/O or JSON syntax errors. Record-level shape is not checked here.
    pub fn read_slot_raw(&self, role: WorkerRole) -> Result<Option<serde_json::Value>, WorkspaceError> {
        match read_json(&self.slot_path(role)) {
            Ok(value) => Ok(Some(value)),
            Err(WorkspaceError::Missing(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Keeps `status.json` of every registered run in step with the ledger
///
/// Ledger notifications only record the newest snapshot. A writer task per
/// run persists it off the notifying thread; without a Tokio runtime the
/// write happens inline. Stale revisions are never written over newer ones.
#[derive(Debug, Default)]
pub struct WorkspaceRegistry {
    mirrors: DashMap<RunId, Arc<StatusMirror>>,
}

#[derive(Debug)]
struct StatusMirror {
    file: Arc<StatusFile>,
    latest: watch::Sender<Option<RunState>>,
}

/// `status.json` of one run and the highest revision written to it
#[derive(Debug)]
struct StatusFile {
    workspace: Arc<RunWorkspace>,
    written: Mutex<Option<u64>>,
}

impl StatusFile {
    fn persist(&self, state: &RunState) {
        let mut written = self.written.lock();
        if written.is_some_and(|revision| revision >= state.revision) {
            return;
        }
        match self.workspace.write_status(state) {
            Ok(()) => *written = Some(state.revision),
            Err(e) => tracing::warn!(run_id = %state.run_id, error = %e, "failed to persist run status"),
        }
    }
}

impl WorkspaceRegistry {
    /// Create empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start mirroring `workspace.run_id()`
    ///
    /// Inside a Tokio runtime this spawns the run's status writer, which
    /// exits once the run is unregistered.
    pub fn register(&self, workspace: Arc<RunWorkspace>) {
        let run_id = workspace.run_id().clone();
        let file = Arc::new(StatusFile {
            workspace,
            written: Mutex::new(None),
        });
        let (latest, rx) = watch::channel(None);
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(write_behind(Arc::clone(&file), rx));
        }
        self.mirrors.insert(run_id, Arc::new(StatusMirror { file, latest }));
    }

    /// Stop mirroring a run
    pub fn unregister(&self, run_id: &RunId) {
        self.mirrors.remove(run_id);
    }

    /// Workspace of a run, if any
    #[must_use]
    pub fn get(&self, run_id: &RunId) -> Option<Arc<RunWorkspace>> {
        self.mirror(run_id).map(|m| Arc::clone(&m.file.workspace))
    }

    /// Write the newest known snapshot of a run now
    ///
    /// Returns once `status.json` holds that snapshot or a newer one.
    pub fn flush(&self, run_id: &RunId) {
        let Some(mirror) = self.mirror(run_id) else {
            return;
        };
        let latest = (*mirror.latest.borrow()).clone();
        if let Some(state) = latest {
            mirror.file.persist(&state);
        }
    }

    fn mirror(&self, run_id: &RunId) -> Option<Arc<StatusMirror>> {
        self.mirrors.get(run_id).map(|m| Arc::clone(m.value()))
    }
}

impl LedgerObserver for WorkspaceRegistry {
    fn on_change(&self, state: &RunState) {
        let Some(mirror) = self.mirror(&state.run_id) else {
            return;
        };
        let newer = mirror.latest.send_if_modified(|current| {
            let stale = current
                .as_ref()
                .is_some_and(|c| c.revision >= state.revision);
            if !stale {
                *current = Some(state.clone());
            }
            !stale
        });
        if newer && mirror.latest.is_closed() {
            mirror.file.persist(state);
        }
    }
}

async fn write_behind(file: Arc<StatusFile>, mut latest: watch::Receiver<Option<RunState>>) {
    while latest.changed().await.is_ok() {
        let Some(state) = (*latest.borrow_and_update()).clone() else {
            continue;
        };
        let file = Arc::clone(&file);
        if let Err(e) = tokio::task::spawn_blocking(move || file.persist(&state)).await {
            tracing::warn!(error = %e, "status writer lost");
        }
    }
}

fn sanitize(component: &str) -> String {
    let cleaned: String = component
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        format!("_{cleaned}")
    } else {
        cleaned
    }
}

fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), WorkspaceError> {
    let dir = path
        .parent()
        .ok_or_else(|| WorkspaceError::Missing(path.to_path_buf()))?;
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| WorkspaceError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| WorkspaceError::io(dir, e))?;
    tmp.write_all(&bytes).map_err(|e| WorkspaceError::io(path, e))?;
    tmp.as_file().sync_all().map_err(|e| WorkspaceError::io(path, e))?;
    tmp.persist(path).map_err(|e| WorkspaceError::io(path, e.error))?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, WorkspaceError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(WorkspaceError::Missing(path.to_path_buf()))
        }
        Err(e) => return Err(WorkspaceError::io(path, e)),
    };
    serde_json::from_slice(&bytes).map_err(|source| WorkspaceError::Json {
        path: path.to_path_buf(),
        source,
    })
}
