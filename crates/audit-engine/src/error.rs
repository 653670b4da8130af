//! Error types for the audit engine
//!
//! Only `DuplicateRun` is fatal to a caller starting a run. Worker failures
//! and time-outs never appear here: they are recorded on the ledger and
//! surface in the verdict as missing perspectives.

use audit_core::{ConfigError, RunId, WorkerRole};
use audit_ledger::LedgerError;
use std::path::PathBuf;

/// Orchestrator errors
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Run identifier collision; retry with a new identifier
    #[error("run {0} already exists")]
    DuplicateRun(RunId),

    /// No run with this identifier
    #[error("run {0} not found")]
    UnknownRun(RunId),

    /// Finalize requested while roles are still outstanding
    #[error("run {0} still has outstanding roles")]
    RunNotComplete(RunId),

    /// Called outside a Tokio runtime
    #[error("no Tokio runtime available to spawn workers")]
    NoRuntime,

    /// Ledger rejected an operation
    #[error("ledger error: {0}")]
    Ledger(LedgerError),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Run workspace I/O failed
    #[error("workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    /// Verdict could not be serialized
    #[error("verdict encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl OrchestratorError {
    /// Check if the caller must pick a new run identifier
    #[inline]
    #[must_use]
    pub fn is_duplicate_run(&self) -> bool {
        matches!(self, Self::DuplicateRun(_))
    }
}

impl From<LedgerError> for OrchestratorError {
    fn from(value: LedgerError) -> Self {
        match value {
            LedgerError::DuplicateRun(id) => Self::DuplicateRun(id),
            LedgerError::UnknownRun(id) => Self::UnknownRun(id),
            LedgerError::RunNotComplete(id) => Self::RunNotComplete(id),
            other => Self::Ledger(other),
        }
    }
}

/// Run workspace errors
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    /// Filesystem operation failed
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Affected path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Document could not be encoded or decoded
    #[error("invalid JSON at {path}: {source}")]
    Json {
        /// Affected path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// A directory for this run already exists
    #[error("run workspace already exists: {0}")]
    AlreadyExists(PathBuf),

    /// Expected directory or document is absent
    #[error("not found: {0}")]
    Missing(PathBuf),
}

impl WorkspaceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Output slot errors
#[derive(Debug, thiserror::Error)]
pub enum SlotError {
    /// Slot already published or withheld
    #[error("output slot for {0} is already closed")]
    Closed(WorkerRole),

    /// Role has no slot in this run
    #[error("no output slot for {0}")]
    UnknownRole(WorkerRole),

    /// Slot content could not be mirrored to disk
    #[error("failed to persist slot: {0}")]
    Persist(#[from] WorkspaceError),
}
