//! Error types shared across the workspace
//!
//! Stage-specific errors live next to their stage (ledger, engine, synth);
//! this module holds the ones every stage needs to name.

use std::path::PathBuf;

/// Failure raised by a worker
///
/// Recovered by the supervisor: the role ends `Failed` and the cause is
/// recorded on the ledger. Never surfaces to the orchestrator's caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkerError {
    /// Worker reported an unrecoverable error
    #[error("worker failed: {0}")]
    Failed(String),

    /// Worker task panicked
    #[error("worker panicked: {0}")]
    Panicked(String),

    /// Worker produced output that could not be decoded
    #[error("invalid worker output: {0}")]
    InvalidOutput(String),

    /// External worker process could not be run
    #[error("worker process error: {0}")]
    Process(String),

    /// No worker is registered for the role
    #[error("no worker registered for role {0}")]
    Unregistered(String),
}

impl WorkerError {
    /// Create a generic failure
    #[inline]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// A finding record missing required content
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed finding {record_id:?}: {detail}")]
pub struct MalformedFinding {
    /// Identifier of the offending record (may be empty)
    pub record_id: String,
    /// What is wrong with it
    pub detail: String,
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config {path}: {source}")]
    Read {
        /// File path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Config file could not be parsed
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Values are out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_error_display() {
        assert!(WorkerError::failed("boom").to_string().contains("boom"));
        assert!(WorkerError::Unregistered("build".into())
            .to_string()
            .contains("no worker registered"));
    }

    #[test]
    fn malformed_display_names_record() {
        let err = MalformedFinding {
            record_id: "SEC-1".into(),
            detail: "required field `location` is empty".into(),
        };
        assert!(err.to_string().contains("SEC-1"));
    }
}
