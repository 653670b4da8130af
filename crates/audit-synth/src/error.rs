//! Synthesis errors
//!
//! Every error here concerns a single record. The synthesizer turns it into a
//! skip entry and carries on with the rest of the batch.

use audit_core::{MalformedFinding, WorkerRole};

/// Failure to turn one finding into a test
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SynthesisError {
    /// A required field is missing or blank
    #[error("finding {record_id:?} is malformed: {detail}")]
    Malformed {
        /// Identifier of the record (may be empty)
        record_id: String,
        /// What is wrong with it
        detail: String,
    },

    /// A slot entry could not be decoded as a finding record
    #[error("entry {index} of the {role} slot is not a finding ({record_id:?}): {detail}")]
    Undecodable {
        /// Role whose slot held the entry
        role: WorkerRole,
        /// Position within the slot
        index: usize,
        /// Identifier, when the entry carried a readable one
        record_id: String,
        /// Decoder message
        detail: String,
    },
}

impl SynthesisError {
    /// Identifier of the offending record
    #[must_use]
    pub fn record_id(&self) -> &str {
        match self {
            Self::Malformed { record_id, .. } | Self::Undecodable { record_id, .. } => record_id,
        }
    }
}

impl From<MalformedFinding> for SynthesisError {
    fn from(value: MalformedFinding) -> Self {
        Self::Malformed {
            record_id: value.record_id,
            detail: value.detail,
        }
    }
}
