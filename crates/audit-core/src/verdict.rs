//! Verdict types
//!
//! A verdict is derived, never authored: the aggregator builds it once all
//! roles are terminal and it is immutable afterwards.

use crate::finding::{Classification, FindingRecord, Severity};
use crate::types::{RunId, WorkerRole};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Final recommendation
///
/// Ordered by increasing strictness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Recommendation {
    /// No warning or blocker violations
    Go,
    /// Warning violations present, no blockers
    ConditionalGo,
    /// At least one blocker violation
    Blocked,
}

impl Recommendation {
    /// Process exit code for front ends
    #[inline]
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Recommendation::Go => 0,
            Recommendation::ConditionalGo => 1,
            Recommendation::Blocked => 2,
        }
    }
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Recommendation::Go => "Go",
            Recommendation::ConditionalGo => "ConditionalGo",
            Recommendation::Blocked => "Blocked",
        };
        f.write_str(name)
    }
}

/// Aggregated outcome of one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    /// Run this verdict belongs to
    pub run_id: RunId,
    /// Final recommendation
    pub recommendation: Recommendation,
    /// Violation records per severity
    pub counts_by_severity: BTreeMap<Severity, usize>,
    /// All records per classification
    pub counts_by_classification: BTreeMap<Classification, usize>,
    /// Classification x severity matrix over all records
    pub tally: BTreeMap<Classification, BTreeMap<Severity, usize>>,
    /// Number of records read from completed roles
    pub total_findings: usize,
    /// Blocker-severity violations, ordered by role then id
    pub blockers: Vec<FindingRecord>,
    /// Roles whose output was included
    pub consulted: Vec<WorkerRole>,
    /// Roles that failed or timed out
    pub missing_perspectives: Vec<WorkerRole>,
}

impl Verdict {
    /// Hex SHA-256 over the serialized verdict
    ///
    /// # Errors
    /// Propagates serialization failure.
    pub fn digest(&self) -> Result<String, serde_json::Error> {
        let bytes = serde_json::to_vec(self)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    /// Compact reference stored on the run state
    ///
    /// # Errors
    /// Propagates serialization failure.
    pub fn to_ref(&self) -> Result<VerdictRef, serde_json::Error> {
        Ok(VerdictRef {
            recommendation: self.recommendation,
            blocker_count: self.blockers.len(),
            missing_perspectives: self.missing_perspectives.clone(),
            digest: self.digest()?,
        })
    }

    /// Check whether any perspective is missing
    #[inline]
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        !self.missing_perspectives.is_empty()
    }
}

/// Reference to a verdict, attached to the run state on finalize
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerdictRef {
    /// Recommendation copied from the verdict
    pub recommendation: Recommendation,
    /// Number of blocker violations
    pub blocker_count: usize,
    /// Roles missing from the verdict
    pub missing_perspectives: Vec<WorkerRole>,
    /// Digest of the full verdict document
    pub digest: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_verdict() -> Verdict {
        Verdict {
            run_id: RunId::new("r"),
            recommendation: Recommendation::Go,
            counts_by_severity: BTreeMap::new(),
            counts_by_classification: BTreeMap::new(),
            tally: BTreeMap::new(),
            total_findings: 0,
            blockers: Vec::new(),
            consulted: WorkerRole::ALL.to_vec(),
            missing_perspectives: Vec::new(),
        }
    }

    #[test]
    fn exit_codes() {
        assert_eq!(Recommendation::Go.exit_code(), 0);
        assert_eq!(Recommendation::ConditionalGo.exit_code(), 1);
        assert_eq!(Recommendation::Blocked.exit_code(), 2);
    }

    #[test]
    fn digest_is_stable_and_content_sensitive() {
        let a = empty_verdict();
        let b = empty_verdict();
        assert_eq!(a.digest().unwrap(), b.digest().unwrap());

        let mut c = empty_verdict();
        c.recommendation = Recommendation::Blocked;
        assert_ne!(a.digest().unwrap(), c.digest().unwrap());
    }

    #[test]
    fn verdict_ref_mirrors_verdict() {
        let mut v = empty_verdict();
        v.missing_perspectives = vec![WorkerRole::Build];
        let r = v.to_ref().unwrap();
        assert_eq!(r.recommendation, Recommendation::Go);
        assert_eq!(r.missing_perspectives, vec![WorkerRole::Build]);
        assert_eq!(r.digest.len(), 64);
        assert!(v.is_degraded());
    }
}
