//! Core run types
//!
//! Defines the fundamental types shared by every stage of a review run:
//! - Run identifiers and task descriptors
//! - Worker roles and their output slots
//! - Per-role lifecycle status
//! - The run state snapshot published by the status ledger

use crate::verdict::VerdictRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use ulid::Ulid;

/// Unique run identifier
///
/// Generated identifiers are ULID based so they sort by creation time;
/// callers may also supply their own identifier to detect re-runs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Generate new run ID
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("run-{}", Ulid::new().to_string().to_lowercase()))
    }

    /// Wrap a caller supplied identifier
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// The unit of work under review
///
/// Opaque to the orchestrator: it is handed to every worker unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDescriptor {
    /// Opaque reference to the reviewed unit (document handle, work order, path)
    pub reference: String,
    /// Free-form labels forwarded to workers
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl TaskDescriptor {
    /// Create new task descriptor
    #[inline]
    #[must_use]
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            labels: BTreeMap::new(),
        }
    }

    /// With an extra label
    #[inline]
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Worker role identity
///
/// The set is fixed at compile time. Each role owns exactly one output slot.
/// Declaration order is the canonical ordering used for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerRole {
    /// Structural integrity: layering, naming, schema drift
    Architecture,
    /// Security: access policies, isolation, credential handling
    Security,
    /// Build and deployment hygiene
    Build,
    /// Concurrency: blocking calls, pools, rate limits
    Concurrency,
    /// Observability: logging, error reporting, health checks
    Observability,
    /// Test coverage
    Coverage,
}

impl WorkerRole {
    /// Every role, in canonical order
    pub const ALL: [WorkerRole; 6] = [
        WorkerRole::Architecture,
        WorkerRole::Security,
        WorkerRole::Build,
        WorkerRole::Concurrency,
        WorkerRole::Observability,
        WorkerRole::Coverage,
    ];

    /// Stable lowercase name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerRole::Architecture => "architecture",
            WorkerRole::Security => "security",
            WorkerRole::Build => "build",
            WorkerRole::Concurrency => "concurrency",
            WorkerRole::Observability => "observability",
            WorkerRole::Coverage => "coverage",
        }
    }

    /// Name of the role's output slot
    #[inline]
    #[must_use]
    pub fn slot_name(&self) -> String {
        format!("{}.findings.json", self.as_str())
    }

    /// Finding identifier prefix conventionally used by this role
    #[inline]
    #[must_use]
    pub fn finding_prefix(&self) -> &'static str {
        match self {
            WorkerRole::Architecture => "ARCH",
            WorkerRole::Security => "SEC",
            WorkerRole::Build => "BUILD",
            WorkerRole::Concurrency => "CONC",
            WorkerRole::Observability => "OPS",
            WorkerRole::Coverage => "TEST",
        }
    }
}

impl std::fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a role name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown worker role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for WorkerRole {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkerRole::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

/// Lifecycle state of one role within one run
///
/// `Pending -> Running -> {Complete | Failed | TimedOut}`; the last three are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Registered, not yet spawned
    Pending,
    /// Spawned, awaiting completion
    Running,
    /// Finished and published its output slot
    Complete,
    /// Raised an unrecoverable error
    Failed,
    /// Deadline elapsed without a completion signal
    TimedOut,
}

impl WorkerState {
    /// Check if no further transition is legal
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkerState::Complete | WorkerState::Failed | WorkerState::TimedOut
        )
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WorkerState::Pending => "pending",
            WorkerState::Running => "running",
            WorkerState::Complete => "complete",
            WorkerState::Failed => "failed",
            WorkerState::TimedOut => "timed_out",
        };
        f.write_str(name)
    }
}

/// Status record of one role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatus {
    /// Current lifecycle state
    pub status: WorkerState,
    /// Set on `Pending -> Running`
    pub started_at: Option<DateTime<Utc>>,
    /// Set on the terminal transition
    pub completed_at: Option<DateTime<Utc>>,
    /// Cause recorded on `Failed` / `TimedOut`
    pub error_cause: Option<String>,
}

impl WorkerStatus {
    /// Fresh pending status
    #[inline]
    #[must_use]
    pub fn pending() -> Self {
        Self {
            status: WorkerState::Pending,
            started_at: None,
            completed_at: None,
            error_cause: None,
        }
    }

    /// Check if terminal
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl Default for WorkerStatus {
    fn default() -> Self {
        Self::pending()
    }
}

/// Point-in-time snapshot of a run
///
/// Serialized form is the persisted ledger document read by external observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    /// Run identifier
    pub run_id: RunId,
    /// Task under review
    pub task: TaskDescriptor,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Status per role; the key set is fixed at creation
    pub roles: BTreeMap<WorkerRole, WorkerStatus>,
    /// True iff every role is terminal
    pub all_complete: bool,
    /// Number of accepted changes reflected in this snapshot
    #[serde(default)]
    pub revision: u64,
    /// Attached once the run has been finalized
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<VerdictRef>,
}

impl RunState {
    /// Status of one role
    #[inline]
    #[must_use]
    pub fn status(&self, role: WorkerRole) -> Option<&WorkerStatus> {
        self.roles.get(&role)
    }

    /// Roles that reached `Complete`
    #[must_use]
    pub fn completed_roles(&self) -> Vec<WorkerRole> {
        self.roles_in(|s| s == WorkerState::Complete)
    }

    /// Roles that ended `Failed` or `TimedOut`
    #[must_use]
    pub fn missing_perspectives(&self) -> Vec<WorkerRole> {
        self.roles_in(|s| matches!(s, WorkerState::Failed | WorkerState::TimedOut))
    }

    /// Roles still `Pending` or `Running`
    #[must_use]
    pub fn outstanding_roles(&self) -> Vec<WorkerRole> {
        self.roles_in(|s| !s.is_terminal())
    }

    /// Check whether a verdict has been attached
    #[inline]
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.verdict.is_some()
    }

    fn roles_in(&self, pred: impl Fn(WorkerState) -> bool) -> Vec<WorkerRole> {
        self.roles
            .iter()
            .filter(|(_, s)| pred(s.status))
            .map(|(role, _)| *role)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn role_round_trips_through_str() {
        for role in WorkerRole::ALL {
            assert_eq!(role.as_str().parse::<WorkerRole>().unwrap(), role);
        }
        assert!("Security".parse::<WorkerRole>().is_ok());
        assert!("kraken".parse::<WorkerRole>().is_err());
    }

    #[test]
    fn slot_names_are_unique() {
        let mut names: Vec<String> = WorkerRole::ALL.iter().map(WorkerRole::slot_name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), WorkerRole::ALL.len());
    }

    #[test]
    fn terminal_states() {
        assert!(!WorkerState::Pending.is_terminal());
        assert!(!WorkerState::Running.is_terminal());
        assert!(WorkerState::Complete.is_terminal());
        assert!(WorkerState::Failed.is_terminal());
        assert!(WorkerState::TimedOut.is_terminal());
    }

    #[test]
    fn generated_run_ids_differ() {
        assert_ne!(RunId::generate(), RunId::generate());
        assert!(RunId::generate().as_str().starts_with("run-"));
    }

    #[test]
    fn run_state_serializes_with_documented_field_names() {
        let mut roles = BTreeMap::new();
        roles.insert(WorkerRole::Security, WorkerStatus::pending());
        let state = RunState {
            run_id: RunId::new("r1"),
            task: TaskDescriptor::new("wo-42"),
            created_at: Utc::now(),
            roles,
            all_complete: false,
            revision: 3,
            verdict: None,
        };

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["runId"], "r1");
        assert_eq!(json["allComplete"], false);
        assert_eq!(json["roles"]["security"]["status"], "pending");
        assert!(json["roles"]["security"].get("startedAt").is_some());

        let back: RunState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }
}
