//! Audit Core - shared data model
//!
//! Types every stage of a review run agrees on:
//! - Run identifiers, task descriptors and worker roles
//! - Per-role lifecycle status and the run state snapshot
//! - Finding records produced by workers
//! - Verdicts produced by the aggregator
//! - Run configuration
//!
//! # Example
//!
//! ```rust
//! use audit_core::{Classification, FindingRecord, Severity, WorkerRole};
//!
//! let finding = FindingRecord::new(
//!     "SEC-001",
//!     Severity::Blocker,
//!     Classification::Violation,
//!     "src/db/session.rs:42",
//!     "SET ROLE without matching RESET ROLE",
//! )
//! .with_remediation("Reset the role in a finally block");
//!
//! assert!(finding.is_blocking());
//! assert_eq!(WorkerRole::Security.slot_name(), "security.findings.json");
//! ```

#![warn(unreachable_pub)]

pub mod config;
pub mod error;
pub mod finding;
pub mod types;
pub mod verdict;

pub use config::{AuditConfig, RerunPolicy, TimeoutAction};
pub use error::{ConfigError, MalformedFinding, WorkerError};
pub use finding::{Classification, FindingRecord, Severity};
pub use types::{RunId, RunState, TaskDescriptor, UnknownRole, WorkerRole, WorkerState, WorkerStatus};
pub use verdict::{Recommendation, Verdict, VerdictRef};
