//! Audit Engine - concurrent review runs
//!
//! Fans one task out to a panel of review workers and reduces their output:
//! - [`ReviewWorker`] is the boundary to the opaque analysis units
//! - each role runs under a supervisor that enforces its deadline and owns
//!   the role's single terminal transition
//! - [`OutputSlots`] hold each role's findings, written once
//! - [`Orchestrator`] drives a run from start to sealed [`Verdict`]
//! - [`Aggregator`] is the pure reduction behind the verdict
//! - [`RunWorkspace`] mirrors a run to disk when a workspace root is configured
//!
//! # Example
//!
//! ```rust
//! use audit_core::{AuditConfig, Recommendation, TaskDescriptor, WorkerRole};
//! use audit_engine::{worker_fn, Orchestrator, WorkerSet};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), audit_engine::OrchestratorError> {
//! let workers = WorkerSet::uniform(worker_fn(|_role, _task| async { Ok(vec![]) }));
//! let orchestrator = Orchestrator::new(AuditConfig::default(), workers)?;
//!
//! let (state, verdict) = orchestrator
//!     .run(TaskDescriptor::new("wo-42"), &WorkerRole::ALL)
//!     .await?;
//!
//! assert!(state.is_sealed());
//! assert_eq!(verdict.recommendation, Recommendation::Go);
//! # Ok(())
//! # }
//! ```
//!
//! [`Verdict`]: audit_core::Verdict

#![warn(unreachable_pub)]

pub mod aggregator;
pub mod command;
pub mod error;
pub mod orchestrator;
pub mod slots;
pub mod supervisor;
pub mod worker;
pub mod workspace;

pub use aggregator::Aggregator;
pub use command::CommandWorker;
pub use error::{OrchestratorError, SlotError, WorkspaceError};
pub use orchestrator::Orchestrator;
pub use slots::OutputSlots;
pub use supervisor::WorkerHandle;
pub use worker::{worker_fn, FnWorker, ReviewWorker, WorkerSet};
pub use workspace::{RunWorkspace, WorkspaceRegistry};
