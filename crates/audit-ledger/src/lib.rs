//! Audit Ledger - run progress tracking
//!
//! The status ledger records every role's lifecycle for each run:
//! - `create` registers a run with all roles `Pending`
//! - `transition` applies one compare-and-set step of the lifecycle
//! - `read` returns a consistent snapshot at any time
//! - `attach_verdict` seals a finished run
//!
//! # Example
//!
//! ```rust
//! use audit_core::{RunId, TaskDescriptor, WorkerRole, WorkerState};
//! use audit_ledger::StatusLedger;
//!
//! let ledger = StatusLedger::new();
//! let run_id = RunId::new("run-1");
//! ledger.create(run_id.clone(), TaskDescriptor::new("wo-7"), &[WorkerRole::Security])?;
//!
//! ledger.mark_running(&run_id, WorkerRole::Security)?;
//! ledger.mark_complete(&run_id, WorkerRole::Security)?;
//!
//! assert!(ledger.is_run_complete(&run_id)?);
//! assert_eq!(ledger.read(&run_id)?.roles[&WorkerRole::Security].status, WorkerState::Complete);
//! # Ok::<(), audit_ledger::LedgerError>(())
//! ```

#![warn(unreachable_pub)]

pub mod error;
pub mod ledger;
pub mod state_machine;

pub use error::LedgerError;
pub use ledger::{LedgerObserver, StatusLedger, TransitionDetails};
