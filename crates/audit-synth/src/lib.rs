//! Audit Synth - compliance tests from review findings
//!
//! Second pipeline stage, run after a verdict exists:
//! - [`ViolationCategory`] is the fixed taxonomy tests are filed under
//! - [`TestSynthesizer`] maps each violation to one [`GeneratedTest`] and
//!   records a [`SkipEntry`] for everything else
//!
//! # Example
//!
//! ```rust
//! use audit_core::{Classification, FindingRecord, Recommendation, RunId, Severity, Verdict, WorkerRole};
//! use audit_synth::TestSynthesizer;
//!
//! let verdict = Verdict {
//!     run_id: RunId::new("run-1"),
//!     recommendation: Recommendation::ConditionalGo,
//!     counts_by_severity: Default::default(),
//!     counts_by_classification: Default::default(),
//!     tally: Default::default(),
//!     total_findings: 2,
//!     blockers: vec![],
//!     consulted: WorkerRole::ALL.to_vec(),
//!     missing_perspectives: vec![],
//! };
//! let findings = vec![
//!     (WorkerRole::Observability, FindingRecord::new(
//!         "OPS-002", Severity::Warning, Classification::Violation,
//!         "src/services/billing.rs", "log lines lack tenant_id",
//!     )),
//!     (WorkerRole::Observability, FindingRecord::new(
//!         "OPS-003", Severity::Warning, Classification::FalseAlarm,
//!         "src/services/health.rs", "health probe is tenant-agnostic",
//!     )),
//! ];
//!
//! let report = TestSynthesizer::synthesize(&verdict, &findings);
//! assert_eq!(report.tests.len(), 1);
//! assert_eq!(report.tests[0].suite, "TestObservabilityCompliance");
//! assert_eq!(report.skipped.len(), 1);
//! ```

#![warn(unreachable_pub)]

pub mod error;
pub mod synthesizer;
pub mod taxonomy;

pub use error::SynthesisError;
pub use synthesizer::{GeneratedTest, Polarity, SkipEntry, SkipReason, SynthesisReport, TestSynthesizer};
pub use taxonomy::ViolationCategory;
