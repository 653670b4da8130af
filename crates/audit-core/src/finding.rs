//! Finding records
//!
//! The atomic output of one worker. Records are immutable once published to
//! their role's output slot.

use crate::error::MalformedFinding;
use serde::{Deserialize, Serialize};

/// How urgent a finding is
///
/// Ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Must be fixed before the unit can proceed
    Blocker,
    /// Should be fixed; proceeding requires conditions
    Warning,
    /// Informational
    Advisory,
}

impl Severity {
    /// Every severity, most severe first
    pub const ALL: [Severity; 3] = [Severity::Blocker, Severity::Warning, Severity::Advisory];
}

/// What the worker concluded about the pattern it found
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// A real violation; counted and turned into a test
    Violation,
    /// Looks like a violation but is deliberate
    IntentionalPattern,
    /// Detector misfire
    FalseAlarm,
}

impl Classification {
    /// Every classification
    pub const ALL: [Classification; 3] = [
        Classification::Violation,
        Classification::IntentionalPattern,
        Classification::FalseAlarm,
    ];
}

/// One finding produced by a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindingRecord {
    /// Role-scoped identifier (e.g. `SEC-004`)
    pub id: String,
    /// Severity
    pub severity: Severity,
    /// Opaque location reference
    pub location: String,
    /// Classification
    pub classification: Classification,
    /// Why the worker reached this conclusion
    pub rationale: String,
    /// Suggested remediation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
    /// Rule or policy the finding cites
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl FindingRecord {
    /// Create new finding
    #[inline]
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        severity: Severity,
        classification: Classification,
        location: impl Into<String>,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            severity,
            location: location.into(),
            classification,
            rationale: rationale.into(),
            remediation: None,
            reference: None,
        }
    }

    /// With remediation suggestion
    #[inline]
    #[must_use]
    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = Some(remediation.into());
        self
    }

    /// With cited rule
    #[inline]
    #[must_use]
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// Check if classified as a violation
    #[inline]
    #[must_use]
    pub fn is_violation(&self) -> bool {
        self.classification == Classification::Violation
    }

    /// Check if this is a blocker-severity violation
    #[inline]
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        self.is_violation() && self.severity == Severity::Blocker
    }

    /// Verify every required text field is present
    ///
    /// # Errors
    /// `MalformedFinding` naming the first blank field.
    pub fn validate(&self) -> Result<(), MalformedFinding> {
        let required = [
            ("id", &self.id),
            ("location", &self.location),
            ("rationale", &self.rationale),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(MalformedFinding {
                    record_id: self.id.clone(),
                    detail: format!("required field `{field}` is empty"),
                });
            }
        }
        Ok(())
    }
}
