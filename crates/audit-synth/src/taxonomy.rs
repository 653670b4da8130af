//! Violation taxonomy
//!
//! Fixed set of categories a generated test is filed under. A finding's
//! category comes from its identifier prefix (`SEC-004` is a security
//! finding); identifiers without a known prefix fall back to the category of
//! the role that reported them.

use audit_core::WorkerRole;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static ID_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([A-Za-z]+)[-_]").expect("prefix regex is valid"));

/// Category of a compliance test
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCategory {
    /// `ARCH-*`
    Architecture,
    /// `SEC-*`
    Security,
    /// `BUILD-*` (also `DEVOPS-*`)
    Build,
    /// `CONC-*` (also `KRAKEN-*`)
    Concurrency,
    /// `OPS-*`
    Observability,
    /// `TEST-*`
    Coverage,
    /// Anything the fixed set does not cover
    Custom,
}

impl ViolationCategory {
    /// Every category, in report order
    pub const ALL: [ViolationCategory; 7] = [
        ViolationCategory::Architecture,
        ViolationCategory::Security,
        ViolationCategory::Build,
        ViolationCategory::Concurrency,
        ViolationCategory::Observability,
        ViolationCategory::Coverage,
        ViolationCategory::Custom,
    ];

    /// Canonical finding-id prefix; `None` for `Custom`
    #[must_use]
    pub fn prefix(&self) -> Option<&'static str> {
        match self {
            ViolationCategory::Architecture => Some("ARCH"),
            ViolationCategory::Security => Some("SEC"),
            ViolationCategory::Build => Some("BUILD"),
            ViolationCategory::Concurrency => Some("CONC"),
            ViolationCategory::Observability => Some("OPS"),
            ViolationCategory::Coverage => Some("TEST"),
            ViolationCategory::Custom => None,
        }
    }

    /// Test suite the category's tests are grouped in
    #[must_use]
    pub fn suite_name(&self) -> &'static str {
        match self {
            ViolationCategory::Architecture => "TestArchitecturalCompliance",
            ViolationCategory::Security => "TestSecurityCompliance",
            ViolationCategory::Build => "TestBuildCompliance",
            ViolationCategory::Concurrency => "TestConcurrencyCompliance",
            ViolationCategory::Observability => "TestObservabilityCompliance",
            ViolationCategory::Coverage => "TestCoverageCompliance",
            ViolationCategory::Custom => "TestCustomCompliance",
        }
    }

    /// Category owned by a role
    #[must_use]
    pub fn for_role(role: WorkerRole) -> Self {
        match role {
            WorkerRole::Architecture => ViolationCategory::Architecture,
            WorkerRole::Security => ViolationCategory::Security,
            WorkerRole::Build => ViolationCategory::Build,
            WorkerRole::Concurrency => ViolationCategory::Concurrency,
            WorkerRole::Observability => ViolationCategory::Observability,
            WorkerRole::Coverage => ViolationCategory::Coverage,
        }
    }

    /// Category named by the prefix of `finding_id`, if it is a known one
    #[must_use]
    pub fn from_finding_id(finding_id: &str) -> Option<Self> {
        let prefix = ID_PREFIX.captures(finding_id)?.get(1)?.as_str().to_ascii_uppercase();
        match prefix.as_str() {
            "ARCH" => Some(ViolationCategory::Architecture),
            "SEC" => Some(ViolationCategory::Security),
            "BUILD" | "DEVOPS" => Some(ViolationCategory::Build),
            "CONC" | "KRAKEN" => Some(ViolationCategory::Concurrency),
            "OPS" => Some(ViolationCategory::Observability),
            "TEST" => Some(ViolationCategory::Coverage),
            "CUSTOM" => Some(ViolationCategory::Custom),
            _ => None,
        }
    }

    /// Category of a finding reported by `role`
    #[must_use]
    pub fn classify(finding_id: &str, role: WorkerRole) -> Self {
        Self::from_finding_id(finding_id).unwrap_or_else(|| Self::for_role(role))
    }
}

impl std::fmt::Display for ViolationCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.prefix().unwrap_or("CUSTOM"))
    }
}
