//! Test synthesizer
//!
//! Maps every `Violation` finding to exactly one generated compliance test.
//! The mapping is structural: the detection predicate is built from the
//! finding's location and rationale, nothing is interpreted. Records that are
//! not violations, or that cannot be used, are reported as skip entries with
//! a reason instead of disappearing.
//!
//! Output order is role, then record identifier, regardless of input order.

use crate::error::SynthesisError;
use crate::taxonomy::ViolationCategory;
use audit_core::{Classification, FindingRecord, Recommendation, RunId, Severity, Verdict, WorkerRole};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("slug regex is valid"));

const MAX_LOCATION_SLUG: usize = 48;

/// Outcome a generated test expects against the reviewed unit as it is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Polarity {
    /// Test passes on the reviewed unit
    Pass,
    /// Test fails on the reviewed unit until the finding is remediated
    Fail,
}

/// One generated detection test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedTest {
    /// Finding the test was generated from
    pub source_finding_id: String,
    /// Role that reported the finding
    pub role: WorkerRole,
    /// Taxonomy category
    pub category: ViolationCategory,
    /// Suite the test belongs to
    pub suite: String,
    /// Test function name
    pub test_name: String,
    /// What the test checks
    pub detection_description: String,
    /// Expected outcome against the reviewed unit
    pub expected_polarity: Polarity,
    /// Finding id and cited rule
    pub citation: String,
    /// Assertion message, with a `FIX:` line when a remediation is known
    pub failure_message: String,
    /// Severity of the source finding
    pub severity: Severity,
}

/// Why a record produced no test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail")]
pub enum SkipReason {
    /// Deliberate, documented deviation
    IntentionalPattern,
    /// The reviewer retracted the finding
    FalseAlarm,
    /// The record could not be used
    Malformed(String),
    /// The reporting role is a missing perspective of the verdict
    MissingPerspective,
}

/// A record that produced no test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkipEntry {
    /// Identifier of the record (may be empty for malformed records)
    pub record_id: String,
    /// Role whose slot held the record
    pub role: WorkerRole,
    /// Reason
    pub reason: SkipReason,
}

/// Output artifact of the synthesis stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisReport {
    /// Run the findings came from
    pub run_id: RunId,
    /// Recommendation of that run's verdict
    pub recommendation: Recommendation,
    /// Generated tests, ordered by role then finding id
    pub tests: Vec<GeneratedTest>,
    /// Records that produced no test, same order
    pub skipped: Vec<SkipEntry>,
    /// Roles whose findings were not available to the verdict
    pub missing_perspectives: Vec<WorkerRole>,
}

impl SynthesisReport {
    /// Number of generated tests per category
    #[must_use]
    pub fn tests_by_category(&self) -> BTreeMap<ViolationCategory, usize> {
        let mut counts = BTreeMap::new();
        for test in &self.tests {
            *counts.entry(test.category).or_default() += 1;
        }
        counts
    }
}

enum Triage {
    Test(GeneratedTest),
    Skip(SkipReason),
}

/// Test synthesizer
#[derive(Debug, Clone, Copy, Default)]
pub struct TestSynthesizer;

impl TestSynthesizer {
    /// Generate one test per violation in `findings`
    ///
    /// Findings from roles the verdict lists as missing perspectives produce
    /// no test, since the verdict never saw them; each is reported as a
    /// `MissingPerspective` skip entry.
    ///
    /// # Arguments
    /// * `verdict` - Verdict of the run the findings belong to
    /// * `findings` - Every finding, paired with the role that reported it
    pub fn synthesize(verdict: &Verdict, findings: &[(WorkerRole, FindingRecord)]) -> SynthesisReport {
        let inputs = findings
            .iter()
            .map(|(role, record)| (*role, Ok(record.clone())))
            .collect();
        Self::build(verdict, inputs)
    }

    /// Generate tests from raw slot documents as stored in a run workspace
    ///
    /// Each slot is expected to be a JSON array of finding records. Entries
    /// that do not decode become `Malformed` skip entries; a slot that is not
    /// an array becomes a single one.
    pub fn synthesize_documents(
        verdict: &Verdict,
        slots: &BTreeMap<WorkerRole, serde_json::Value>,
    ) -> SynthesisReport {
        let mut inputs = Vec::new();
        for (role, document) in slots {
            let Some(entries) = document.as_array() else {
                inputs.push((
                    *role,
                    Err(SynthesisError::Undecodable {
                        role: *role,
                        index: 0,
                        record_id: String::new(),
                        detail: "slot document is not an array".to_string(),
                    }),
                ));
                continue;
            };
            for (index, entry) in entries.iter().enumerate() {
                let decoded = FindingRecord::deserialize(entry).map_err(|e| SynthesisError::Undecodable {
                    role: *role,
                    index,
                    record_id: entry
                        .get("id")
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    detail: e.to_string(),
                });
                inputs.push((*role, decoded));
            }
        }
        Self::build(verdict, inputs)
    }

    /// Turn one violation into a test
    ///
    /// # Errors
    /// `SynthesisError::Malformed` if a required field is blank.
    pub fn generate(role: WorkerRole, record: &FindingRecord) -> Result<GeneratedTest, SynthesisError> {
        record.validate()?;

        let category = ViolationCategory::classify(&record.id, role);
        let citation = match &record.reference {
            Some(reference) => format!("FINDING: {}; LAW: {reference}", record.id),
            None => format!("FINDING: {}", record.id),
        };
        let mut failure_message = format!(
            "{} at {}: {}\n{citation}",
            record.id, record.location, record.rationale
        );
        if let Some(fix) = &record.remediation {
            failure_message.push_str("\nFIX: ");
            failure_message.push_str(fix);
        }

        Ok(GeneratedTest {
            source_finding_id: record.id.clone(),
            role,
            category,
            suite: category.suite_name().to_string(),
            test_name: test_name(&record.id, &record.location),
            detection_description: format!(
                "detects at `{}`: {}",
                record.location, record.rationale
            ),
            expected_polarity: Polarity::Fail,
            citation,
            failure_message,
            severity: record.severity,
        })
    }

    fn triage(role: WorkerRole, record: &FindingRecord) -> Result<Triage, SynthesisError> {
        match record.classification {
            Classification::Violation => Self::generate(role, record).map(Triage::Test),
            Classification::IntentionalPattern => {
                record.validate()?;
                Ok(Triage::Skip(SkipReason::IntentionalPattern))
            }
            Classification::FalseAlarm => {
                record.validate()?;
                Ok(Triage::Skip(SkipReason::FalseAlarm))
            }
        }
    }

    fn build(
        verdict: &Verdict,
        inputs: Vec<(WorkerRole, Result<FindingRecord, SynthesisError>)>,
    ) -> SynthesisReport {
        let missing: BTreeSet<WorkerRole> = verdict.missing_perspectives.iter().copied().collect();
        let mut tests = Vec::new();
        let mut skipped = Vec::new();

        for (role, input) in inputs {
            if missing.contains(&role) {
                let record_id = match &input {
                    Ok(record) => record.id.clone(),
                    Err(err) => err.record_id().to_string(),
                };
                tracing::debug!(%role, %record_id, "finding from missing perspective skipped");
                skipped.push(SkipEntry {
                    record_id,
                    role,
                    reason: SkipReason::MissingPerspective,
                });
                continue;
            }
            let outcome = input.and_then(|record| Self::triage(role, &record).map(|t| (record.id, t)));

            match outcome {
                Ok((_, Triage::Test(test))) => tests.push(test),
                Ok((record_id, Triage::Skip(reason))) => skipped.push(SkipEntry {
                    record_id,
                    role,
                    reason,
                }),
                Err(err) => {
                    tracing::warn!(%role, record_id = err.record_id(), error = %err, "finding skipped");
                    skipped.push(SkipEntry {
                        record_id: err.record_id().to_string(),
                        role,
                        reason: SkipReason::Malformed(err.to_string()),
                    });
                }
            }
        }

        tests.sort_by(|a, b| (a.role, &a.source_finding_id).cmp(&(b.role, &b.source_finding_id)));
        skipped.sort_by(|a, b| (a.role, &a.record_id).cmp(&(b.role, &b.record_id)));

        tracing::info!(
            run_id = %verdict.run_id,
            tests = tests.len(),
            skipped = skipped.len(),
            "synthesis complete"
        );
        SynthesisReport {
            run_id: verdict.run_id.clone(),
            recommendation: verdict.recommendation,
            tests,
            skipped,
            missing_perspectives: verdict.missing_perspectives.clone(),
        }
    }
}

/// `test_{id}_{location}_compliant`, lower snake case
fn test_name(id: &str, location: &str) -> String {
    let id = slug(id);
    let mut location = slug(location);
    if location.len() > MAX_LOCATION_SLUG {
        location.truncate(MAX_LOCATION_SLUG);
        location = location.trim_end_matches('_').to_string();
    }
    if location.is_empty() {
        format!("test_{id}_compliant")
    } else {
        format!("test_{id}_{location}_compliant")
    }
}

fn slug(text: &str) -> String {
    NON_WORD
        .replace_all(&text.to_ascii_lowercase(), "_")
        .trim_matches('_')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_snake_case() {
        assert_eq!(
            test_name("SEC-001", "src/db/session.rs:42"),
            "test_sec_001_src_db_session_rs_42_compliant"
        );
        assert_eq!(test_name("OPS-2", "***"), "test_ops_2_compliant");
    }

    #[test]
    fn long_locations_are_truncated() {
        let name = test_name("ARCH-1", &"deeply/nested/".repeat(20));
        assert!(name.len() <= "test_arch_1__compliant".len() + MAX_LOCATION_SLUG);
        assert!(!name.contains("__"));
    }

    #[test]
    fn generated_test_fields() {
        let record = FindingRecord::new(
            "SEC-004",
            Severity::Blocker,
            Classification::Violation,
            "src/db/session.rs:42",
            "SET ROLE without RESET ROLE",
        )
        .with_remediation("Reset the role in a finally block")
        .with_reference("SESSION-AND-TENANT-LAW §4");

        let test = TestSynthesizer::generate(WorkerRole::Architecture, &record).unwrap();
        assert_eq!(test.category, ViolationCategory::Security);
        assert_eq!(test.suite, "TestSecurityCompliance");
        assert_eq!(test.expected_polarity, Polarity::Fail);
        assert_eq!(test.citation, "FINDING: SEC-004; LAW: SESSION-AND-TENANT-LAW §4");
        assert!(test.detection_description.contains("src/db/session.rs:42"));
        assert!(test.detection_description.contains("SET ROLE without RESET ROLE"));
        assert!(test.failure_message.ends_with("FIX: Reset the role in a finally block"));
    }

    #[test]
    fn failure_message_without_remediation_has_no_fix_line() {
        let record = FindingRecord::new("OPS-1", Severity::Warning, Classification::Violation, "a", "b");
        let test = TestSynthesizer::generate(WorkerRole::Observability, &record).unwrap();
        assert!(!test.failure_message.contains("FIX:"));
    }

    #[test]
    fn skip_reason_serialized_with_kind() {
        let json = serde_json::to_value(SkipReason::Malformed("no id".into())).unwrap();
        assert_eq!(json["kind"], "Malformed");
        assert_eq!(json["detail"], "no id");
        let json = serde_json::to_value(SkipReason::FalseAlarm).unwrap();
        assert_eq!(json["kind"], "FalseAlarm");
    }
}
