//! Aggregator
//!
//! Pure reduction of a terminal run into a [`Verdict`]. Only roles that reached
//! `Complete` contribute records; `Failed` and `TimedOut` roles contribute
//! nothing and are listed as missing perspectives. The verdict carries no
//! wall-clock data, so aggregating the same run twice yields byte-identical
//! documents.

use crate::error::OrchestratorError;
use crate::slots::OutputSlots;
use audit_core::{
    Classification, FindingRecord, Recommendation, RunState, Severity, Verdict, WorkerRole, WorkerState,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Verdict reducer
#[derive(Debug, Clone, Copy, Default)]
pub struct Aggregator;

impl Aggregator {
    /// Aggregate a terminal run from its output slots
    ///
    /// # Errors
    /// `OrchestratorError::RunNotComplete` if any role is still outstanding.
    pub fn aggregate(state: &RunState, slots: &OutputSlots) -> Result<Verdict, OrchestratorError> {
        if !state.all_complete {
            return Err(OrchestratorError::RunNotComplete(state.run_id.clone()));
        }
        Ok(Self::reduce(state, |role| slots.findings(role)))
    }

    /// Reduce `state` using `lookup` to fetch each completed role's records
    ///
    /// A `Complete` role whose records cannot be found is reported as a
    /// missing perspective rather than as a role with no findings.
    pub fn reduce<F>(state: &RunState, lookup: F) -> Verdict
    where
        F: Fn(WorkerRole) -> Option<Arc<Vec<FindingRecord>>>,
    {
        let mut counts_by_severity: BTreeMap<Severity, usize> =
            Severity::ALL.iter().map(|s| (*s, 0)).collect();
        let mut counts_by_classification: BTreeMap<Classification, usize> =
            Classification::ALL.iter().map(|c| (*c, 0)).collect();
        let mut tally: BTreeMap<Classification, BTreeMap<Severity, usize>> = Classification::ALL
            .iter()
            .map(|c| (*c, Severity::ALL.iter().map(|s| (*s, 0)).collect()))
            .collect();

        let mut consulted = Vec::new();
        let mut missing = Vec::new();
        let mut blockers: Vec<(WorkerRole, FindingRecord)> = Vec::new();
        let mut total = 0;

        for (role, status) in &state.roles {
            if status.status != WorkerState::Complete {
                missing.push(*role);
                continue;
            }
            let Some(records) = lookup(*role) else {
                tracing::warn!(run_id = %state.run_id, %role, "completed role has no output slot");
                missing.push(*role);
                continue;
            };
            consulted.push(*role);

            for record in records.iter() {
                total += 1;
                *counts_by_classification.entry(record.classification).or_default() += 1;
                *tally
                    .entry(record.classification)
                    .or_default()
                    .entry(record.severity)
                    .or_default() += 1;
                if record.is_violation() {
                    *counts_by_severity.entry(record.severity).or_default() += 1;
                }
                if record.is_blocking() {
                    blockers.push((*role, record.clone()));
                }
            }
        }

        blockers.sort_by(|a, b| (a.0, &a.1.id).cmp(&(b.0, &b.1.id)));
        let recommendation = recommend(&counts_by_severity);

        Verdict {
            run_id: state.run_id.clone(),
            recommendation,
            counts_by_severity,
            counts_by_classification,
            tally,
            total_findings: total,
            blockers: blockers.into_iter().map(|(_, record)| record).collect(),
            consulted,
            missing_perspectives: missing,
        }
    }
}

/// Blocker violation -> `Blocked`; else warning violation -> `ConditionalGo`; else `Go`
fn recommend(violations_by_severity: &BTreeMap<Severity, usize>) -> Recommendation {
    let count = |s: Severity| violations_by_severity.get(&s).copied().unwrap_or(0);
    if count(Severity::Blocker) > 0 {
        Recommendation::Blocked
    } else if count(Severity::Warning) > 0 {
        Recommendation::ConditionalGo
    } else {
        Recommendation::Go
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audit_core::{RunId, TaskDescriptor, WorkerStatus};
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn state(statuses: &[(WorkerRole, WorkerState)]) -> RunState {
        let roles: BTreeMap<WorkerRole, WorkerStatus> = statuses
            .iter()
            .map(|(role, s)| {
                let mut status = WorkerStatus::pending();
                status.status = *s;
                (*role, status)
            })
            .collect();
        let all_complete = roles.values().all(WorkerStatus::is_terminal);
        RunState {
            run_id: RunId::new("agg"),
            task: TaskDescriptor::new("t"),
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            roles,
            all_complete,
            revision: 0,
            verdict: None,
        }
    }

    fn all_complete() -> RunState {
        state(&WorkerRole::ALL.map(|r| (r, WorkerState::Complete)))
    }

    fn rec(id: &str, severity: Severity, classification: Classification) -> FindingRecord {
        FindingRecord::new(id, severity, classification, "src/lib.rs:1", "because")
    }

    fn lookup_from(
        map: BTreeMap<WorkerRole, Vec<FindingRecord>>,
    ) -> impl Fn(WorkerRole) -> Option<Arc<Vec<FindingRecord>>> {
        move |role| Some(Arc::new(map.get(&role).cloned().unwrap_or_default()))
    }

    #[test]
    fn empty_run_is_go() {
        let verdict = Aggregator::reduce(&all_complete(), lookup_from(BTreeMap::new()));
        assert_eq!(verdict.recommendation, Recommendation::Go);
        assert_eq!(verdict.total_findings, 0);
        assert_eq!(verdict.counts_by_severity[&Severity::Blocker], 0);
        assert_eq!(verdict.consulted.len(), 6);
    }

    #[test]
    fn warning_violation_is_conditional() {
        let findings = BTreeMap::from([(
            WorkerRole::Build,
            vec![rec("BUILD-1", Severity::Warning, Classification::Violation)],
        )]);
        let verdict = Aggregator::reduce(&all_complete(), lookup_from(findings));
        assert_eq!(verdict.recommendation, Recommendation::ConditionalGo);
    }

    #[test]
    fn non_violations_do_not_drive_recommendation() {
        let findings = BTreeMap::from([(
            WorkerRole::Security,
            vec![
                rec("SEC-1", Severity::Blocker, Classification::FalseAlarm),
                rec("SEC-2", Severity::Blocker, Classification::IntentionalPattern),
            ],
        )]);
        let verdict = Aggregator::reduce(&all_complete(), lookup_from(findings));
        assert_eq!(verdict.recommendation, Recommendation::Go);
        assert!(verdict.blockers.is_empty());
        assert_eq!(verdict.counts_by_severity[&Severity::Blocker], 0);
        assert_eq!(verdict.counts_by_classification[&Classification::FalseAlarm], 1);
        assert_eq!(verdict.tally[&Classification::IntentionalPattern][&Severity::Blocker], 1);
        assert_eq!(verdict.total_findings, 2);
    }

    #[test]
    fn failed_and_timed_out_roles_are_missing() {
        let mut statuses = WorkerRole::ALL.map(|r| (r, WorkerState::Complete));
        statuses[1].1 = WorkerState::Failed;
        statuses[4].1 = WorkerState::TimedOut;
        let findings = BTreeMap::from([(
            WorkerRole::Security,
            vec![rec("SEC-1", Severity::Blocker, Classification::Violation)],
        )]);

        let verdict = Aggregator::reduce(&state(&statuses), lookup_from(findings));
        assert_eq!(
            verdict.missing_perspectives,
            vec![WorkerRole::Security, WorkerRole::Observability]
        );
        // the failed role's records are never read
        assert_eq!(verdict.recommendation, Recommendation::Go);
        assert_eq!(verdict.consulted.len(), 4);
    }

    #[test]
    fn blockers_ordered_by_role_then_id() {
        let findings = BTreeMap::from([
            (
                WorkerRole::Concurrency,
                vec![
                    rec("CONC-2", Severity::Blocker, Classification::Violation),
                    rec("CONC-1", Severity::Blocker, Classification::Violation),
                ],
            ),
            (
                WorkerRole::Architecture,
                vec![rec("ARCH-7", Severity::Blocker, Classification::Violation)],
            ),
        ]);
        let verdict = Aggregator::reduce(&all_complete(), lookup_from(findings));
        let ids: Vec<&str> = verdict.blockers.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["ARCH-7", "CONC-1", "CONC-2"]);
    }

    #[test]
    fn aggregate_refuses_outstanding_run() {
        let mut statuses = WorkerRole::ALL.map(|r| (r, WorkerState::Complete));
        statuses[0].1 = WorkerState::Running;
        let slots = OutputSlots::new(&WorkerRole::ALL);
        let err = Aggregator::aggregate(&state(&statuses), &slots).unwrap_err();
        assert!(matches!(err, OrchestratorError::RunNotComplete(_)));
    }

    #[test]
    fn completed_role_without_slot_is_missing() {
        let slots = OutputSlots::new(&WorkerRole::ALL);
        for role in WorkerRole::ALL.iter().skip(1) {
            slots.publish(*role, vec![]).unwrap();
        }
        let verdict = Aggregator::aggregate(&all_complete(), &slots).unwrap();
        assert_eq!(verdict.missing_perspectives, vec![WorkerRole::Architecture]);
    }

    fn arb_record() -> impl Strategy<Value = FindingRecord> {
        (
            0u32..1000,
            prop::sample::select(Severity::ALL.to_vec()),
            prop::sample::select(Classification::ALL.to_vec()),
        )
            .prop_map(|(n, s, c)| rec(&format!("X-{n}"), s, c))
    }

    fn arb_findings() -> impl Strategy<Value = BTreeMap<WorkerRole, Vec<FindingRecord>>> {
        prop::collection::btree_map(
            prop::sample::select(WorkerRole::ALL.to_vec()),
            prop::collection::vec(arb_record(), 0..6),
            0..6,
        )
    }

    proptest! {
        #[test]
        fn aggregation_is_idempotent(findings in arb_findings()) {
            let state = all_complete();
            let first = Aggregator::reduce(&state, lookup_from(findings.clone()));
            let second = Aggregator::reduce(&state, lookup_from(findings));
            prop_assert_eq!(serde_json::to_vec(&first).unwrap(), serde_json::to_vec(&second).unwrap());
            prop_assert_eq!(first.digest().unwrap(), second.digest().unwrap());
        }

        #[test]
        fn adding_a_blocker_violation_blocks(findings in arb_findings(), role in prop::sample::select(WorkerRole::ALL.to_vec())) {
            let state = all_complete();
            let before = Aggregator::reduce(&state, lookup_from(findings.clone()));

            let mut more = findings;
            more.entry(role).or_default().push(rec("ADDED-1", Severity::Blocker, Classification::Violation));
            let after = Aggregator::reduce(&state, lookup_from(more));

            prop_assert_eq!(after.recommendation, Recommendation::Blocked);
            prop_assert!(after.recommendation >= before.recommendation);
            prop_assert_eq!(after.blockers.len(), before.blockers.len() + 1);
        }
    }
}
