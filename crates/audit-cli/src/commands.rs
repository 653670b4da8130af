//! Subcommand implementations

use crate::cli::{RunArgs, RunLocation};
use anyhow::Context;
use audit_core::{AuditConfig, RunId, TaskDescriptor, Verdict};
use audit_engine::{CommandWorker, Orchestrator, RunWorkspace, WorkerSet};
use audit_synth::{SynthesisReport, TestSynthesizer};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Start a run, wait for it and finalize it
pub(crate) async fn run(args: &RunArgs) -> anyhow::Result<Verdict> {
    let base = match &args.config {
        Some(path) => AuditConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => AuditConfig::default(),
    };
    let config = args.apply(base);

    let worker = CommandWorker::new(&args.worker_cmd).args(args.worker_args.iter().cloned());
    let orchestrator = Orchestrator::new(config, WorkerSet::uniform(Arc::new(worker)))?;

    let task = TaskDescriptor::new(&args.task);
    let roles = args.roles();
    let run_id = match &args.run_id {
        Some(id) => orchestrator.start_run_with_id(RunId::new(id.as_str()), task, &roles)?,
        None => orchestrator.start_run(task, &roles)?,
    };

    let config = orchestrator.config();
    let state = orchestrator
        .await_completion(&run_id, config.poll_interval(), config.global_timeout())
        .await?;
    tracing::debug!(run_id = %run_id, missing = ?state.missing_perspectives(), "run settled");

    Ok(orchestrator.finalize(&run_id)?)
}

/// Read the status document of a run
pub(crate) fn status(location: &RunLocation) -> anyhow::Result<serde_json::Value> {
    let workspace = open(location)?;
    let state = workspace.read_status()?;
    Ok(serde_json::to_value(state)?)
}

/// Synthesize tests from a finalized run on disk and store them next to it
pub(crate) fn synthesize(location: &RunLocation) -> anyhow::Result<SynthesisReport> {
    let workspace = open(location)?;
    let verdict = workspace
        .read_verdict()
        .context("run has no verdict yet; finalize it first")?;
    let state = workspace.read_status()?;

    let mut slots = BTreeMap::new();
    for role in state.roles.keys().copied() {
        if let Some(document) = workspace.read_slot_raw(role)? {
            slots.insert(role, document);
        }
    }

    let report = TestSynthesizer::synthesize_documents(&verdict, &slots);
    workspace.write_tests(&report)?;
    Ok(report)
}

fn open(location: &RunLocation) -> anyhow::Result<RunWorkspace> {
    let run_id = RunId::new(location.run_id.as_str());
    RunWorkspace::open(&location.workspace, &run_id)
        .with_context(|| format!("run {run_id} not found under {}", location.workspace.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use audit_core::{Classification, FindingRecord, Recommendation, Severity, WorkerRole};
    use audit_engine::worker_fn;

    #[tokio::test]
    async fn synthesize_reads_workspace_and_writes_report() {
        let root = tempfile::tempdir().unwrap();
        let workers = WorkerSet::new()
            .with_fallback(worker_fn(|_, _| async { Ok(vec![]) }))
            .with_role(
                WorkerRole::Security,
                worker_fn(|_, task| async move {
                    Ok(vec![FindingRecord::new(
                        "SEC-001",
                        Severity::Blocker,
                        Classification::Violation,
                        format!("{}/src/auth.rs:9", task.reference),
                        "token logged in clear",
                    )])
                }),
            );
        let config = AuditConfig::default().with_workspace_root(root.path());
        let orchestrator = Orchestrator::new(config, workers).unwrap();
        let run_id = orchestrator
            .start_run_with_id(RunId::new("cli-synth"), TaskDescriptor::new("svc"), &WorkerRole::ALL)
            .unwrap();
        orchestrator
            .await_completion(&run_id, std::time::Duration::from_millis(5), std::time::Duration::from_secs(10))
            .await
            .unwrap();
        orchestrator.finalize(&run_id).unwrap();

        let location = RunLocation {
            workspace: root.path().to_path_buf(),
            run_id: "cli-synth".into(),
        };
        let report = synthesize(&location).unwrap();
        assert_eq!(report.recommendation, Recommendation::Blocked);
        assert_eq!(report.tests.len(), 1);
        assert_eq!(report.tests[0].source_finding_id, "SEC-001");

        let written = RunWorkspace::open(root.path(), &run_id).unwrap().tests_path();
        assert!(written.exists());
        assert_eq!(status(&location).unwrap()["allComplete"], true);
    }

    #[test]
    fn synthesize_requires_verdict() {
        let root = tempfile::tempdir().unwrap();
        RunWorkspace::create(root.path(), &RunId::new("open-run")).unwrap();
        let location = RunLocation {
            workspace: root.path().to_path_buf(),
            run_id: "open-run".into(),
        };
        let err = synthesize(&location).unwrap_err();
        assert!(err.to_string().contains("finalize"));
    }

    #[test]
    fn missing_run_is_reported() {
        let root = tempfile::tempdir().unwrap();
        let location = RunLocation {
            workspace: root.path().to_path_buf(),
            run_id: "nope".into(),
        };
        let err = status(&location).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }
}
