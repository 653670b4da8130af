//! Testing utilities for the audit panel workspace
//!
//! Shared fixtures: finding builders and a scripted worker.

#![allow(missing_docs)]

use async_trait::async_trait;
use audit_core::{Classification, FindingRecord, Severity, TaskDescriptor, WorkerError, WorkerRole};
use audit_engine::{ReviewWorker, WorkerSet};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub fn violation(id: &str, severity: Severity) -> FindingRecord {
    FindingRecord::new(id, severity, Classification::Violation, "src/lib.rs:10", format!("{id} violated"))
}

pub fn blocker(id: &str) -> FindingRecord {
    violation(id, Severity::Blocker).with_remediation("fix it before merge")
}

pub fn warning(id: &str) -> FindingRecord {
    violation(id, Severity::Warning)
}

pub fn false_alarm(id: &str) -> FindingRecord {
    FindingRecord::new(id, Severity::Warning, Classification::FalseAlarm, "src/lib.rs:20", "looked wrong, is fine")
}

pub fn intentional(id: &str) -> FindingRecord {
    FindingRecord::new(
        id,
        Severity::Advisory,
        Classification::IntentionalPattern,
        "src/lib.rs:30",
        "documented exception",
    )
}

/// What a scripted role does once its delay has passed
#[derive(Debug, Clone)]
pub enum Script {
    Succeed(Vec<FindingRecord>),
    Fail(String),
    Hang,
    Panic(String),
}

/// Worker whose behavior per role is fixed up front
#[derive(Debug, Clone, Default)]
pub struct ScriptedWorker {
    scripts: BTreeMap<WorkerRole, (Duration, Script)>,
}

impl ScriptedWorker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn role(mut self, role: WorkerRole, delay: Duration, script: Script) -> Self {
        self.scripts.insert(role, (delay, script));
        self
    }

    pub fn succeed(self, role: WorkerRole, findings: Vec<FindingRecord>) -> Self {
        self.role(role, Duration::ZERO, Script::Succeed(findings))
    }

    /// Every role in `roles` returns no findings after `delay`
    pub fn all_empty(roles: &[WorkerRole], delay: Duration) -> Self {
        roles
            .iter()
            .fold(Self::new(), |w, r| w.role(*r, delay, Script::Succeed(Vec::new())))
    }

    pub fn into_set(self) -> WorkerSet {
        WorkerSet::uniform(Arc::new(self))
    }
}

#[async_trait]
impl ReviewWorker for ScriptedWorker {
    async fn review(&self, role: WorkerRole, _task: &TaskDescriptor) -> Result<Vec<FindingRecord>, WorkerError> {
        let (delay, script) = self
            .scripts
            .get(&role)
            .cloned()
            .unwrap_or((Duration::ZERO, Script::Succeed(Vec::new())));
        tokio::time::sleep(delay).await;
        match script {
            Script::Succeed(findings) => Ok(findings),
            Script::Fail(cause) => Err(WorkerError::Failed(cause)),
            Script::Hang => {
                std::future::pending::<()>().await;
                Ok(Vec::new())
            }
            Script::Panic(message) => panic!("{message}"),
        }
    }
}
