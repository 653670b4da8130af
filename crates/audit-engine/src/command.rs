//! External process worker
//!
//! Runs a program per role and reads a JSON array of finding records from its
//! stdout. `{role}` and `{task}` in the arguments are replaced with the role
//! name and the task reference.

use crate::worker::ReviewWorker;
use async_trait::async_trait;
use audit_core::{FindingRecord, TaskDescriptor, WorkerError, WorkerRole};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

const STDERR_TAIL: usize = 512;

/// Worker backed by an external command
#[derive(Debug, Clone)]
pub struct CommandWorker {
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    cwd: Option<PathBuf>,
}

impl CommandWorker {
    /// Create worker running `program`
    #[inline]
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    /// Append one argument (placeholders allowed)
    #[inline]
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    #[inline]
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the child
    #[inline]
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Run the child in `dir`
    #[inline]
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    fn expand(&self, role: WorkerRole, task: &TaskDescriptor) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.replace("{role}", role.as_str()).replace("{task}", &task.reference))
            .collect()
    }
}

#[async_trait]
impl ReviewWorker for CommandWorker {
    async fn review(
        &self,
        role: WorkerRole,
        task: &TaskDescriptor,
    ) -> Result<Vec<FindingRecord>, WorkerError> {
        let args = self.expand(role, task);
        tracing::debug!(program = %self.program, ?args, %role, "spawning worker process");

        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&args)
            .envs(&self.env)
            .env("AUDIT_ROLE", role.as_str())
            .env("AUDIT_TASK", &task.reference)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| WorkerError::Process(format!("failed to run {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .chars()
                .rev()
                .take(STDERR_TAIL)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            return Err(WorkerError::Failed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                tail.trim()
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| WorkerError::InvalidOutput(format!("{}: {e}", self.program)))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_expanded() {
        let worker = CommandWorker::new("reviewer").args(["--role={role}", "{task}", "plain"]);
        let args = worker.expand(WorkerRole::Coverage, &TaskDescriptor::new("wo-3"));
        assert_eq!(args, vec!["--role=coverage", "wo-3", "plain"]);
    }

    #[tokio::test]
    async fn parses_findings_from_stdout() {
        let json = r#"[{"id":"OPS-1","severity":"warning","location":"src/main.rs","classification":"violation","rationale":"no tenant in logs"}]"#;
        let worker = CommandWorker::new("sh").arg("-c").arg(format!("printf '%s' '{json}'"));
        let findings = worker
            .review(WorkerRole::Observability, &TaskDescriptor::new("t"))
            .await
            .unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].id, "OPS-1");
    }

    #[tokio::test]
    async fn role_is_exported_to_child() {
        let worker = CommandWorker::new("sh")
            .arg("-c")
            .arg(r#"test "$AUDIT_ROLE" = build && echo '[]'"#);
        let findings = worker
            .review(WorkerRole::Build, &TaskDescriptor::new("t"))
            .await
            .unwrap();
        assert!(findings.is_empty());
    }

    #[tokio::test]
    async fn non_zero_exit_is_failure() {
        let worker = CommandWorker::new("sh").arg("-c").arg("echo nope >&2; exit 3");
        let err = worker
            .review(WorkerRole::Build, &TaskDescriptor::new("t"))
            .await
            .unwrap_err();
        match err {
            WorkerError::Failed(msg) => assert!(msg.contains("nope")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn garbage_stdout_is_invalid_output() {
        let worker = CommandWorker::new("sh").arg("-c").arg("echo not-json");
        let err = worker
            .review(WorkerRole::Build, &TaskDescriptor::new("t"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::InvalidOutput(_)));
    }

    #[tokio::test]
    async fn missing_program_is_process_error() {
        let worker = CommandWorker::new("/nonexistent/reviewer");
        let err = worker
            .review(WorkerRole::Build, &TaskDescriptor::new("t"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Process(_)));
    }
}
