//! Command line definition

use audit_core::{AuditConfig, WorkerRole};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Concurrent multi-perspective review runs
#[derive(Parser, Debug)]
#[command(name = "audit-panel")]
#[command(version, about = "Fan a task out to a panel of reviewers and reduce their findings to a verdict")]
pub(crate) struct Cli {
    /// Log filter directive (overrides RUST_LOG)
    #[arg(long, global = true)]
    pub(crate) log: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true, default_value_t = false)]
    pub(crate) log_json: bool,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Start a run, wait for it and print the verdict
    Run(RunArgs),
    /// Print the status document of a run
    Status(RunLocation),
    /// Generate compliance tests from a finished run
    Synthesize(RunLocation),
}

#[derive(Args, Debug)]
pub(crate) struct RunArgs {
    /// Reference of the unit under review
    #[arg(long)]
    pub(crate) task: String,

    /// Role to consult; repeat for several (default: all six)
    #[arg(long = "role")]
    pub(crate) roles: Vec<WorkerRole>,

    /// Reviewer program, invoked once per role
    #[arg(long)]
    pub(crate) worker_cmd: String,

    /// Argument for the reviewer program; `{role}` and `{task}` are substituted
    #[arg(long = "worker-arg", allow_hyphen_values = true)]
    pub(crate) worker_args: Vec<String>,

    /// TOML configuration file
    #[arg(long)]
    pub(crate) config: Option<PathBuf>,

    /// Directory run workspaces are created in
    #[arg(long)]
    pub(crate) workspace: Option<PathBuf>,

    /// Explicit run identifier
    #[arg(long)]
    pub(crate) run_id: Option<String>,

    /// Per-role deadline in milliseconds
    #[arg(long)]
    pub(crate) role_timeout_ms: Option<u64>,

    /// Run-wide deadline in milliseconds
    #[arg(long)]
    pub(crate) global_timeout_ms: Option<u64>,

    /// Ledger polling period in milliseconds
    #[arg(long)]
    pub(crate) poll_ms: Option<u64>,
}

impl RunArgs {
    /// Roles to consult
    pub(crate) fn roles(&self) -> Vec<WorkerRole> {
        if self.roles.is_empty() {
            WorkerRole::ALL.to_vec()
        } else {
            self.roles.clone()
        }
    }

    /// Apply command line overrides on top of `config`
    pub(crate) fn apply(&self, mut config: AuditConfig) -> AuditConfig {
        if let Some(root) = &self.workspace {
            config = config.with_workspace_root(root.clone());
        }
        if let Some(ms) = self.role_timeout_ms {
            config = config.with_role_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.global_timeout_ms {
            config = config.with_global_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.poll_ms {
            config = config.with_poll_interval(Duration::from_millis(ms));
        }
        config
    }
}

#[derive(Args, Debug)]
pub(crate) struct RunLocation {
    /// Directory holding run workspaces
    #[arg(long)]
    pub(crate) workspace: PathBuf,

    /// Run identifier
    #[arg(long)]
    pub(crate) run_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    #[test]
    fn definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_arguments() {
        let cli = Cli::try_parse_from([
            "audit-panel",
            "--log",
            "debug",
            "run",
            "--task",
            "wo-12",
            "--role",
            "security",
            "--role",
            "build",
            "--worker-cmd",
            "reviewer",
            "--worker-arg",
            "--as={role}",
            "--role-timeout-ms",
            "1000",
        ])
        .unwrap();

        assert_eq!(cli.log.as_deref(), Some("debug"));
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.roles(), vec![WorkerRole::Security, WorkerRole::Build]);
        assert_eq!(args.worker_args, vec!["--as={role}"]);

        let config = args.apply(AuditConfig::default());
        assert_eq!(config.role_timeout(), Duration::from_millis(1000));
        assert_eq!(config.global_timeout(), AuditConfig::default().global_timeout());
    }

    #[test]
    fn roles_default_to_full_panel() {
        let cli = Cli::try_parse_from(["audit-panel", "run", "--task", "t", "--worker-cmd", "r"]).unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.roles(), WorkerRole::ALL.to_vec());
    }

    #[test]
    fn unknown_role_rejected() {
        let parsed = Cli::try_parse_from([
            "audit-panel",
            "run",
            "--task",
            "t",
            "--worker-cmd",
            "r",
            "--role",
            "kraken",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn status_arguments() {
        let cli = Cli::try_parse_from(["audit-panel", "status", "--workspace", "/tmp/runs", "--run-id", "r1"]).unwrap();
        let Command::Status(loc) = cli.command else {
            panic!("expected status");
        };
        assert_eq!(loc.run_id, "r1");
    }
}
