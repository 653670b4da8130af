//! `audit-panel` - command line front end for review runs
//!
//! Exit codes for `run`: 0 = Go, 1 = ConditionalGo, 2 = Blocked.
//! Any error exits with 3.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Command};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const ERROR_EXIT: u8 = 3;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_tracing(cli.log.as_deref(), cli.log_json) {
        eprintln!("error: {e:#}");
        return ExitCode::from(ERROR_EXIT);
    }

    match dispatch(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e:#}");
            ExitCode::from(ERROR_EXIT)
        }
    }
}

async fn dispatch(command: Command) -> anyhow::Result<ExitCode> {
    match command {
        Command::Run(args) => {
            let verdict = commands::run(&args).await?;
            println!("{}", serde_json::to_string_pretty(&verdict)?);
            let code = u8::try_from(verdict.recommendation.exit_code()).unwrap_or(ERROR_EXIT);
            Ok(ExitCode::from(code))
        }
        Command::Status(location) => {
            let status = commands::status(&location)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Synthesize(location) => {
            let report = commands::synthesize(&location)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing(directive: Option<&str>, json: bool) -> anyhow::Result<()> {
    let filter = match directive {
        Some(directive) => EnvFilter::try_new(directive)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}
