use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use ralph_cli::cli::{Cli, Command};
use ralph_cli::paths::RalphPaths;
use ralph_cli::{commands, telemetry};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let root = cli.root.clone().unwrap_or_else(|| PathBuf::from("."));
    let paths = RalphPaths::new(&root);

    let _telemetry_guard = telemetry::init(&paths.audit_log())?;

    let code = match cli.command {
        Command::Init => commands::init(&root)?,
        Command::Validate { cleanup } => commands::validate(&root, cleanup)?,
        Command::Run { interval, once } => commands::run(&root, interval, once)?,
        Command::Status { format } => commands::status(&root, format)?,
        Command::Stop => commands::stop(&root)?,
        Command::Start => commands::start(&root)?,
        Command::Worker(ref sub) => commands::worker(&root, sub)?,
        Command::Plan { task_id } => commands::plan(&root, &task_id)?,
        Command::Pr { task_id } => commands::pr(&root, &task_id)?,
        Command::Doctor { format } => commands::doctor(&root, format)?,
        Command::Clean { retention_days } => commands::clean(&root, retention_days)?,
        Command::Inspect { task_id, format } => commands::inspect(&root, &task_id, format)?,
        Command::Monitor => commands::monitor(&root)?,
    };

    std::process::exit(code);
}
