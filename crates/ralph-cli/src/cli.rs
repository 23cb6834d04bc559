//! `ralph`'s argument surface. Every subcommand here is a thin wrapper
//! around the orchestrator core — `clap` derive handles parsing and
//! `--help` text, `crate::commands` does the work.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::format::OutputFormat;

/// Local multi-agent coding orchestrator
///
/// ralph drives a pool of AI coding agents against a shared git repository:
/// a kanban-style task board feeds a priority scheduler, each admitted task
/// gets its own worker in an isolated git worktree, and a declarative
/// lifecycle/pipeline engine carries it from implementation through review
/// to merge or failure.
///
/// QUICK START:
///
///   ralph init
///   ralph validate
///   ralph run
///   ralph status
#[derive(Parser)]
#[command(name = "ralph")]
#[command(version, about)]
#[command(propagate_version = true)]
#[command(after_help = "See 'ralph <command> --help' for more information on a specific command.")]
pub struct Cli {
    /// Project root containing `.ralph/` and `config/` (default: current directory)
    #[arg(short = 'C', long, global = true)]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Scaffold `.ralph/` and `config/` for a new project
    ///
    /// Creates the kanban board, log directories, and default config files
    /// if they don't already exist. Safe to run multiple times.
    Init,

    /// Check the board and config tree for structural errors
    ///
    /// Parses the kanban board and every config file, validating task IDs,
    /// dependency references, lifecycle spec invariants, and pipeline
    /// routing closure. Exits 4 on the first violation found.
    Validate {
        /// Also prune worker directories for tasks no longer on the board
        #[arg(long)]
        cleanup: bool,
    },

    /// Run the orchestrator tick loop until the board is empty or a signal arrives
    ///
    /// Each tick admits ready tasks up to capacity, drives every admitted
    /// worker's pipeline, and processes the conflict queue. SIGINT/SIGTERM
    /// trigger a graceful shutdown: no new admissions, TERM forwarded to
    /// active agent children, event log flushed.
    Run {
        /// Seconds between ticks (default: 2)
        #[arg(long, default_value_t = 2)]
        interval: u64,

        /// Run a single tick and exit instead of looping
        #[arg(long)]
        once: bool,
    },

    /// Summarize the board, worker pool, and recent events
    Status {
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Signal a running orchestrator process to shut down gracefully
    Stop,

    /// Start the orchestrator as a detached background process
    Start,

    /// Manage individual workers
    #[command(subcommand)]
    Worker(WorkerCommand),

    /// Show or write a task's implementation plan
    Plan {
        /// Task ID, e.g. `A-1`
        task_id: String,
    },

    /// Report on a worker's pull request / merge state
    Pr {
        /// Task ID, e.g. `A-1`
        task_id: String,
    },

    /// Check that the environment can run ralph: git, agents, lock files
    Doctor {
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Archive completed tasks and prune stale worker directories
    Clean {
        /// Keep terminal worker directories younger than this many days
        #[arg(long, default_value_t = 7)]
        retention_days: u64,
    },

    /// Inspect one task's full state: board entry, resume budget, lifecycle
    Inspect {
        /// Task ID, e.g. `A-1`
        task_id: String,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Launch the read-only terminal dashboard
    Monitor,
}

#[derive(Subcommand)]
pub enum WorkerCommand {
    /// Admit and spawn a worker for a specific task, bypassing the scheduler
    Start {
        /// Task ID, e.g. `A-1`
        task_id: String,
    },

    /// Request a worker stop at its next checkpoint
    Stop {
        /// Worker ID, e.g. `worker-A-1-0`
        worker_id: String,
    },

    /// Forcibly terminate a worker's agent process and release its pool slot
    Kill {
        /// Worker ID, e.g. `worker-A-1-0`
        worker_id: String,
    },

    /// Re-admit a deferred or retry-eligible worker immediately
    Resume {
        /// Worker ID, e.g. `worker-A-1-0`
        worker_id: String,
    },
}
