//! Git abstraction layer for ralph.
//!
//! This crate defines the [`GitRepo`] trait — the interface through which
//! the orchestrator isolates each worker in its own git worktree. No other
//! ralph crate shells out to `git` directly; they depend on `ralph-git` and
//! program against the trait so a test double can stand in for it.
//!
//! # Crate layout
//!
//! - [`repo`] — the [`GitRepo`] trait definition.
//! - [`cli`] — a [`CliGitRepo`] implementation backed by the `git` binary.
//! - [`types`] — value types used in trait signatures.
//! - [`error`] — the [`GitError`] enum returned by all trait methods.

pub mod cli;
pub mod error;
pub mod repo;
pub mod types;

pub use cli::CliGitRepo;
pub use error::GitError;
pub use repo::GitRepo;
pub use types::{ChangeType, DiffEntry, GitOid, OidParseError, StatusEntry, WorktreeInfo};
