//! ralph library crate — re-exports the orchestrator domain crates for
//! workspace-level integration tests.
//!
//! The primary interface is the `ralph` CLI binary (in the `ralph-cli`
//! crate). This crate exists so `tests/*.rs` can exercise `ralph-core` and
//! `ralph-git` together without depending on the CLI's argument parsing.

pub use ralph_core as core;
pub use ralph_git as git;
