//! ralph CLI crate — all CLI-specific modules live here.
//!
//! The binary entry point is in `main.rs`, which depends on this lib crate
//! like any other caller; keeping the logic here (rather than inline in
//! `main.rs`) lets integration tests exercise commands directly.

pub mod agent_runtime;
pub mod cli;
pub mod commands;
pub mod config;
pub mod format;
pub mod orchestrator;
pub mod paths;
pub mod telemetry;
pub mod violations;
