//! Command-line interface for genfleet.
//!
//! Provides the worker entry point (`run`) and operator commands for
//! inspecting queues and removing jobs.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
