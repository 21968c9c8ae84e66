//! Taskwright CLI
//!
//! Command-line interface for running browser test specs against the task
//! manager, listing them, and inspecting leftover fixtures.

pub mod commands;
pub mod output;
