//! CLI Adapter
//!
//! Command-line interface for the listing sniper.
//! Uses clap derive macros for argument parsing.

mod commands;
mod status;

pub use commands::{execute, init_logging, validate_file, CliApp, Command, RunCmd, StatusCmd, ValidateCmd};
pub use status::{render_json, render_text};

