// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `borgjobs`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "borgjobs",
    version,
    about = "Run borg backup pipelines with queuing, live output and crash recovery.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Borgjobs.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Borgjobs.toml")]
    pub config: String,

    /// Pipelines to run. All pipelines in the file when omitted.
    #[arg(value_name = "PIPELINE")]
    pub pipelines: Vec<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `BORGJOBS_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the commands each pipeline would run, but
    /// don't execute anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Print events as JSON lines instead of human-readable text.
    #[arg(long)]
    pub json: bool,

    /// Only reconcile jobs interrupted by a previous crash, then exit.
    #[arg(long)]
    pub recover_only: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
