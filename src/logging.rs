// src/logging.rs

//! Logging setup for `borgjobs` using `tracing` + `tracing-subscriber`.
//!
//! Filter resolution:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `BORGJOBS_LOG` environment variable, either a bare level ("debug") or
//!    full filter directives ("borgjobs::engine=debug,info")
//! 3. default to `info`
//!
//! Logs are sent to STDERR so that stdout carries only the job event
//! stream. Subprocess output relayed through the log uses the
//! `borgjobs::output` target, so it can be silenced on its own.

use std::io::IsTerminal;

use anyhow::{Result, anyhow};
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogLevel;

pub const LOG_ENV_VAR: &str = "BORGJOBS_LOG";

/// Initialise the global logging subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = resolve_filter(cli_level, std::env::var(LOG_ENV_VAR).ok().as_deref());
    let stderr = std::io::stderr();

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(stderr.is_terminal())
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("failed to initialise logging: {e}"))
}

/// Pick the filter from the CLI level, then the env var value, then `info`.
/// An env value that does not parse falls back to `info`.
pub fn resolve_filter(cli_level: Option<LogLevel>, env_value: Option<&str>) -> EnvFilter {
    if let Some(lvl) = cli_level {
        return EnvFilter::new(level_directive(lvl));
    }
    env_value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| EnvFilter::try_new(normalize(s)).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn level_directive(lvl: LogLevel) -> &'static str {
    match lvl {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}

/// Accept "warning" as an alias the way operators tend to type it.
fn normalize(s: &str) -> String {
    if s.eq_ignore_ascii_case("warning") {
        "warn".to_string()
    } else {
        s.to_lowercase()
    }
}
