// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! Task-level failures (`Spawn`, `Execution`, `Timeout`, `Cancelled`) are
//! produced by the executor and task handlers and are always converted into
//! task state transitions by the coordinator. `Persistence` errors are logged
//! and never roll back in-memory state. `InvalidTransition` is the only
//! variant allowed to abort a job driver.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command exited with code {code}")]
    Execution { code: i32 },

    #[error("task exceeded its {0:?} budget and was killed")]
    Timeout(Duration),

    #[error("cancelled by user")]
    Cancelled,

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("illegal transition for {subject}: {from} -> {to}")]
    InvalidTransition {
        subject: String,
        from: String,
        to: String,
    },

    #[error("Invalid task: {0}")]
    InvalidTask(String),

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("coordinator already started")]
    AlreadyStarted,

    #[error("coordinator is shutting down")]
    ShuttingDown,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Build a `Persistence` error from anything displayable.
    pub fn persistence(err: impl std::fmt::Display) -> Self {
        EngineError::Persistence(err.to_string())
    }

    pub fn invalid_task(msg: impl Into<String>) -> Self {
        EngineError::InvalidTask(msg.into())
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, EngineError>;
