// src/exec/mod.rs

//! Process execution layer.
//!
//! - [`backend`] provides the `ExecutorBackend` trait plus the request and
//!   result types shared by every implementation.
//! - [`process`] is the production implementation on top of
//!   `tokio::process::Command`.

pub mod backend;
pub mod process;

pub use backend::{CommandSpec, ExecRequest, ExecutorBackend, ExitResult};
pub use process::ProcessExecutor;
