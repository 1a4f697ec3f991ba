// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The coordinator talks to an `ExecutorBackend` instead of spawning
//! processes itself. Production uses [`ProcessExecutor`]; tests swap in a
//! scripted backend that replays canned output and exit codes.
//!
//! [`ProcessExecutor`]: crate::exec::ProcessExecutor

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::errors::Result;
use crate::output::OutputSink;

/// A fully resolved command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs(mut self, vars: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn cwd(mut self, dir: Option<PathBuf>) -> Self {
        self.cwd = dir;
        self
    }

    /// Program followed by its arguments.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }

    /// Space-joined argv for logs and dry runs.
    pub fn display(&self) -> String {
        self.argv().join(" ")
    }
}

#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub command: CommandSpec,
    /// Kill the process when it runs longer than this.
    pub timeout: Option<Duration>,
    /// Time between SIGTERM and the forced kill.
    pub grace: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitResult {
    /// Process exit code, `-1` when terminated by a signal.
    pub exit_code: i32,
    pub duration: Duration,
}

impl ExitResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Trait abstracting how a single command is run.
///
/// Implementations must:
/// - push every byte of output into `sink` before returning
/// - return `Ok` with the exit code for any process that ran to completion,
///   whatever the code
/// - return `EngineError::Cancelled` / `EngineError::Timeout` when stopped
///   early, and `EngineError::Spawn` when nothing could be started
pub trait ExecutorBackend: Send + Sync {
    fn execute(
        &self,
        request: ExecRequest,
        sink: OutputSink,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<ExitResult>> + Send + '_>>;
}
