// src/tasks/mod.rs

//! Task kinds and their handlers.
//!
//! Each `TaskKind` maps to one [`TaskHandler`] in the [`TaskRegistry`]. A
//! handler validates its parameters at submission, turns them into a
//! concrete command line, and classifies the exit code. Running the command
//! is shared ([`run_default`]) so every kind gets the same timeout,
//! cancellation and output handling.
//!
//! - [`borg`]: backup, prune, check, compact.
//! - [`cloud_sync`]: mirror the repository with `rclone`.
//! - [`notify`]: run a notification hook, gated on the job outcome so far.
//! - [`command`]: arbitrary argv (simple jobs use this).

pub mod borg;
pub mod cloud_sync;
pub mod command;
pub mod notify;
pub mod params;

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::errors::{EngineError, Result};
use crate::exec::{CommandSpec, ExecRequest, ExecutorBackend};
use crate::job::{JobId, TaskDefinition, TaskKind, TaskParams};
use crate::output::{OutputSink, StreamKind};

/// Binaries used by the built-in handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub borg: String,
    pub rclone: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            borg: "borg".to_string(),
            rclone: "rclone".to_string(),
        }
    }
}

/// How an exit code counts for the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDisposition {
    Success,
    /// Finished with warnings; the task still succeeds.
    Warning,
    Failure,
}

impl ExitDisposition {
    pub fn is_success(self) -> bool {
        !matches!(self, ExitDisposition::Failure)
    }
}

/// What a handler wants to run.
#[derive(Debug, Clone, PartialEq)]
pub enum Planned {
    Run(CommandSpec),
    /// Nothing to do; the reason is written to the task output and the task
    /// succeeds.
    Skip(String),
}

/// Everything a handler may look at when building its command.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub job_id: JobId,
    pub task_index: usize,
    pub params: TaskParams,
    pub repository: Option<String>,
    pub environment: BTreeMap<String, String>,
    pub working_directory: Option<PathBuf>,
    pub tools: ToolPaths,
    /// Whether an earlier task of the same job failed.
    pub prior_failure: bool,
}

impl Invocation {
    /// Invocation used for validation-time descriptions (no real job yet).
    pub fn preview(def: &TaskDefinition, repository: Option<&str>, tools: &ToolPaths) -> Self {
        Self {
            job_id: Uuid::nil(),
            task_index: 0,
            params: def.params.clone(),
            repository: repository.map(str::to_string),
            environment: BTreeMap::new(),
            working_directory: None,
            tools: tools.clone(),
            prior_failure: false,
        }
    }

    /// `program` with the job's environment and working directory applied.
    pub fn base_command(&self, program: &str) -> CommandSpec {
        CommandSpec::new(program)
            .envs(&self.environment)
            .cwd(self.working_directory.clone())
    }
}

/// Runtime handles for one task execution.
pub struct TaskContext<'a> {
    pub invocation: Invocation,
    pub executor: &'a dyn ExecutorBackend,
    pub sink: OutputSink,
    pub cancel: CancellationToken,
    pub timeout: Option<Duration>,
    pub grace: Duration,
}

impl TaskContext<'_> {
    /// Write an engine note into the task's output.
    pub fn note(&self, text: &str) {
        self.sink.push_line(StreamKind::Stdout, text);
    }
}

/// Result of a task that ran to completion (or was skipped by its handler).
#[derive(Debug, Clone, PartialEq)]
pub struct TaskReport {
    pub exit_code: Option<i32>,
    pub disposition: ExitDisposition,
    pub command: Option<Vec<String>>,
    pub note: Option<String>,
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn kind(&self) -> TaskKind;

    /// Check parameters before a job is created.
    fn validate(&self, params: &TaskParams, repository: Option<&str>) -> Result<()>;

    fn command(&self, invocation: &Invocation) -> Result<Planned>;

    /// A failure of this kind stops the job even under the `continue`
    /// policy. Only an explicit `continue_on_error = true` overrides it.
    fn critical(&self) -> bool {
        false
    }

    fn disposition(&self, exit_code: i32, _params: &TaskParams) -> ExitDisposition {
        if exit_code == 0 {
            ExitDisposition::Success
        } else {
            ExitDisposition::Failure
        }
    }

    /// One-line summary for dry runs.
    fn describe(&self, invocation: &Invocation) -> String {
        match self.command(invocation) {
            Ok(Planned::Run(spec)) => spec.display(),
            Ok(Planned::Skip(reason)) => format!("(skipped: {reason})"),
            Err(err) => format!("(invalid: {err})"),
        }
    }

    async fn execute(&self, ctx: &TaskContext<'_>) -> Result<TaskReport> {
        run_default(self, ctx).await
    }
}

/// Build the handler's command and run it through the executor.
pub async fn run_default<H>(handler: &H, ctx: &TaskContext<'_>) -> Result<TaskReport>
where
    H: TaskHandler + ?Sized,
{
    let spec = match handler.command(&ctx.invocation)? {
        Planned::Skip(reason) => {
            ctx.note(&reason);
            return Ok(TaskReport {
                exit_code: None,
                disposition: ExitDisposition::Success,
                command: None,
                note: Some(reason),
            });
        }
        Planned::Run(spec) => spec,
    };

    let argv = spec.argv();
    let request = ExecRequest {
        command: spec,
        timeout: ctx.timeout,
        grace: ctx.grace,
    };
    let result = ctx
        .executor
        .execute(request, ctx.sink.clone(), ctx.cancel.clone())
        .await?;

    let disposition = handler.disposition(result.exit_code, &ctx.invocation.params);
    let note = (disposition == ExitDisposition::Warning)
        .then(|| format!("completed with warnings (exit code {})", result.exit_code));
    if let Some(note) = &note {
        ctx.note(note);
    }

    Ok(TaskReport {
        exit_code: Some(result.exit_code),
        disposition,
        command: Some(argv),
        note,
    })
}

/// Kind → handler lookup.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
}

impl TaskRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in handler.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(borg::BackupHandler));
        registry.register(Arc::new(borg::PruneHandler));
        registry.register(Arc::new(borg::CheckHandler));
        registry.register(Arc::new(borg::CompactHandler));
        registry.register(Arc::new(cloud_sync::CloudSyncHandler));
        registry.register(Arc::new(notify::NotifyHandler));
        registry.register(Arc::new(command::CommandHandler));
        registry
    }

    /// Add or replace the handler for its kind.
    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    pub fn get(&self, kind: TaskKind) -> Result<Arc<dyn TaskHandler>> {
        self.handlers
            .get(&kind)
            .cloned()
            .ok_or_else(|| EngineError::invalid_task(format!("no handler registered for `{kind}`")))
    }

    pub fn validate(&self, def: &TaskDefinition, repository: Option<&str>) -> Result<()> {
        if def.timeout_seconds == Some(0) {
            return Err(EngineError::invalid_task(format!(
                "{}: timeout_seconds must be > 0",
                def.kind
            )));
        }
        self.get(def.kind)?
            .validate(&def.params, repository)
            .map_err(|err| match err {
                EngineError::InvalidTask(msg) => {
                    EngineError::InvalidTask(format!("{}: {msg}", def.kind))
                }
                other => other,
            })
    }

    pub fn describe(&self, def: &TaskDefinition, repository: Option<&str>, tools: &ToolPaths) -> String {
        match self.get(def.kind) {
            Ok(handler) => handler.describe(&Invocation::preview(def, repository, tools)),
            Err(err) => format!("(invalid: {err})"),
        }
    }
}
