// src/job/model.rs

//! In-memory job and task records.
//!
//! A `Job` is both the registry entry the coordinator mutates and the
//! snapshot readers receive (readers always get a clone). Environment and
//! working directory are runtime-only and never serialized, since they may
//! carry secrets such as `BORG_PASSPHRASE`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{EngineError, Result};
use crate::job::request::{JobRequest, TaskDefinition};
use crate::job::status::{JobStatus, TaskStatus};
use crate::output::OutputLine;
use crate::types::Priority;

pub type JobId = Uuid;

/// Free-form, kind-specific task parameters.
pub type TaskParams = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// A single command; holds exactly one `command` task.
    Simple,
    /// An ordered pipeline of tasks.
    Composite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Backup,
    Prune,
    Check,
    Compact,
    CloudSync,
    Notify,
    Command,
}

impl TaskKind {
    pub const ALL: [TaskKind; 7] = [
        TaskKind::Backup,
        TaskKind::Prune,
        TaskKind::Check,
        TaskKind::Compact,
        TaskKind::CloudSync,
        TaskKind::Notify,
        TaskKind::Command,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Backup => "backup",
            TaskKind::Prune => "prune",
            TaskKind::Check => "check",
            TaskKind::Compact => "compact",
            TaskKind::CloudSync => "cloud_sync",
            TaskKind::Notify => "notify",
            TaskKind::Command => "command",
        }
    }

    /// Kinds that write to the repository and may leave a stale borg lock
    /// behind when interrupted.
    pub fn mutates_repository(self) -> bool {
        matches!(self, TaskKind::Backup | TaskKind::Prune | TaskKind::Compact)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a job, wrapping a single subprocess invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub index: usize,
    pub kind: TaskKind,
    pub name: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub params: TaskParams,
    /// Overrides the global failure policy for this task when set.
    #[serde(default)]
    pub continue_on_error: Option<bool>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    /// Argument vector actually executed (program first), once known.
    #[serde(default)]
    pub command: Option<Vec<String>>,
    pub exit_code: Option<i32>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Task {
    pub fn from_definition(index: usize, def: &TaskDefinition) -> Self {
        Self {
            index,
            kind: def.kind,
            name: def
                .name
                .clone()
                .unwrap_or_else(|| def.kind.as_str().to_string()),
            status: TaskStatus::Pending,
            params: def.params.clone(),
            continue_on_error: def.continue_on_error,
            timeout_seconds: def.timeout_seconds,
            command: None,
            exit_code: None,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn transition(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                subject: format!("task {} ({})", self.index, self.kind),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }

        let now = Utc::now();
        if next == TaskStatus::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() && self.finished_at.is_none() {
            self.finished_at = Some(now);
        }
        self.status = next;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    /// Opaque reference to the target repository (path or URL for borg).
    #[serde(default)]
    pub repository: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub tasks: Vec<Task>,
    pub current_task: usize,
    pub error: Option<String>,
    #[serde(skip)]
    pub environment: BTreeMap<String, String>,
    #[serde(skip)]
    pub working_directory: Option<PathBuf>,
}

impl Job {
    /// Create a `PENDING` job from a validated request.
    pub fn from_request(request: &JobRequest) -> Self {
        let tasks = request
            .tasks
            .iter()
            .enumerate()
            .map(|(i, def)| Task::from_definition(i, def))
            .collect();

        Self {
            id: Uuid::new_v4(),
            kind: request.kind,
            status: JobStatus::Pending,
            label: request.label.clone(),
            priority: request.priority,
            repository: request.repository.clone(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            tasks,
            current_task: 0,
            error: None,
            environment: request.environment.clone(),
            working_directory: request.working_directory.clone(),
        }
    }

    /// Apply a status transition, stamping `started_at` on admission and
    /// `finished_at` exactly once on the first terminal status.
    pub fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                subject: format!("job {}", self.id),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }

        let now = Utc::now();
        if next == JobStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if next.is_terminal() && self.finished_at.is_none() {
            self.finished_at = Some(now);
        }
        self.status = next;
        Ok(())
    }

    pub fn task(&self, index: usize) -> Option<&Task> {
        self.tasks.get(index)
    }

    pub fn task_mut(&mut self, index: usize) -> Result<&mut Task> {
        let id = self.id;
        self.tasks.get_mut(index).ok_or_else(|| EngineError::InvalidTransition {
            subject: format!("job {id}"),
            from: format!("task index {index}"),
            to: "out of range".to_string(),
        })
    }

    /// Mark every still-pending task from `from` onwards as skipped.
    /// Returns the indices that changed.
    pub fn skip_pending_from(&mut self, from: usize, reason: &str) -> Vec<usize> {
        let mut skipped = Vec::new();
        for task in self.tasks.iter_mut().skip(from) {
            if task.status == TaskStatus::Pending && task.transition(TaskStatus::Skipped).is_ok() {
                task.error = Some(reason.to_string());
                skipped.push(task.index);
            }
        }
        skipped
    }

    /// Whether the failure of `task` should stop the job. The task's own
    /// `continue_on_error` wins; otherwise a critical task always stops it.
    pub fn aborts_on_failure(task: &Task, default_continue: bool, critical: bool) -> bool {
        match task.continue_on_error {
            Some(keep_going) => !keep_going,
            None => critical || !default_continue,
        }
    }
}

/// First eight hex digits of a job id.
pub fn short_id(id: JobId) -> String {
    let mut s = id.simple().to_string();
    s.truncate(8);
    s
}

/// What the persistence gateway stores for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job: Job,
    /// Last few output lines at the time of the save.
    #[serde(default)]
    pub output_tail: Vec<OutputLine>,
}

impl JobRecord {
    pub fn new(job: Job, output_tail: Vec<OutputLine>) -> Self {
        Self { job, output_tail }
    }

    pub fn status(&self) -> JobStatus {
        self.job.status
    }
}
