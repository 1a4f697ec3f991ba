// src/events/event.rs

//! Event envelope shared by every observer.
//!
//! Serialized shape:
//!
//! ```json
//! {"job_id": "...", "timestamp": "...", "event_type": "job_status", "payload": {...}}
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::job::{Job, JobId, JobStatus, Task, TaskKind, TaskStatus};
use crate::output::OutputLine;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobEvent {
    pub job_id: Option<JobId>,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub body: EventBody,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event_type", content = "payload", rename_all = "snake_case")]
pub enum EventBody {
    JobStatus(StatusPayload),
    TaskOutput(OutputLine),
    QueueUpdate(QueuePayload),
    Heartbeat,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusPayload {
    pub status: JobStatus,
    /// Set when the event is about one task of the job.
    pub task: Option<TaskChange>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskChange {
    pub index: usize,
    pub kind: TaskKind,
    pub name: String,
    pub status: TaskStatus,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}

impl From<&Task> for TaskChange {
    fn from(task: &Task) -> Self {
        Self {
            index: task.index,
            kind: task.kind,
            name: task.name.clone(),
            status: task.status,
            exit_code: task.exit_code,
            error: task.error.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuePayload {
    /// 1-based admission position, `None` once admitted or removed.
    pub position: Option<usize>,
    pub queued: usize,
    pub running: usize,
}

impl JobEvent {
    fn now(job_id: Option<JobId>, body: EventBody) -> Self {
        Self {
            job_id,
            timestamp: Utc::now(),
            body,
        }
    }

    /// Job-level status change.
    pub fn job_status(job: &Job) -> Self {
        Self::now(
            Some(job.id),
            EventBody::JobStatus(StatusPayload {
                status: job.status,
                task: None,
                error: job.error.clone(),
            }),
        )
    }

    /// Status change of one task, carrying the job's status alongside.
    pub fn task_status(job: &Job, task: &Task) -> Self {
        Self::now(
            Some(job.id),
            EventBody::JobStatus(StatusPayload {
                status: job.status,
                task: Some(TaskChange::from(task)),
                error: None,
            }),
        )
    }

    pub fn task_output(line: OutputLine) -> Self {
        Self::now(Some(line.job_id), EventBody::TaskOutput(line))
    }

    pub fn queue_update(job_id: JobId, position: Option<usize>, queued: usize, running: usize) -> Self {
        Self::now(
            Some(job_id),
            EventBody::QueueUpdate(QueuePayload {
                position,
                queued,
                running,
            }),
        )
    }

    pub fn heartbeat() -> Self {
        Self::now(None, EventBody::Heartbeat)
    }

    pub fn event_type(&self) -> &'static str {
        match self.body {
            EventBody::JobStatus(_) => "job_status",
            EventBody::TaskOutput(_) => "task_output",
            EventBody::QueueUpdate(_) => "queue_update",
            EventBody::Heartbeat => "heartbeat",
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        matches!(self.body, EventBody::Heartbeat)
    }

    /// `Some(status)` for job-level status events (no task attached).
    pub fn job_level_status(&self) -> Option<JobStatus> {
        match &self.body {
            EventBody::JobStatus(p) if p.task.is_none() => Some(p.status),
            _ => None,
        }
    }
}
