// src/engine/driver.rs

//! Per-job driver.
//!
//! One driver runs per admitted job. It walks the tasks in order, one at a
//! time, and applies the failure policy:
//!
//! - task succeeded: next task, or the job COMPLETES
//! - task failed, policy `abort`: remaining tasks are skipped, job FAILED
//! - task failed, policy `continue`: next task; at the end the job is
//!   PARTIAL_SUCCESS if anything succeeded, FAILED otherwise
//! - a critical task (backup) that fails aborts under either policy unless
//!   the task itself sets `continue_on_error = true`
//! - cancelled: the active task FAILS with "cancelled by user", remaining
//!   tasks are skipped, job CANCELLED
//!
//! Each task transition finalizes the task's output, publishes an event and
//! persists the job. Skips are announced just before the job's terminal
//! event and share its upsert.
//!
//! Task-level errors never escape. Only an illegal state transition aborts
//! the driver, with an ERROR log; the slot is released either way.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::engine::coordinator::{Coordinator, Inner};
use crate::errors::{EngineError, Result};
use crate::events::JobEvent;
use crate::job::{Job, JobId, JobStatus, TaskStatus};
use crate::output::OutputSink;
use crate::tasks::{ExitDisposition, Invocation, TaskContext};
use crate::types::TaskFailurePolicy;

/// How one task ended, before it is written back to the job.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TaskOutcome {
    Succeeded {
        exit_code: Option<i32>,
        command: Option<Vec<String>>,
        warning: bool,
    },
    Failed {
        exit_code: Option<i32>,
        command: Option<Vec<String>>,
        error: String,
    },
    Cancelled,
}

enum Ending {
    Finished,
    Aborted { index: usize },
    Cancelled,
}

pub(crate) async fn run_job(coord: Coordinator, job_id: JobId, cancel: CancellationToken) {
    let inner = &coord.inner;
    if let Err(err) = drive(inner, job_id, &cancel).await {
        error!(job_id = %job_id, error = %err, "job driver aborted");
        inner.output.finish_job(job_id);
    }

    coord.release_slot(job_id);
    inner.registry.settle(job_id);
    coord.schedule_eviction(job_id);
}

async fn drive(inner: &Inner, job_id: JobId, cancel: &CancellationToken) -> Result<()> {
    let job = inner
        .registry
        .get(job_id)
        .ok_or(EngineError::JobNotFound(job_id))?;
    info!(job_id = %job_id, label = ?job.label, tasks = job.tasks.len(), "job started");
    inner.persist(&job).await;

    let default_continue = inner.config.task_failure_policy == TaskFailurePolicy::Continue;
    let mut succeeded = 0usize;
    let mut failed = 0usize;
    let mut ending = Ending::Finished;

    for index in 0..job.tasks.len() {
        if cancel.is_cancelled() {
            ending = Ending::Cancelled;
            break;
        }

        let (_, snapshot) = inner.registry.update(job_id, |job| {
            job.current_task = index;
            job.task_mut(index)?.transition(TaskStatus::Running)
        })?;
        inner.publish_task(&snapshot, index);
        inner.persist(&snapshot).await;

        let outcome = execute_task(inner, &snapshot, index, cancel, failed > 0).await;

        let (_, snapshot) = inner
            .registry
            .update(job_id, |job| apply_outcome(job, index, &outcome))?;
        inner.publish_task(&snapshot, index);
        inner.persist(&snapshot).await;

        match outcome {
            TaskOutcome::Succeeded { .. } => succeeded += 1,
            TaskOutcome::Failed { .. } => {
                failed += 1;
                let task = &snapshot.tasks[index];
                let critical = inner
                    .handlers
                    .get(task.kind)
                    .is_ok_and(|handler| handler.critical());
                if Job::aborts_on_failure(task, default_continue, critical) {
                    ending = Ending::Aborted { index };
                    break;
                }
            }
            TaskOutcome::Cancelled => {
                ending = Ending::Cancelled;
                break;
            }
        }
    }

    let (status, job_error, skip_reason) = match ending {
        Ending::Cancelled => (
            JobStatus::Cancelled,
            Some(EngineError::Cancelled.to_string()),
            "job cancelled".to_string(),
        ),
        Ending::Aborted { index } => {
            let current = inner.registry.get(job_id);
            let task = current.as_ref().and_then(|j| j.task(index));
            let detail = task
                .and_then(|t| t.error.clone())
                .unwrap_or_else(|| "failed".to_string());
            let kind = task.map(|t| t.kind.to_string()).unwrap_or_default();
            (
                JobStatus::Failed,
                Some(format!("task {index} ({kind}) failed: {detail}")),
                format!("skipped after task {index} failed"),
            )
        }
        Ending::Finished if failed == 0 => (JobStatus::Completed, None, String::new()),
        Ending::Finished if succeeded > 0 => (
            JobStatus::PartialSuccess,
            Some(format!("{failed} of {} tasks failed", succeeded + failed)),
            String::new(),
        ),
        Ending::Finished => (
            JobStatus::Failed,
            Some(format!("all {failed} tasks failed")),
            String::new(),
        ),
    };

    for line in inner.output.finish_job(job_id) {
        inner.events.publish(JobEvent::task_output(line));
    }

    let (skipped, snapshot) = inner.registry.update(job_id, |job| {
        job.transition(status)?;
        job.error = job_error;
        Ok(job.skip_pending_from(0, &skip_reason))
    })?;
    for index in skipped {
        inner.publish_task(&snapshot, index);
    }

    match status {
        JobStatus::Completed => info!(job_id = %job_id, "job completed"),
        JobStatus::Cancelled => info!(job_id = %job_id, "job cancelled"),
        _ => warn!(job_id = %job_id, %status, error = ?snapshot.error, "job finished with failures"),
    }
    inner.events.publish(JobEvent::job_status(&snapshot));
    inner.persist(&snapshot).await;
    Ok(())
}

fn apply_outcome(job: &mut Job, index: usize, outcome: &TaskOutcome) -> Result<()> {
    let task = job.task_mut(index)?;
    match outcome {
        TaskOutcome::Succeeded {
            exit_code,
            command,
            warning,
        } => {
            task.exit_code = *exit_code;
            task.command = command.clone();
            if *warning {
                task.error = exit_code.map(|code| format!("completed with warnings (exit code {code})"));
            }
            task.transition(TaskStatus::Succeeded)
        }
        TaskOutcome::Failed {
            exit_code,
            command,
            error,
        } => {
            task.exit_code = *exit_code;
            task.command = command.clone();
            task.error = Some(error.clone());
            task.transition(TaskStatus::Failed)
        }
        TaskOutcome::Cancelled => {
            task.error = Some(EngineError::Cancelled.to_string());
            task.transition(TaskStatus::Failed)
        }
    }
}

async fn execute_task(
    inner: &Inner,
    job: &Job,
    index: usize,
    cancel: &CancellationToken,
    prior_failure: bool,
) -> TaskOutcome {
    let Some(task) = job.task(index) else {
        return TaskOutcome::Failed {
            exit_code: None,
            command: None,
            error: format!("task {index} does not exist"),
        };
    };
    let handler = match inner.handlers.get(task.kind) {
        Ok(handler) => handler,
        Err(err) => {
            return TaskOutcome::Failed {
                exit_code: None,
                command: None,
                error: err.to_string(),
            };
        }
    };

    let sink = OutputSink::for_task(
        job.id,
        index,
        inner.output.clone(),
        Some(inner.events.clone()),
    );
    let ctx = TaskContext {
        invocation: Invocation {
            job_id: job.id,
            task_index: index,
            params: task.params.clone(),
            repository: job.repository.clone(),
            environment: job.environment.clone(),
            working_directory: job.working_directory.clone(),
            tools: inner.config.tools(),
            prior_failure,
        },
        executor: inner.executor.as_ref(),
        sink: sink.clone(),
        cancel: cancel.clone(),
        timeout: task
            .timeout_seconds
            .map(Duration::from_secs)
            .or(inner.config.task_timeout()),
        grace: inner.config.cancel_grace(),
    };

    info!(job_id = %job.id, task = index, kind = %task.kind, name = %task.name, "task started");
    let result = handler.execute(&ctx).await;
    sink.finish();

    match result {
        Ok(report) if report.disposition.is_success() => TaskOutcome::Succeeded {
            exit_code: report.exit_code,
            command: report.command,
            warning: report.disposition == ExitDisposition::Warning,
        },
        Ok(report) => {
            let code = report.exit_code.unwrap_or(-1);
            TaskOutcome::Failed {
                exit_code: report.exit_code,
                command: report.command,
                error: EngineError::Execution { code }.to_string(),
            }
        }
        Err(EngineError::Cancelled) => TaskOutcome::Cancelled,
        Err(err) => {
            warn!(job_id = %job.id, task = index, error = %err, "task could not complete");
            TaskOutcome::Failed {
                exit_code: None,
                command: None,
                error: err.to_string(),
            }
        }
    }
}
