// src/output/sink.rs

//! Where an executor writes the bytes a subprocess produces.

use std::sync::Arc;

use tracing::info;

use crate::events::{EventBroadcaster, JobEvent};
use crate::job::JobId;
use crate::output::line::{OutputLine, StreamKind};
use crate::output::manager::OutputManager;

#[derive(Clone)]
enum Target {
    /// Buffer into the job's output and publish each line as an event.
    Job {
        job_id: JobId,
        task_index: usize,
        output: Arc<OutputManager>,
        events: Option<EventBroadcaster>,
    },
    /// Not tied to a job (recovery housekeeping); lines go to the log.
    Log { label: String },
}

/// Cheap to clone; every clone writes to the same place.
#[derive(Clone)]
pub struct OutputSink {
    target: Target,
}

impl OutputSink {
    pub fn for_task(
        job_id: JobId,
        task_index: usize,
        output: Arc<OutputManager>,
        events: Option<EventBroadcaster>,
    ) -> Self {
        Self {
            target: Target::Job {
                job_id,
                task_index,
                output,
                events,
            },
        }
    }

    pub fn detached(label: impl Into<String>) -> Self {
        Self {
            target: Target::Log {
                label: label.into(),
            },
        }
    }

    pub fn push_chunk(&self, stream: StreamKind, chunk: &[u8]) {
        match &self.target {
            Target::Job {
                job_id,
                task_index,
                output,
                events,
            } => {
                let lines = output.push_chunk(*job_id, *task_index, stream, chunk);
                publish(events.as_ref(), lines);
            }
            Target::Log { label } => {
                let text = String::from_utf8_lossy(chunk);
                for line in text.lines().filter(|l| !l.trim().is_empty()) {
                    info!(target: "borgjobs::output", source = %label, %stream, "{line}");
                }
            }
        }
    }

    pub fn push_line(&self, stream: StreamKind, text: &str) {
        match &self.target {
            Target::Job {
                job_id,
                task_index,
                output,
                events,
            } => {
                let line = output.push_line(*job_id, *task_index, stream, text);
                publish(events.as_ref(), line);
            }
            Target::Log { label } => {
                info!(target: "borgjobs::output", source = %label, %stream, "{text}");
            }
        }
    }

    /// Flush any partial line left by the task.
    pub fn finish(&self) {
        if let Target::Job {
            job_id,
            task_index,
            output,
            events,
        } = &self.target
        {
            let lines = output.finalize_task(*job_id, *task_index);
            publish(events.as_ref(), lines);
        }
    }
}

fn publish(events: Option<&EventBroadcaster>, lines: impl IntoIterator<Item = OutputLine>) {
    if let Some(events) = events {
        for line in lines {
            events.publish(JobEvent::task_output(line));
        }
    }
}
