// src/output/tail.rs

//! Live, finite tail over one job's output ring.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::Stream;
use tokio::sync::watch;

use crate::job::JobId;
use crate::output::line::OutputLine;
use crate::output::manager::{OutputManager, ReadOutcome};

#[derive(Debug, Clone, PartialEq)]
pub enum TailItem {
    Line(OutputLine),
    /// The reader fell behind the ring and this many lines were evicted
    /// before it could see them.
    Missed(u64),
}

/// Cursor-based reader. Yields every line from its start position onwards
/// and ends once the job is finished and fully delivered (or cleared).
pub struct OutputTail {
    manager: Arc<OutputManager>,
    job_id: JobId,
    cursor: u64,
    pending: VecDeque<OutputLine>,
    changed: watch::Receiver<u64>,
    done: bool,
}

impl OutputTail {
    pub(crate) fn new(
        manager: Arc<OutputManager>,
        job_id: JobId,
        cursor: u64,
        changed: watch::Receiver<u64>,
    ) -> Self {
        Self {
            manager,
            job_id,
            cursor,
            pending: VecDeque::new(),
            changed,
            done: false,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Sequence number of the next line this tail expects.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub async fn next(&mut self) -> Option<TailItem> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                return Some(TailItem::Line(line));
            }
            if self.done {
                return None;
            }

            // Mark the current value seen before reading, so a push that
            // lands after the read still wakes `changed()` below.
            self.changed.borrow_and_update();

            match self.manager.read_from(self.job_id, self.cursor) {
                ReadOutcome::Gone | ReadOutcome::Finished => {
                    self.done = true;
                    return None;
                }
                ReadOutcome::Missed { count, resume_at } => {
                    self.cursor = resume_at;
                    return Some(TailItem::Missed(count));
                }
                ReadOutcome::Lines(lines) => {
                    if let Some(last) = lines.last() {
                        self.cursor = last.sequence + 1;
                    }
                    self.pending.extend(lines);
                }
                ReadOutcome::Idle => {
                    if self.changed.changed().await.is_err() {
                        // Sender dropped: the job was cleared.
                        self.done = true;
                    }
                }
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = TailItem> + Send {
        futures::stream::unfold(self, |mut tail| async move {
            tail.next().await.map(|item| (item, tail))
        })
    }
}
