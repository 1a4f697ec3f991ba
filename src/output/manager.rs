// src/output/manager.rs

//! Per-job output buffering and sequencing.
//!
//! Raw chunks come in per (task, stream). Complete lines are decoded with
//! lossy UTF-8, stripped of their line ending, given the job's next sequence
//! number and appended to a bounded ring. Partial lines wait in a per
//! (task, stream) buffer until a newline arrives, the task is finalized, or
//! the buffer reaches [`MAX_PARTIAL_LINE`].
//!
//! Every append bumps a `watch` channel carrying the last sequence number so
//! tails can wait without polling. The producer never waits on readers.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::job::JobId;
use crate::output::line::{OutputLine, StreamKind};
use crate::output::tail::OutputTail;

/// Partial lines longer than this are flushed as a line of their own.
pub const MAX_PARTIAL_LINE: usize = 64 * 1024;

/// Buffered output of one job at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSnapshot {
    pub lines: Vec<OutputLine>,
    /// Lines evicted from the ring so far.
    pub dropped: u64,
    pub finished: bool,
    /// Sequence number the next line will get.
    pub next_sequence: u64,
}

pub(crate) enum ReadOutcome {
    /// The job was cleared (or never registered).
    Gone,
    /// The cursor points before the oldest retained line.
    Missed { count: u64, resume_at: u64 },
    Lines(Vec<OutputLine>),
    /// Nothing new and no more will come.
    Finished,
    /// Nothing new yet.
    Idle,
}

struct JobOutput {
    lines: VecDeque<OutputLine>,
    next_sequence: u64,
    dropped: u64,
    drop_warned: bool,
    partial: HashMap<(usize, StreamKind), Vec<u8>>,
    finished: bool,
    notify: watch::Sender<u64>,
}

impl JobOutput {
    fn new() -> Self {
        let (notify, _) = watch::channel(0);
        Self {
            lines: VecDeque::new(),
            next_sequence: 1,
            dropped: 0,
            drop_warned: false,
            partial: HashMap::new(),
            finished: false,
            notify,
        }
    }

    fn first_retained(&self) -> u64 {
        self.lines
            .front()
            .map(|l| l.sequence)
            .unwrap_or(self.next_sequence)
    }

    fn emit(
        &mut self,
        job_id: JobId,
        task_index: usize,
        stream: StreamKind,
        raw: &[u8],
        retention: usize,
    ) -> OutputLine {
        let mut bytes = raw;
        if let Some(rest) = bytes.strip_suffix(b"\n") {
            bytes = rest;
        }
        if let Some(rest) = bytes.strip_suffix(b"\r") {
            bytes = rest;
        }

        let line = OutputLine {
            job_id,
            task_index,
            sequence: self.next_sequence,
            timestamp: Utc::now(),
            text: String::from_utf8_lossy(bytes).into_owned(),
            stream,
        };
        self.next_sequence += 1;

        self.lines.push_back(line.clone());
        while self.lines.len() > retention {
            self.lines.pop_front();
            self.dropped += 1;
            if !self.drop_warned {
                self.drop_warned = true;
                warn!(
                    job_id = %job_id,
                    retention,
                    "output exceeds retention; oldest lines are being dropped"
                );
            }
        }

        line
    }

    fn flush_partial(
        &mut self,
        job_id: JobId,
        key: (usize, StreamKind),
        retention: usize,
        out: &mut Vec<OutputLine>,
    ) {
        if let Some(buf) = self.partial.remove(&key) {
            if !buf.is_empty() {
                out.push(self.emit(job_id, key.0, key.1, &buf, retention));
            }
        }
    }

    fn publish(&self) {
        self.notify.send_replace(self.next_sequence - 1);
    }
}

pub struct OutputManager {
    retention: usize,
    jobs: Mutex<HashMap<JobId, JobOutput>>,
}

impl OutputManager {
    pub fn new(retention: usize) -> Self {
        Self {
            retention: retention.max(1),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, JobOutput>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start buffering for `job_id`. Registering twice is a no-op.
    pub fn register(&self, job_id: JobId) {
        self.lock().entry(job_id).or_insert_with(JobOutput::new);
    }

    pub fn is_registered(&self, job_id: JobId) -> bool {
        self.lock().contains_key(&job_id)
    }

    /// Feed raw bytes from one stream of one task. Returns the lines that
    /// became complete.
    pub fn push_chunk(
        &self,
        job_id: JobId,
        task_index: usize,
        stream: StreamKind,
        chunk: &[u8],
    ) -> Vec<OutputLine> {
        let retention = self.retention;
        let mut jobs = self.lock();
        let Some(out) = jobs.get_mut(&job_id) else {
            debug!(job_id = %job_id, "dropping output chunk for unknown job");
            return Vec::new();
        };

        let key = (task_index, stream);
        let mut buf = out.partial.remove(&key).unwrap_or_default();
        buf.extend_from_slice(chunk);

        let mut emitted = Vec::new();
        let mut start = 0;
        while let Some(pos) = buf[start..].iter().position(|b| *b == b'\n') {
            let end = start + pos + 1;
            emitted.push(out.emit(job_id, task_index, stream, &buf[start..end], retention));
            start = end;
        }

        let mut rest = buf.split_off(start);
        while rest.len() >= MAX_PARTIAL_LINE {
            let tail = rest.split_off(MAX_PARTIAL_LINE);
            emitted.push(out.emit(job_id, task_index, stream, &rest, retention));
            rest = tail;
        }
        if !rest.is_empty() {
            out.partial.insert(key, rest);
        }

        if !emitted.is_empty() {
            out.publish();
        }
        emitted
    }

    /// Append one already-decoded line (used for engine notes such as
    /// "skipped: no remote configured").
    pub fn push_line(
        &self,
        job_id: JobId,
        task_index: usize,
        stream: StreamKind,
        text: &str,
    ) -> Option<OutputLine> {
        let retention = self.retention;
        let mut jobs = self.lock();
        let out = jobs.get_mut(&job_id)?;
        let line = out.emit(job_id, task_index, stream, text.as_bytes(), retention);
        out.publish();
        Some(line)
    }

    /// Flush the partial lines of one task.
    pub fn finalize_task(&self, job_id: JobId, task_index: usize) -> Vec<OutputLine> {
        let retention = self.retention;
        let mut jobs = self.lock();
        let Some(out) = jobs.get_mut(&job_id) else {
            return Vec::new();
        };

        let mut emitted = Vec::new();
        for stream in [StreamKind::Stdout, StreamKind::Stderr] {
            out.flush_partial(job_id, (task_index, stream), retention, &mut emitted);
        }
        if !emitted.is_empty() {
            out.publish();
        }
        emitted
    }

    /// Flush everything and mark the job finished. Tails end once they have
    /// delivered the last line.
    pub fn finish_job(&self, job_id: JobId) -> Vec<OutputLine> {
        let retention = self.retention;
        let mut jobs = self.lock();
        let Some(out) = jobs.get_mut(&job_id) else {
            return Vec::new();
        };

        let mut keys: Vec<_> = out.partial.keys().copied().collect();
        keys.sort_by_key(|(task, stream)| (*task, *stream == StreamKind::Stderr));

        let mut emitted = Vec::new();
        for key in keys {
            out.flush_partial(job_id, key, retention, &mut emitted);
        }
        out.finished = true;
        out.publish();
        emitted
    }

    /// Forget the job entirely. Open tails end.
    pub fn clear(&self, job_id: JobId) {
        self.lock().remove(&job_id);
    }

    pub fn snapshot(&self, job_id: JobId) -> Option<OutputSnapshot> {
        let jobs = self.lock();
        jobs.get(&job_id).map(|out| OutputSnapshot {
            lines: out.lines.iter().cloned().collect(),
            dropped: out.dropped,
            finished: out.finished,
            next_sequence: out.next_sequence,
        })
    }

    /// The last `n` buffered lines.
    pub fn tail(&self, job_id: JobId, n: usize) -> Vec<OutputLine> {
        let jobs = self.lock();
        match jobs.get(&job_id) {
            Some(out) => {
                let skip = out.lines.len().saturating_sub(n);
                out.lines.iter().skip(skip).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    /// Buffered lines produced by one task.
    pub fn task_lines(&self, job_id: JobId, task_index: usize) -> Vec<OutputLine> {
        let jobs = self.lock();
        match jobs.get(&job_id) {
            Some(out) => out
                .lines
                .iter()
                .filter(|l| l.task_index == task_index)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// A live tail starting after the current last line.
    pub fn subscribe(self: &Arc<Self>, job_id: JobId) -> Option<OutputTail> {
        let jobs = self.lock();
        let out = jobs.get(&job_id)?;
        Some(OutputTail::new(
            Arc::clone(self),
            job_id,
            out.next_sequence,
            out.notify.subscribe(),
        ))
    }

    /// Snapshot plus a tail positioned exactly after it, taken atomically so
    /// no line is missed or repeated between the two.
    pub fn subscribe_with_snapshot(
        self: &Arc<Self>,
        job_id: JobId,
    ) -> Option<(OutputSnapshot, OutputTail)> {
        let jobs = self.lock();
        let out = jobs.get(&job_id)?;
        let snapshot = OutputSnapshot {
            lines: out.lines.iter().cloned().collect(),
            dropped: out.dropped,
            finished: out.finished,
            next_sequence: out.next_sequence,
        };
        let tail = OutputTail::new(
            Arc::clone(self),
            job_id,
            out.next_sequence,
            out.notify.subscribe(),
        );
        Some((snapshot, tail))
    }

    /// Everything at or after `cursor`, or why there is nothing.
    pub(crate) fn read_from(&self, job_id: JobId, cursor: u64) -> ReadOutcome {
        let jobs = self.lock();
        let Some(out) = jobs.get(&job_id) else {
            return ReadOutcome::Gone;
        };

        let first = out.first_retained();
        if cursor < first {
            return ReadOutcome::Missed {
                count: first - cursor,
                resume_at: first,
            };
        }

        let lines: Vec<OutputLine> = out
            .lines
            .iter()
            .filter(|l| l.sequence >= cursor)
            .cloned()
            .collect();

        if !lines.is_empty() {
            ReadOutcome::Lines(lines)
        } else if out.finished {
            ReadOutcome::Finished
        } else {
            ReadOutcome::Idle
        }
    }
}
