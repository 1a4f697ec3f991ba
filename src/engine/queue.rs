// src/engine/queue.rs

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::job::JobId;
use crate::types::Priority;

/// A job waiting for an admission slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub job_id: JobId,
    pub priority: Priority,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(job_id: JobId, priority: Priority) -> Self {
        Self {
            job_id,
            priority,
            enqueued_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub queued: usize,
    pub running: usize,
    pub concurrency_limit: usize,
    pub open: bool,
}

#[derive(Debug)]
struct Waiting {
    entry: QueueEntry,
    /// FIFO order among everything ever enqueued.
    ticket: u64,
    /// How many later-enqueued jobs were admitted ahead of this one.
    bypassed: u32,
}

#[derive(Debug)]
struct State {
    waiting: Vec<Waiting>,
    running: HashSet<JobId>,
    concurrency_limit: usize,
    open: bool,
    next_ticket: u64,
}

/// Admission control for jobs.
///
/// Semantics:
/// - `enqueue` always succeeds; the job runs once a slot is free and
///   admission is open.
/// - Highest priority is admitted first, FIFO among equal priorities.
/// - An entry that `starvation_threshold` later-enqueued jobs have overtaken
///   is admitted next regardless of priority.
/// - Admission is closed until [`open`](Self::open) is called, so recovery
///   can finish before anything new starts.
///
/// Every mutating call returns the ids it just admitted; the caller is
/// responsible for actually starting them. A single mutex guards all state.
#[derive(Debug)]
pub struct QueueManager {
    starvation_threshold: u32,
    state: Mutex<State>,
}

impl QueueManager {
    /// `concurrency_limit` is clamped to at least 1.
    pub fn new(concurrency_limit: usize, starvation_threshold: u32) -> Self {
        Self {
            starvation_threshold: starvation_threshold.max(1),
            state: Mutex::new(State {
                waiting: Vec::new(),
                running: HashSet::new(),
                concurrency_limit: concurrency_limit.max(1),
                open: false,
                next_ticket: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn enqueue(&self, entry: QueueEntry) -> Vec<JobId> {
        let mut state = self.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        debug!(job_id = %entry.job_id, priority = %entry.priority, ticket, "job enqueued");
        state.waiting.push(Waiting {
            entry,
            ticket,
            bypassed: 0,
        });
        self.admit(&mut state)
    }

    /// Free the slot held by `job_id` and admit whatever now fits.
    pub fn release(&self, job_id: JobId) -> Vec<JobId> {
        let mut state = self.lock();
        if !state.running.remove(&job_id) {
            debug!(job_id = %job_id, "release for a job that held no slot");
        }
        self.admit(&mut state)
    }

    /// Take a waiting job out of the queue. `false` if it was not waiting
    /// (already admitted or unknown).
    pub fn remove(&self, job_id: JobId) -> bool {
        let mut state = self.lock();
        let before = state.waiting.len();
        state.waiting.retain(|w| w.entry.job_id != job_id);
        state.waiting.len() != before
    }

    /// Start admitting. Returns what was admitted immediately.
    pub fn open(&self) -> Vec<JobId> {
        let mut state = self.lock();
        state.open = true;
        self.admit(&mut state)
    }

    /// Stop admitting; waiting entries stay where they are.
    pub fn close(&self) {
        self.lock().open = false;
    }

    pub fn set_concurrency_limit(&self, limit: usize) -> Vec<JobId> {
        let mut state = self.lock();
        state.concurrency_limit = limit.max(1);
        self.admit(&mut state)
    }

    pub fn is_running(&self, job_id: JobId) -> bool {
        self.lock().running.contains(&job_id)
    }

    /// Waiting jobs in the order they would be admitted, with 1-based
    /// positions.
    pub fn positions(&self) -> Vec<(JobId, usize)> {
        let state = self.lock();
        let mut order: Vec<&Waiting> = state.waiting.iter().collect();
        order.sort_by(|a, b| {
            let a_aged = a.bypassed >= self.starvation_threshold;
            let b_aged = b.bypassed >= self.starvation_threshold;
            b_aged
                .cmp(&a_aged)
                .then_with(|| {
                    if a_aged && b_aged {
                        std::cmp::Ordering::Equal
                    } else {
                        b.entry.priority.cmp(&a.entry.priority)
                    }
                })
                .then_with(|| a.ticket.cmp(&b.ticket))
        });
        order
            .into_iter()
            .enumerate()
            .map(|(i, w)| (w.entry.job_id, i + 1))
            .collect()
    }

    pub fn position(&self, job_id: JobId) -> Option<usize> {
        self.positions()
            .into_iter()
            .find(|(id, _)| *id == job_id)
            .map(|(_, pos)| pos)
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.lock();
        QueueStats {
            queued: state.waiting.len(),
            running: state.running.len(),
            concurrency_limit: state.concurrency_limit,
            open: state.open,
        }
    }

    fn admit(&self, state: &mut State) -> Vec<JobId> {
        let mut admitted = Vec::new();
        while state.open && state.running.len() < state.concurrency_limit {
            let Some(idx) = self.select(&state.waiting) else {
                break;
            };
            let chosen = state.waiting.remove(idx);
            for w in state.waiting.iter_mut() {
                if w.ticket < chosen.ticket {
                    w.bypassed += 1;
                }
            }
            debug!(
                job_id = %chosen.entry.job_id,
                priority = %chosen.entry.priority,
                bypassed = chosen.bypassed,
                "job admitted"
            );
            state.running.insert(chosen.entry.job_id);
            admitted.push(chosen.entry.job_id);
        }
        admitted
    }

    /// Index of the entry to admit next.
    fn select(&self, waiting: &[Waiting]) -> Option<usize> {
        let starved = waiting
            .iter()
            .enumerate()
            .filter(|(_, w)| w.bypassed >= self.starvation_threshold)
            .min_by_key(|(_, w)| w.ticket)
            .map(|(i, _)| i);
        if starved.is_some() {
            return starved;
        }

        waiting
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                a.entry
                    .priority
                    .cmp(&b.entry.priority)
                    .then_with(|| b.ticket.cmp(&a.ticket))
            })
            .map(|(i, _)| i)
    }
}
