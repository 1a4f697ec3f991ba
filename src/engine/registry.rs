// src/engine/registry.rs

//! In-memory job registry.
//!
//! Written only by coordinator code (submission, admission, drivers,
//! cancellation, eviction). Everyone else gets cloned snapshots.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::errors::{EngineError, Result};
use crate::job::{Job, JobId};

struct JobEntry {
    job: Job,
    cancel: CancellationToken,
    /// Holds the final snapshot once the job is terminal, persisted and its
    /// slot released.
    settled: watch::Sender<Option<Job>>,
}

#[derive(Default)]
pub(crate) struct JobRegistry {
    jobs: RwLock<HashMap<JobId, JobEntry>>,
}

impl JobRegistry {
    fn read(&self) -> RwLockReadGuard<'_, HashMap<JobId, JobEntry>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<JobId, JobEntry>> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, job: Job) {
        let (settled, _) = watch::channel(None);
        self.write().insert(
            job.id,
            JobEntry {
                job,
                cancel: CancellationToken::new(),
                settled,
            },
        );
    }

    pub fn get(&self, id: JobId) -> Option<Job> {
        self.read().get(&id).map(|e| e.job.clone())
    }

    pub fn all(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.read().values().map(|e| e.job.clone()).collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    pub fn ids(&self) -> Vec<JobId> {
        self.read().keys().copied().collect()
    }

    pub fn cancel_token(&self, id: JobId) -> Option<CancellationToken> {
        self.read().get(&id).map(|e| e.cancel.clone())
    }

    pub fn watch_settled(&self, id: JobId) -> Option<watch::Receiver<Option<Job>>> {
        self.read().get(&id).map(|e| e.settled.subscribe())
    }

    pub fn settle(&self, id: JobId) {
        if let Some(entry) = self.read().get(&id) {
            entry.settled.send_replace(Some(entry.job.clone()));
        }
    }

    /// Mutate a job under the write lock and return the closure's value plus
    /// a snapshot taken after the mutation.
    pub fn update<R>(&self, id: JobId, f: impl FnOnce(&mut Job) -> Result<R>) -> Result<(R, Job)> {
        let mut jobs = self.write();
        let entry = jobs.get_mut(&id).ok_or(EngineError::JobNotFound(id))?;
        let out = f(&mut entry.job)?;
        Ok((out, entry.job.clone()))
    }

    pub fn remove(&self, id: JobId) -> Option<Job> {
        self.write().remove(&id).map(|e| e.job)
    }
}
