// src/persistence/memory.rs

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::errors::Result;
use crate::job::{JobId, JobRecord};
use crate::persistence::{PersistenceGateway, is_incomplete};

/// In-memory store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<JobId, JobRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populated store, e.g. to simulate what a crashed run left behind.
    pub fn with_records(records: impl IntoIterator<Item = JobRecord>) -> Self {
        let store = Self::new();
        {
            let mut map = store.lock();
            for record in records {
                map.insert(record.job.id, record);
            }
        }
        store
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, JobRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, job_id: JobId) -> Option<JobRecord> {
        self.lock().get(&job_id).cloned()
    }

    pub fn records(&self) -> Vec<JobRecord> {
        let mut all: Vec<_> = self.lock().values().cloned().collect();
        all.sort_by_key(|r| r.job.created_at);
        all
    }
}

#[async_trait]
impl PersistenceGateway for MemoryStore {
    async fn save_job_result(&self, record: &JobRecord) -> Result<()> {
        self.lock().insert(record.job.id, record.clone());
        Ok(())
    }

    async fn load_incomplete_jobs(&self) -> Result<Vec<JobRecord>> {
        let mut incomplete: Vec<_> = self
            .lock()
            .values()
            .filter(|r| is_incomplete(r))
            .cloned()
            .collect();
        incomplete.sort_by_key(|r| r.job.created_at);
        Ok(incomplete)
    }
}
