// src/persistence/mod.rs

//! Narrow storage interface used by the coordinator and recovery.
//!
//! Two implementations, selected by `config.storage`:
//!
//! - [`MemoryStore`]: records live only as long as the process.
//! - [`JsonFileStore`]: one JSON file per job under `<state_dir>/jobs/`.

pub mod file;
pub mod memory;

use async_trait::async_trait;

use crate::errors::Result;
use crate::job::JobRecord;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Insert or replace the record for `record.job.id`.
    async fn save_job_result(&self, record: &JobRecord) -> Result<()>;

    /// Every stored record whose job is `RUNNING` or `QUEUED`.
    async fn load_incomplete_jobs(&self) -> Result<Vec<JobRecord>>;
}

/// Whether recovery has to look at a record.
pub fn is_incomplete(record: &JobRecord) -> bool {
    use crate::job::JobStatus;
    matches!(record.job.status, JobStatus::Running | JobStatus::Queued)
}
