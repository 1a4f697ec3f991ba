use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use borgjobs::errors::{EngineError, Result};
use borgjobs::job::JobRecord;
use borgjobs::persistence::PersistenceGateway;

/// A gateway whose every call fails, counting the attempts.
#[derive(Default)]
pub struct FailingStore {
    saves: AtomicUsize,
    loads: AtomicUsize,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_attempts(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn load_attempts(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PersistenceGateway for FailingStore {
    async fn save_job_result(&self, _record: &JobRecord) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        Err(EngineError::Persistence("disk on fire".to_string()))
    }

    async fn load_incomplete_jobs(&self) -> Result<Vec<JobRecord>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Err(EngineError::Persistence("disk on fire".to_string()))
    }
}
