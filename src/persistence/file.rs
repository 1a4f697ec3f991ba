// src/persistence/file.rs

//! File-backed job store.
//!
//! Layout: `<state_dir>/jobs/<job id>.json`, one pretty-printed
//! [`JobRecord`] per file. Writes go to a temporary sibling first and are
//! renamed into place, so a crash mid-write leaves the previous version.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

use crate::errors::{EngineError, Result};
use crate::job::{JobId, JobRecord};
use crate::persistence::{PersistenceGateway, is_incomplete};

#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Store rooted at `state_dir`. The directory is created lazily.
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: state_dir.as_ref().join("jobs"),
        }
    }

    pub fn jobs_dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, job_id: JobId) -> PathBuf {
        self.dir.join(format!("{job_id}.json"))
    }

    pub async fn load(&self, job_id: JobId) -> Result<Option<JobRecord>> {
        let path = self.path_for(job_id);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(EngineError::persistence(format!(
                "reading {}: {err}",
                path.display()
            ))),
        }
    }

    /// Every readable record. Unreadable or malformed files are skipped with
    /// a warning.
    pub async fn load_all(&self) -> Result<Vec<JobRecord>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(EngineError::persistence(format!(
                    "listing {}: {err}",
                    self.dir.display()
                )));
            }
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(EngineError::persistence)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = match fs::read(&path).await {
                Ok(bytes) => serde_json::from_slice::<JobRecord>(&bytes).map_err(|e| e.to_string()),
                Err(err) => Err(err.to_string()),
            };
            match parsed {
                Ok(record) => records.push(record),
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable job record"),
            }
        }
        records.sort_by_key(|r| r.job.created_at);
        Ok(records)
    }
}

#[async_trait]
impl PersistenceGateway for JsonFileStore {
    async fn save_job_result(&self, record: &JobRecord) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| EngineError::persistence(format!("creating {}: {e}", self.dir.display())))?;

        let path = self.path_for(record.job.id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(record)?;

        fs::write(&tmp, &bytes)
            .await
            .map_err(|e| EngineError::persistence(format!("writing {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| EngineError::persistence(format!("renaming into {}: {e}", path.display())))?;

        debug!(job_id = %record.job.id, status = %record.job.status, "job record saved");
        Ok(())
    }

    async fn load_incomplete_jobs(&self) -> Result<Vec<JobRecord>> {
        Ok(self
            .load_all()
            .await?
            .into_iter()
            .filter(is_incomplete)
            .collect())
    }
}
