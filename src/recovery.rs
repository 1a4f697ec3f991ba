// src/recovery.rs

//! Startup reconciliation of jobs an unclean shutdown left non-terminal.
//!
//! Runs once, before admission opens. A job persisted as `RUNNING` or
//! `QUEUED` cannot be resumed, so it is closed out as `FAILED` with
//! [`INTERRUPTED_REASON`]. Running tasks fail, pending tasks are skipped,
//! finished tasks keep their outcome. Applying it twice changes nothing.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::exec::{ExecRequest, ExecutorBackend};
use crate::job::{Job, JobId, JobRecord, JobStatus, TaskStatus};
use crate::output::OutputSink;
use crate::persistence::PersistenceGateway;
use crate::tasks::borg::break_lock_command;

pub const INTERRUPTED_REASON: &str = "interrupted by restart";

/// Budget for one `borg break-lock` call.
pub const BREAK_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Jobs closed out as failed.
    pub recovered: Vec<JobId>,
    /// Jobs whose updated record could not be saved.
    pub save_failures: usize,
    /// Repositories `borg break-lock` succeeded on.
    pub locks_broken: Vec<String>,
}

/// Close out one interrupted job in place. Returns `false` when the job was
/// already terminal and nothing changed.
pub fn mark_interrupted(job: &mut Job) -> bool {
    if job.status.is_terminal() {
        return false;
    }

    let now = Utc::now();
    for task in job.tasks.iter_mut() {
        match task.status {
            TaskStatus::Running => {
                task.status = TaskStatus::Failed;
                task.error = Some(INTERRUPTED_REASON.to_string());
                task.finished_at.get_or_insert(now);
            }
            TaskStatus::Pending => {
                task.status = TaskStatus::Skipped;
                task.error = Some(INTERRUPTED_REASON.to_string());
                task.finished_at.get_or_insert(now);
            }
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Skipped => {}
        }
    }

    // Direct assignment: a persisted record may not have gone through the
    // in-memory transition path (e.g. QUEUED straight to FAILED).
    job.status = JobStatus::Failed;
    job.error = Some(INTERRUPTED_REASON.to_string());
    job.finished_at.get_or_insert(now);
    true
}

pub struct RecoveryService {
    store: Arc<dyn PersistenceGateway>,
    executor: Arc<dyn ExecutorBackend>,
    break_stale_locks: bool,
    borg_binary: String,
    live: HashSet<JobId>,
}

impl RecoveryService {
    pub fn new(store: Arc<dyn PersistenceGateway>, executor: Arc<dyn ExecutorBackend>) -> Self {
        Self {
            store,
            executor,
            break_stale_locks: false,
            borg_binary: "borg".to_string(),
            live: HashSet::new(),
        }
    }

    pub fn break_stale_locks(mut self, enabled: bool, borg_binary: impl Into<String>) -> Self {
        self.break_stale_locks = enabled;
        self.borg_binary = borg_binary.into();
        self
    }

    /// Jobs owned by this process (submitted before admission opened). Their
    /// records look incomplete but are not interrupted.
    pub fn ignoring(mut self, live: impl IntoIterator<Item = JobId>) -> Self {
        self.live.extend(live);
        self
    }

    /// Reconcile every incomplete record. Never fails: load errors are
    /// logged and produce an empty report.
    pub async fn run(&self) -> RecoveryReport {
        let mut report = RecoveryReport::default();

        let records = match self.store.load_incomplete_jobs().await {
            Ok(records) => records,
            Err(err) => {
                warn!(error = %err, "could not load incomplete jobs; skipping recovery");
                return report;
            }
        };

        if records.is_empty() {
            info!("recovery: no interrupted jobs");
            return report;
        }

        let mut repositories = BTreeSet::new();
        for mut record in records {
            if self.live.contains(&record.job.id) {
                continue;
            }
            let mutated = record
                .job
                .tasks
                .iter()
                .any(|t| t.kind.mutates_repository() && t.status != TaskStatus::Pending);
            let was_running = record.job.status == JobStatus::Running;

            if !mark_interrupted(&mut record.job) {
                continue;
            }
            info!(job_id = %record.job.id, label = ?record.job.label, "recovering interrupted job");

            if was_running && mutated {
                if let Some(repo) = &record.job.repository {
                    repositories.insert(repo.clone());
                }
            }

            report.recovered.push(record.job.id);
            if let Err(err) = self.save(&record).await {
                report.save_failures += 1;
                warn!(job_id = %record.job.id, error = %err, "failed to save recovered job");
            }
        }

        if self.break_stale_locks {
            for repo in repositories {
                if self.break_lock(&repo).await {
                    report.locks_broken.push(repo);
                }
            }
        }

        info!(
            recovered = report.recovered.len(),
            save_failures = report.save_failures,
            locks_broken = report.locks_broken.len(),
            "recovery complete"
        );
        report
    }

    async fn save(&self, record: &JobRecord) -> crate::errors::Result<()> {
        self.store.save_job_result(record).await
    }

    async fn break_lock(&self, repository: &str) -> bool {
        let request = ExecRequest {
            command: break_lock_command(&self.borg_binary, repository),
            timeout: Some(BREAK_LOCK_TIMEOUT),
            grace: Duration::from_secs(2),
        };
        let sink = OutputSink::detached(format!("break-lock {repository}"));

        match self
            .executor
            .execute(request, sink, CancellationToken::new())
            .await
        {
            Ok(result) if result.success() => {
                info!(repository, "stale repository lock broken");
                true
            }
            Ok(result) => {
                warn!(repository, exit_code = result.exit_code, "borg break-lock failed");
                false
            }
            Err(err) => {
                warn!(repository, error = %err, "borg break-lock could not run");
                false
            }
        }
    }
}
