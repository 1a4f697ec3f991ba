// src/engine/coordinator.rs

//! The job coordinator: submission, admission, cancellation and the
//! lifecycle around the per-job drivers in [`driver`](super::driver).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::engine::driver;
use crate::engine::queue::{QueueEntry, QueueManager, QueueStats};
use crate::engine::registry::JobRegistry;
use crate::errors::{EngineError, Result};
use crate::events::{EventBroadcaster, JobEvent};
use crate::exec::ExecutorBackend;
use crate::job::{Job, JobId, JobKind, JobRecord, JobRequest, JobStatus, TaskKind};
use crate::output::OutputManager;
use crate::persistence::PersistenceGateway;
use crate::recovery::{RecoveryReport, RecoveryService};
use crate::tasks::TaskRegistry;

pub(crate) struct Inner {
    pub(crate) config: EngineConfig,
    pub(crate) registry: JobRegistry,
    pub(crate) queue: QueueManager,
    pub(crate) output: Arc<OutputManager>,
    pub(crate) events: EventBroadcaster,
    pub(crate) store: Arc<dyn PersistenceGateway>,
    pub(crate) executor: Arc<dyn ExecutorBackend>,
    pub(crate) handlers: TaskRegistry,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    started: AtomicBool,
    /// Held while a job goes RUNNING and while queue positions are
    /// published, so no "waiting" update follows a job's RUNNING event.
    admission_events: Mutex<()>,
}

impl Inner {
    fn admission_events(&self) -> MutexGuard<'_, ()> {
        self.admission_events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn publish_task(&self, job: &Job, index: usize) {
        if let Some(task) = job.task(index) {
            self.events.publish(JobEvent::task_status(job, task));
        }
    }

    /// Best-effort upsert of the job plus its recent output. Failures are
    /// logged and never touch in-memory state.
    pub(crate) async fn persist(&self, job: &Job) {
        let tail = self
            .output
            .tail(job.id, self.config.persisted_output_lines);
        let record = JobRecord::new(job.clone(), tail);
        if let Err(err) = self.store.save_job_result(&record).await {
            warn!(job_id = %job.id, status = %job.status, error = %err, "failed to persist job");
        }
    }
}

/// Cloneable handle to the engine. All clones drive the same jobs.
#[derive(Clone)]
pub struct Coordinator {
    pub(crate) inner: Arc<Inner>,
}

impl Coordinator {
    pub fn new(
        config: EngineConfig,
        executor: Arc<dyn ExecutorBackend>,
        store: Arc<dyn PersistenceGateway>,
    ) -> Self {
        Self::with_handlers(config, executor, store, TaskRegistry::with_defaults())
    }

    pub fn with_handlers(
        config: EngineConfig,
        executor: Arc<dyn ExecutorBackend>,
        store: Arc<dyn PersistenceGateway>,
        handlers: TaskRegistry,
    ) -> Self {
        let queue = QueueManager::new(config.concurrency_limit, config.starvation_threshold);
        let output = Arc::new(OutputManager::new(config.output_line_retention));
        let events = EventBroadcaster::new(config.subscriber_buffer, config.event_history);

        Self {
            inner: Arc::new(Inner {
                config,
                registry: JobRegistry::default(),
                queue,
                output,
                events,
                store,
                executor,
                handlers,
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
                started: AtomicBool::new(false),
                admission_events: Mutex::new(()),
            }),
        }
    }

    /// Run recovery, start the heartbeat and open admission. Jobs submitted
    /// before this call wait in the queue.
    pub async fn start(&self) -> Result<RecoveryReport> {
        let inner = &self.inner;
        if inner.started.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyStarted);
        }

        let report = RecoveryService::new(Arc::clone(&inner.store), Arc::clone(&inner.executor))
            .break_stale_locks(inner.config.break_stale_locks, inner.config.borg_binary.clone())
            .ignoring(inner.registry.ids())
            .run()
            .await;

        let _ = inner
            .events
            .spawn_heartbeat(inner.config.heartbeat_interval(), inner.shutdown.child_token());

        let admitted = inner.queue.open();
        info!(
            recovered = report.recovered.len(),
            admitted = admitted.len(),
            "coordinator started; admission open"
        );
        self.admit_all(admitted);
        self.publish_queue_positions();
        Ok(report)
    }

    /// Validate and enqueue a job. Returns its id immediately; the job runs
    /// once admitted.
    pub async fn submit(&self, request: JobRequest) -> Result<JobId> {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(EngineError::ShuttingDown);
        }
        self.validate(&request)?;

        let job = Job::from_request(&request);
        let job_id = job.id;
        inner.output.register(job_id);
        inner.registry.insert(job);

        let ((), snapshot) = inner
            .registry
            .update(job_id, |job| job.transition(JobStatus::Queued))?;
        info!(
            job_id = %job_id,
            label = ?snapshot.label,
            tasks = snapshot.tasks.len(),
            priority = %snapshot.priority,
            "job queued"
        );
        inner.events.publish(JobEvent::job_status(&snapshot));
        inner.persist(&snapshot).await;

        let admitted = inner
            .queue
            .enqueue(QueueEntry::new(job_id, snapshot.priority));
        self.admit_all(admitted);
        self.publish_queue_positions();
        Ok(job_id)
    }

    fn validate(&self, request: &JobRequest) -> Result<()> {
        if request.tasks.is_empty() {
            return Err(EngineError::invalid_task("a job needs at least one task"));
        }
        if request.kind == JobKind::Simple
            && (request.tasks.len() != 1 || request.tasks[0].kind != TaskKind::Command)
        {
            return Err(EngineError::invalid_task(
                "a simple job holds exactly one `command` task",
            ));
        }
        for def in &request.tasks {
            self.inner
                .handlers
                .validate(def, request.repository.as_deref())?;
        }
        Ok(())
    }

    pub(crate) fn admit_all(&self, ids: Vec<JobId>) {
        for id in ids {
            self.admit(id);
        }
    }

    /// Move an admitted job to RUNNING and spawn its driver.
    fn admit(&self, job_id: JobId) {
        let inner = &self.inner;
        let started = {
            let _order = inner.admission_events();
            inner
                .registry
                .update(job_id, |job| job.transition(JobStatus::Running))
                .map(|((), snapshot)| inner.events.publish(JobEvent::job_status(&snapshot)))
        };

        match started {
            Ok(()) => {
                let cancel = inner
                    .registry
                    .cancel_token(job_id)
                    .unwrap_or_default();
                let this = self.clone();
                inner
                    .tracker
                    .spawn(async move { driver::run_job(this, job_id, cancel).await });
            }
            Err(err) => {
                error!(job_id = %job_id, error = %err, "cannot start admitted job; releasing slot");
                self.release_slot(job_id);
            }
        }
    }

    /// Give back the slot held by `job_id` and start whatever now fits.
    pub(crate) fn release_slot(&self, job_id: JobId) {
        let admitted = self.inner.queue.release(job_id);
        self.admit_all(admitted);
        self.publish_queue_positions();
    }

    fn publish_queue_positions(&self) {
        let inner = &self.inner;
        let _order = inner.admission_events();
        let stats = inner.queue.stats();
        for (job_id, position) in inner.queue.positions() {
            // Admitted by a concurrent release since `positions()` was taken.
            if inner.registry.get(job_id).map(|job| job.status) != Some(JobStatus::Queued) {
                continue;
            }
            inner.events.publish(JobEvent::queue_update(
                job_id,
                Some(position),
                stats.queued,
                stats.running,
            ));
        }
    }

    /// Request cancellation.
    ///
    /// - terminal job: nothing happens, `Ok(false)`
    /// - queued job: removed from the queue and cancelled right away
    /// - running job: the active process is signalled; the driver finishes
    ///   the job as CANCELLED
    pub async fn cancel(&self, job_id: JobId) -> Result<bool> {
        let inner = &self.inner;
        let job = inner
            .registry
            .get(job_id)
            .ok_or(EngineError::JobNotFound(job_id))?;
        if job.status.is_terminal() {
            return Ok(false);
        }

        if inner.queue.remove(job_id) {
            let (skipped, snapshot) = inner.registry.update(job_id, |job| {
                job.transition(JobStatus::Cancelled)?;
                job.error = Some(EngineError::Cancelled.to_string());
                Ok(job.skip_pending_from(0, "job cancelled before start"))
            })?;
            info!(job_id = %job_id, "queued job cancelled");

            inner.output.finish_job(job_id);
            for index in skipped {
                inner.publish_task(&snapshot, index);
            }
            inner.events.publish(JobEvent::job_status(&snapshot));
            inner.persist(&snapshot).await;
            inner.registry.settle(job_id);
            self.schedule_eviction(job_id);
            self.publish_queue_positions();
            return Ok(true);
        }

        match inner.registry.cancel_token(job_id) {
            Some(token) => {
                info!(job_id = %job_id, "cancelling running job");
                token.cancel();
                Ok(true)
            }
            None => Err(EngineError::JobNotFound(job_id)),
        }
    }

    /// Resolve once the job is terminal, persisted and its slot released.
    pub async fn wait_for(&self, job_id: JobId) -> Result<Job> {
        let mut settled = self
            .inner
            .registry
            .watch_settled(job_id)
            .ok_or(EngineError::JobNotFound(job_id))?;
        loop {
            if let Some(job) = settled.borrow_and_update().clone() {
                return Ok(job);
            }
            // Sender gone without a final snapshot: the entry was dropped.
            if settled.changed().await.is_err() {
                return Err(EngineError::JobNotFound(job_id));
            }
        }
    }

    pub fn job(&self, job_id: JobId) -> Option<Job> {
        self.inner.registry.get(job_id)
    }

    /// Snapshots of every job still in memory, oldest first.
    pub fn jobs(&self) -> Vec<Job> {
        self.inner.registry.all()
    }

    pub fn output(&self) -> Arc<OutputManager> {
        Arc::clone(&self.inner.output)
    }

    pub fn events(&self) -> EventBroadcaster {
        self.inner.events.clone()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.inner.queue.stats()
    }

    /// 1-based admission positions of waiting jobs.
    pub fn queue_positions(&self) -> Vec<(JobId, usize)> {
        self.inner.queue.positions()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Drop a terminal job from memory. `false` for unknown or active jobs.
    pub fn evict(&self, job_id: JobId) -> bool {
        let inner = &self.inner;
        match inner.registry.get(job_id) {
            Some(job) if job.status.is_terminal() => {
                inner.registry.remove(job_id);
                inner.output.clear(job_id);
                debug!(job_id = %job_id, "job evicted");
                true
            }
            _ => false,
        }
    }

    pub(crate) fn schedule_eviction(&self, job_id: JobId) {
        let this = self.clone();
        let retention = self.inner.config.job_retention();
        let stop = self.inner.shutdown.clone();
        self.inner.tracker.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(retention) => {
                    this.evict(job_id);
                }
                _ = stop.cancelled() => {}
            }
        });
    }

    /// Close admission, cancel every active job, wait for all drivers and
    /// close event subscriptions.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        info!("coordinator shutting down");
        inner.queue.close();
        inner.shutdown.cancel();

        for job_id in inner.registry.ids() {
            if let Err(err) = self.cancel(job_id).await {
                debug!(job_id = %job_id, error = %err, "cancel during shutdown");
            }
        }

        inner.tracker.close();
        inner.tracker.wait().await;
        inner.events.close();
        info!("coordinator stopped");
    }
}
