// tests/recovery.rs

use std::error::Error;
use std::sync::Arc;

use borgjobs::engine::Coordinator;
use borgjobs::job::{Job, JobRecord, JobRequest, JobStatus, TaskDefinition, TaskKind, TaskStatus};
use borgjobs::persistence::{JsonFileStore, MemoryStore, PersistenceGateway};
use borgjobs::recovery::{INTERRUPTED_REASON, RecoveryService, mark_interrupted};
use borgjobs_test_utils::builders::{
    EngineConfigBuilder, backup_task, command_task, prune_task,
};
use borgjobs_test_utils::fake_executor::{Script, ScriptedExecutor};
use borgjobs_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

const REPO: &str = "/srv/borg/main";

/// A job as a crash would leave it: admitted, first task done, second task
/// mid-flight, the rest pending.
fn crashed_mid_prune() -> Job {
    let request = JobRequest::composite(vec![
        backup_task(&["/home"]),
        prune_task(7),
        TaskDefinition::new(TaskKind::Compact),
    ])
    .label("nightly")
    .repository(REPO);
    let mut job = Job::from_request(&request);
    job.status = JobStatus::Running;
    job.started_at = Some(job.created_at);
    job.tasks[0].status = TaskStatus::Succeeded;
    job.tasks[0].exit_code = Some(0);
    job.tasks[1].status = TaskStatus::Running;
    job.current_task = 1;
    job
}

fn queued_job() -> Job {
    let mut job = Job::from_request(&JobRequest::simple(["rsync", "-a", "/a", "/b"]));
    job.status = JobStatus::Queued;
    job
}

fn completed_job() -> Job {
    let mut job = Job::from_request(&JobRequest::simple(["true"]));
    job.status = JobStatus::Completed;
    job.tasks[0].status = TaskStatus::Succeeded;
    job
}

fn memory_store(jobs: Vec<Job>) -> Arc<MemoryStore> {
    Arc::new(MemoryStore::with_records(
        jobs.into_iter().map(|job| JobRecord::new(job, Vec::new())),
    ))
}

#[test]
fn interrupted_job_is_closed_out() {
    let mut job = crashed_mid_prune();
    assert!(mark_interrupted(&mut job));

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some(INTERRUPTED_REASON));
    assert!(job.finished_at.is_some());

    let statuses: Vec<TaskStatus> = job.tasks.iter().map(|t| t.status).collect();
    assert_eq!(
        statuses,
        vec![TaskStatus::Succeeded, TaskStatus::Failed, TaskStatus::Skipped]
    );
    assert_eq!(job.tasks[0].error, None);
    assert_eq!(job.tasks[1].error.as_deref(), Some(INTERRUPTED_REASON));
}

#[test]
fn marking_twice_changes_nothing() {
    let mut job = crashed_mid_prune();
    mark_interrupted(&mut job);
    let once = job.clone();

    assert!(!mark_interrupted(&mut job));
    assert_eq!(job, once);
}

#[test]
fn queued_job_fails_without_running_anything() {
    let mut job = queued_job();
    assert!(mark_interrupted(&mut job));
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.tasks[0].status, TaskStatus::Skipped);
}

#[tokio::test]
async fn startup_recovers_only_incomplete_jobs() -> TestResult {
    init_tracing();

    let running = crashed_mid_prune();
    let queued = queued_job();
    let done = completed_job();
    let (running_id, queued_id, done_id) = (running.id, queued.id, done.id);
    let store = memory_store(vec![running, queued, done.clone()]);

    let gateway: Arc<dyn PersistenceGateway> = store.clone();
    let coord = Coordinator::new(EngineConfigBuilder::new().build(), ScriptedExecutor::new(), gateway);
    let report = coord.start().await?;

    let mut recovered = report.recovered.clone();
    recovered.sort();
    let mut expected = vec![running_id, queued_id];
    expected.sort();
    assert_eq!(recovered, expected);
    assert_eq!(report.save_failures, 0);
    assert!(report.locks_broken.is_empty());

    for id in [running_id, queued_id] {
        let record = store.get(id).ok_or("record vanished")?;
        assert_eq!(record.status(), JobStatus::Failed);
        assert_eq!(record.job.error.as_deref(), Some(INTERRUPTED_REASON));
    }
    assert_eq!(store.get(done_id).map(|r| r.job), Some(done));

    // Recovered jobs are history, not live jobs.
    assert!(coord.jobs().is_empty());
    coord.shutdown().await;

    // A second start over the same store finds nothing left to do.
    let gateway: Arc<dyn PersistenceGateway> = store.clone();
    let again = Coordinator::new(EngineConfigBuilder::new().build(), ScriptedExecutor::new(), gateway);
    assert!(again.start().await?.recovered.is_empty());
    again.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn stale_locks_are_broken_before_new_jobs_start() -> TestResult {
    init_tracing();

    let exec = ScriptedExecutor::new();
    let store = memory_store(vec![crashed_mid_prune()]);
    let gateway: Arc<dyn PersistenceGateway> = store.clone();
    let config = EngineConfigBuilder::new().break_stale_locks(true).build();
    let coord = Coordinator::new(config, exec.clone(), gateway);

    let id = coord
        .submit(JobRequest::composite(vec![command_task(&["echo", "hi"])]))
        .await?;
    let report = coord.start().await?;
    with_timeout(coord.wait_for(id)).await?;

    assert_eq!(report.locks_broken, vec![REPO.to_string()]);
    assert_eq!(report.recovered.len(), 1);
    assert!(!report.recovered.contains(&id));

    let executed = exec.executed();
    assert_eq!(executed[0].argv(), vec!["borg", "break-lock", REPO]);
    assert_eq!(exec.executed_keys()[1], "echo hi");

    coord.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn locks_are_left_alone_unless_a_mutating_task_ran() -> TestResult {
    init_tracing();

    // Only a `check` was running: nothing could have left a write lock.
    let request = JobRequest::composite(vec![TaskDefinition::new(TaskKind::Check)]).repository(REPO);
    let mut checking = Job::from_request(&request);
    checking.status = JobStatus::Running;
    checking.tasks[0].status = TaskStatus::Running;

    // Queued jobs never touched the repository.
    let request = JobRequest::composite(vec![backup_task(&["/home"])]).repository("/srv/borg/other");
    let mut waiting = Job::from_request(&request);
    waiting.status = JobStatus::Queued;

    let exec = ScriptedExecutor::new();
    let store = memory_store(vec![checking, waiting]);
    let report = RecoveryService::new(store.clone(), exec.clone())
        .break_stale_locks(true, "borg")
        .run()
        .await;

    assert_eq!(report.recovered.len(), 2);
    assert!(report.locks_broken.is_empty());
    assert!(exec.executed().is_empty());
    Ok(())
}

#[tokio::test]
async fn failed_break_lock_does_not_stop_recovery() -> TestResult {
    init_tracing();

    let exec = ScriptedExecutor::new();
    exec.script("borg break-lock", Script::exit(2).stderr("Repository does not exist."));
    let store = memory_store(vec![crashed_mid_prune()]);

    let report = RecoveryService::new(store.clone(), exec.clone())
        .break_stale_locks(true, "borg")
        .run()
        .await;

    assert_eq!(report.recovered.len(), 1);
    assert!(report.locks_broken.is_empty());
    assert_eq!(exec.executed_keys(), vec!["borg break-lock"]);
    Ok(())
}

#[tokio::test]
async fn break_lock_is_off_by_default() -> TestResult {
    let exec = ScriptedExecutor::new();
    let store = memory_store(vec![crashed_mid_prune()]);

    let report = RecoveryService::new(store, exec.clone()).run().await;
    assert_eq!(report.recovered.len(), 1);
    assert!(exec.executed().is_empty());
    Ok(())
}

#[tokio::test]
async fn file_store_round_trips_records() -> TestResult {
    let dir = tempfile::tempdir()?;
    let store = JsonFileStore::new(dir.path());

    let job = crashed_mid_prune();
    let record = JobRecord::new(job.clone(), Vec::new());
    store.save_job_result(&record).await?;

    assert!(store.jobs_dir().join(format!("{}.json", job.id)).exists());
    assert_eq!(store.load(job.id).await?, Some(record.clone()));

    let mut updated = record.clone();
    mark_interrupted(&mut updated.job);
    store.save_job_result(&updated).await?;
    assert_eq!(store.load(job.id).await?.map(|r| r.status()), Some(JobStatus::Failed));
    assert!(store.load_incomplete_jobs().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn file_store_skips_corrupt_records() -> TestResult {
    let dir = tempfile::tempdir()?;
    let store = JsonFileStore::new(dir.path());

    let queued = JobRecord::new(queued_job(), Vec::new());
    store.save_job_result(&queued).await?;
    std::fs::write(store.jobs_dir().join("garbage.json"), b"{ not json")?;
    std::fs::write(store.jobs_dir().join("notes.txt"), b"ignored")?;

    let incomplete = store.load_incomplete_jobs().await?;
    assert_eq!(incomplete.len(), 1);
    assert_eq!(incomplete[0].job.id, queued.job.id);
    Ok(())
}

#[tokio::test]
async fn file_store_survives_a_restart() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;

    // First "process": the job crashes mid-flight.
    let first = JsonFileStore::new(dir.path());
    let record = JobRecord::new(crashed_mid_prune(), Vec::new());
    first.save_job_result(&record).await?;

    // Second "process": recovery over the same directory.
    let gateway: Arc<dyn PersistenceGateway> = Arc::new(JsonFileStore::new(dir.path()));
    let coord = Coordinator::new(EngineConfigBuilder::new().build(), ScriptedExecutor::new(), gateway);
    let report = coord.start().await?;
    assert_eq!(report.recovered, vec![record.job.id]);

    let id = coord
        .submit(JobRequest::composite(vec![command_task(&["true"])]))
        .await?;
    with_timeout(coord.wait_for(id)).await?;
    coord.shutdown().await;

    let reread = JsonFileStore::new(dir.path());
    let recovered = reread.load(record.job.id).await?.ok_or("record missing")?;
    assert_eq!(recovered.status(), JobStatus::Failed);
    assert_eq!(recovered.job.tasks[2].status, TaskStatus::Skipped);
    let fresh = reread.load(id).await?.ok_or("new job not persisted")?;
    assert_eq!(fresh.status(), JobStatus::Completed);
    Ok(())
}
