// tests/cancellation.rs

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use borgjobs::errors::EngineError;
use borgjobs::events::EventBody;
use borgjobs::job::{JobRequest, JobStatus, TaskStatus};
use borgjobs_test_utils::builders::{
    EngineConfigBuilder, backup_task, coordinator_with, prune_task,
};
use borgjobs_test_utils::fake_executor::{Script, ScriptedExecutor};
use borgjobs_test_utils::{drain_events, init_tracing, with_timeout};
use uuid::Uuid;

type TestResult = Result<(), Box<dyn Error>>;

const REPO: &str = "/srv/borg/main";

/// Wait until the executor has been asked to run `n` commands.
async fn wait_for_executions(exec: &ScriptedExecutor, n: usize) {
    with_timeout(async {
        while exec.executed().len() < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
}

fn backup_then_prune() -> JobRequest {
    JobRequest::composite(vec![backup_task(&["/home"]), prune_task(7)]).repository(REPO)
}

#[tokio::test]
async fn cancelling_a_queued_job_never_runs_it() -> TestResult {
    init_tracing();

    let exec = ScriptedExecutor::new();
    let gate = Arc::new(Notify::new());
    exec.script("blocker", Script::ok().gated(gate.clone()));

    let config = EngineConfigBuilder::new().concurrency_limit(1).build();
    let (coord, store) = coordinator_with(config, exec.clone());
    coord.start().await?;

    let blocker = coord.submit(JobRequest::simple(["blocker"])).await?;
    let queued = coord.submit(backup_then_prune()).await?;
    assert_eq!(coord.job(queued).map(|j| j.status), Some(JobStatus::Queued));

    let mut events = coord.events().subscribe();
    assert!(coord.cancel(queued).await?);

    // Each task is announced as skipped before the job turns CANCELLED.
    let transitions: Vec<(Option<usize>, String)> = drain_events(&mut events)
        .into_iter()
        .filter(|e| e.job_id == Some(queued))
        .filter_map(|e| match e.body {
            EventBody::JobStatus(p) => Some(match p.task {
                Some(task) => (Some(task.index), task.status.to_string()),
                None => (None, p.status.to_string()),
            }),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            (Some(0), "SKIPPED".to_string()),
            (Some(1), "SKIPPED".to_string()),
            (None, "CANCELLED".to_string()),
        ]
    );

    let job = with_timeout(coord.wait_for(queued)).await?;
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.error.as_deref(), Some("cancelled by user"));
    assert!(job.started_at.is_none());
    assert!(job.finished_at.is_some());
    assert!(job.tasks.iter().all(|t| t.status == TaskStatus::Skipped));
    assert!(coord.queue_positions().is_empty());

    let record = store.get(queued).ok_or("cancelled job was not persisted")?;
    assert_eq!(record.status(), JobStatus::Cancelled);

    gate.notify_one();
    with_timeout(coord.wait_for(blocker)).await?;
    assert_eq!(exec.executed_keys(), vec!["blocker"]);

    coord.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn cancelling_a_running_job_stops_the_active_task() -> TestResult {
    init_tracing();

    let exec = ScriptedExecutor::new();
    exec.script(
        "borg create",
        Script::ok().stdout("Creating archive").until_cancelled(),
    );
    let (coord, store) = coordinator_with(EngineConfigBuilder::new().build(), exec.clone());
    coord.start().await?;

    let mut events = coord.events().subscribe();
    let id = coord.submit(backup_then_prune()).await?;
    wait_for_executions(&exec, 1).await;

    assert!(coord.cancel(id).await?);
    let job = with_timeout(coord.wait_for(id)).await?;

    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.error.as_deref(), Some("cancelled by user"));
    assert_eq!(job.tasks[0].status, TaskStatus::Failed);
    assert_eq!(job.tasks[0].error.as_deref(), Some("cancelled by user"));
    assert_eq!(job.tasks[1].status, TaskStatus::Skipped);
    assert_eq!(exec.executed_keys(), vec!["borg create"]);

    let cancelled_events = drain_events(&mut events)
        .into_iter()
        .filter(|e| e.job_id == Some(id))
        .filter(|e| e.job_level_status() == Some(JobStatus::Cancelled))
        .count();
    assert_eq!(cancelled_events, 1);

    let record = store.get(id).ok_or("job was not persisted")?;
    assert_eq!(record.status(), JobStatus::Cancelled);
    assert_eq!(record.output_tail.len(), 1);

    coord.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn cancelling_a_running_job_frees_its_slot() -> TestResult {
    init_tracing();

    let exec = ScriptedExecutor::new();
    exec.script("hang", Script::ok().until_cancelled());

    let config = EngineConfigBuilder::new().concurrency_limit(1).build();
    let (coord, _store) = coordinator_with(config, exec.clone());
    coord.start().await?;

    let first = coord.submit(JobRequest::simple(["hang"])).await?;
    let second = coord.submit(JobRequest::simple(["next"])).await?;
    wait_for_executions(&exec, 1).await;
    assert_eq!(coord.job(second).map(|j| j.status), Some(JobStatus::Queued));

    coord.cancel(first).await?;
    let job = with_timeout(coord.wait_for(second)).await?;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(exec.executed_keys(), vec!["hang", "next"]);

    coord.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn cancelling_a_finished_job_is_a_no_op() -> TestResult {
    init_tracing();

    let exec = ScriptedExecutor::new();
    let (coord, _store) = coordinator_with(EngineConfigBuilder::new().build(), exec.clone());
    coord.start().await?;

    let id = coord.submit(JobRequest::simple(["true"])).await?;
    with_timeout(coord.wait_for(id)).await?;

    assert!(!coord.cancel(id).await?);
    assert!(!coord.cancel(id).await?);
    assert_eq!(coord.job(id).map(|j| j.status), Some(JobStatus::Completed));

    coord.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn cancelling_an_unknown_job_is_an_error() -> TestResult {
    let (coord, _store) =
        coordinator_with(EngineConfigBuilder::new().build(), ScriptedExecutor::new());
    coord.start().await?;

    let missing = Uuid::new_v4();
    assert!(matches!(
        coord.cancel(missing).await,
        Err(EngineError::JobNotFound(id)) if id == missing
    ));
    coord.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn shutdown_cancels_everything_in_flight() -> TestResult {
    init_tracing();

    let exec = ScriptedExecutor::new();
    exec.script("hang", Script::ok().until_cancelled());

    let config = EngineConfigBuilder::new().concurrency_limit(1).build();
    let (coord, _store) = coordinator_with(config, exec.clone());
    coord.start().await?;

    let running = coord.submit(JobRequest::simple(["hang"])).await?;
    let waiting = coord.submit(JobRequest::simple(["hang"])).await?;
    wait_for_executions(&exec, 1).await;

    with_timeout(coord.shutdown()).await;

    assert_eq!(coord.job(running).map(|j| j.status), Some(JobStatus::Cancelled));
    assert_eq!(coord.job(waiting).map(|j| j.status), Some(JobStatus::Cancelled));
    assert_eq!(exec.executed().len(), 1);
    Ok(())
}

#[tokio::test]
async fn finished_jobs_are_evicted_after_retention() -> TestResult {
    init_tracing();

    let exec = ScriptedExecutor::new();
    let config = EngineConfigBuilder::new().job_retention_seconds(0).build();
    let (coord, store) = coordinator_with(config, exec.clone());
    coord.start().await?;

    let id = coord.submit(JobRequest::simple(["true"])).await?;
    with_timeout(coord.wait_for(id)).await?;

    with_timeout(async {
        while coord.job(id).is_some() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(coord.output().snapshot(id).is_none());
    assert!(store.get(id).is_some());

    coord.shutdown().await;
    Ok(())
}
