// tests/cli_and_rendering.rs

use clap::Parser;
use tracing_subscriber::filter::LevelFilter;

use borgjobs::cli::{CliArgs, LogLevel};
use borgjobs::events::JobEvent;
use borgjobs::job::{Job, JobRequest, JobStatus, TaskStatus, short_id};
use borgjobs::logging::resolve_filter;
use borgjobs::output::{OutputLine, StreamKind};
use borgjobs_test_utils::builders::{backup_task, prune_task};
use chrono::Utc;

#[test]
fn defaults_without_arguments() {
    let args = CliArgs::try_parse_from(["borgjobs"]).expect("parses");
    assert_eq!(args.config, "Borgjobs.toml");
    assert!(args.pipelines.is_empty());
    assert!(args.log_level.is_none());
    assert!(!args.dry_run && !args.json && !args.recover_only);
}

#[test]
fn pipelines_and_flags_are_parsed() {
    let args = CliArgs::try_parse_from([
        "borgjobs",
        "--config",
        "/etc/borgjobs.toml",
        "--log-level",
        "debug",
        "--json",
        "nightly",
        "weekly",
    ])
    .expect("parses");

    assert_eq!(args.config, "/etc/borgjobs.toml");
    assert_eq!(args.pipelines, vec!["nightly", "weekly"]);
    assert!(matches!(args.log_level, Some(LogLevel::Debug)));
    assert!(args.json);
}

#[test]
fn unknown_log_level_is_rejected() {
    assert!(CliArgs::try_parse_from(["borgjobs", "--log-level", "loud"]).is_err());
}

#[test]
fn cli_level_beats_environment() {
    let filter = resolve_filter(Some(LogLevel::Warn), Some("trace"));
    assert_eq!(filter.max_level_hint(), Some(LevelFilter::WARN));
}

#[test]
fn environment_is_used_when_no_flag_is_given() {
    let filter = resolve_filter(None, Some("debug"));
    assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));

    let alias = resolve_filter(None, Some("WARNING"));
    assert_eq!(alias.max_level_hint(), Some(LevelFilter::WARN));
}

#[test]
fn blank_environment_falls_back_to_info() {
    assert_eq!(resolve_filter(None, None).max_level_hint(), Some(LevelFilter::INFO));
    assert_eq!(resolve_filter(None, Some("  ")).max_level_hint(), Some(LevelFilter::INFO));
}

fn nightly_job() -> Job {
    let request = JobRequest::composite(vec![backup_task(&["/home"]), prune_task(7)])
        .label("nightly")
        .repository("/srv/borg/main");
    Job::from_request(&request)
}

#[test]
fn job_status_lines() {
    let mut job = nightly_job();
    let id = short_id(job.id);

    job.status = JobStatus::Running;
    assert_eq!(
        borgjobs::render_event(&JobEvent::job_status(&job)),
        Some(format!("[{id}] job RUNNING"))
    );

    job.status = JobStatus::Failed;
    job.error = Some("task 0 (backup) failed: command exited with code 2".to_string());
    assert_eq!(
        borgjobs::render_event(&JobEvent::job_status(&job)),
        Some(format!(
            "[{id}] job FAILED: task 0 (backup) failed: command exited with code 2"
        ))
    );
}

#[test]
fn task_status_lines_include_exit_code_and_error() {
    let mut job = nightly_job();
    let id = short_id(job.id);

    job.tasks[1].status = TaskStatus::Failed;
    job.tasks[1].exit_code = Some(2);
    job.tasks[1].error = Some("command exited with code 2".to_string());

    assert_eq!(
        borgjobs::render_event(&JobEvent::task_status(&job, &job.tasks[1])),
        Some(format!(
            "[{id}] task 1 prune FAILED (exit 2): command exited with code 2"
        ))
    );
    assert_eq!(
        borgjobs::render_event(&JobEvent::task_status(&job, &job.tasks[0])),
        Some(format!("[{id}] task 0 backup PENDING"))
    );
}

#[test]
fn output_queue_and_heartbeat_lines() {
    let job = nightly_job();
    let id = short_id(job.id);

    let line = OutputLine {
        job_id: job.id,
        task_index: 0,
        sequence: 1,
        timestamp: Utc::now(),
        text: "Creating archive at /srv/borg/main".to_string(),
        stream: StreamKind::Stderr,
    };
    assert_eq!(
        borgjobs::render_event(&JobEvent::task_output(line)),
        Some(format!("[{id}:0] Creating archive at /srv/borg/main"))
    );

    assert_eq!(
        borgjobs::render_event(&JobEvent::queue_update(job.id, Some(2), 3, 1)),
        Some(format!("[{id}] waiting at position 2 (1 running)"))
    );
    // Admitted jobs have no position and print nothing.
    assert_eq!(
        borgjobs::render_event(&JobEvent::queue_update(job.id, None, 2, 2)),
        None
    );
    assert_eq!(borgjobs::render_event(&JobEvent::heartbeat()), None);
}
