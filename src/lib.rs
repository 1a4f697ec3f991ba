// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod exec;
pub mod job;
pub mod logging;
pub mod output;
pub mod persistence;
pub mod recovery;
pub mod tasks;
pub mod types;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::engine::Coordinator;
use crate::events::{Delivery, EventBody, EventSubscription, JobEvent};
use crate::exec::ProcessExecutor;
use crate::job::{JobStatus, short_id};
use crate::persistence::{JsonFileStore, MemoryStore, PersistenceGateway};
use crate::tasks::TaskRegistry;
use crate::types::StorageMode;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the persistence backend selected by `[config].storage`
/// - the coordinator with the real process executor
/// - recovery of interrupted jobs
/// - the event printer on stdout
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)
        .with_context(|| format!("loading config from {}", args.config))?;

    let selected = select_pipelines(&cfg, &args.pipelines)?;

    if args.dry_run {
        print_dry_run(&cfg, &selected);
        return Ok(());
    }

    let store: Arc<dyn PersistenceGateway> = match cfg.config.storage {
        StorageMode::File => Arc::new(JsonFileStore::new(&cfg.config.state_dir)),
        StorageMode::Memory => Arc::new(MemoryStore::new()),
    };
    let coordinator = Coordinator::new(cfg.config.clone(), Arc::new(ProcessExecutor::new()), store);

    let printer = tokio::spawn(print_events(coordinator.events().subscribe(), args.json));

    let report = coordinator.start().await?;
    if !report.recovered.is_empty() {
        info!(count = report.recovered.len(), "interrupted jobs marked as failed");
    }

    if args.recover_only {
        coordinator.shutdown().await;
        let _ = printer.await;
        return Ok(());
    }

    let mut submitted = Vec::with_capacity(selected.len());
    for name in &selected {
        let request = cfg.pipeline[name].to_request(name);
        let id = coordinator
            .submit(request)
            .await
            .with_context(|| format!("submitting pipeline '{name}'"))?;
        submitted.push((name.clone(), id));
    }

    // Ctrl-C → cancel everything and let the drivers wind down.
    {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            info!("Ctrl+C received; cancelling jobs");
            for job in coordinator.jobs() {
                if let Err(err) = coordinator.cancel(job.id).await {
                    debug!(job_id = %job.id, error = %err, "cancel on Ctrl+C");
                }
            }
        });
    }

    let mut unsuccessful = Vec::new();
    for (name, id) in submitted {
        let job = coordinator.wait_for(id).await?;
        if job.status != JobStatus::Completed {
            unsuccessful.push(format!("{name}: {}", job.status));
        }
    }

    coordinator.shutdown().await;
    let _ = printer.await;

    if !unsuccessful.is_empty() {
        bail!("pipelines did not complete: {}", unsuccessful.join(", "));
    }
    Ok(())
}

/// Requested pipeline names, or every pipeline when none were given.
fn select_pipelines(cfg: &ConfigFile, requested: &[String]) -> Result<Vec<String>> {
    if requested.is_empty() {
        return Ok(cfg.pipeline.keys().cloned().collect());
    }
    for name in requested {
        if !cfg.pipeline.contains_key(name) {
            bail!("unknown pipeline '{name}'");
        }
    }
    Ok(requested.to_vec())
}

async fn print_events(subscription: EventSubscription, json: bool) {
    let mut stream = Box::pin(subscription.into_stream());
    while let Some(delivery) = stream.next().await {
        match delivery {
            Delivery::Event(event) if json => match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(err) => warn!(error = %err, "failed to serialise event"),
            },
            Delivery::Event(event) => {
                if let Some(line) = render_event(&event) {
                    println!("{line}");
                }
            }
            Delivery::Missed(n) => warn!(missed = n, "event printer fell behind"),
        }
    }
    debug!("event stream closed");
}

/// Human-readable form of an event; `None` for events not worth a line.
pub fn render_event(event: &JobEvent) -> Option<String> {
    let id = event.job_id.map(short_id).unwrap_or_default();
    match &event.body {
        EventBody::JobStatus(p) => Some(match (&p.task, &p.error) {
            (Some(task), _) => {
                let mut line = format!("[{id}] task {} {} {}", task.index, task.name, task.status);
                if let Some(code) = task.exit_code {
                    line.push_str(&format!(" (exit {code})"));
                }
                if let Some(err) = &task.error {
                    line.push_str(&format!(": {err}"));
                }
                line
            }
            (None, Some(err)) => format!("[{id}] job {}: {err}", p.status),
            (None, None) => format!("[{id}] job {}", p.status),
        }),
        EventBody::TaskOutput(line) => Some(format!("[{id}:{}] {}", line.task_index, line.text)),
        EventBody::QueueUpdate(q) => q
            .position
            .map(|pos| format!("[{id}] waiting at position {pos} ({} running)", q.running)),
        EventBody::Heartbeat => None,
    }
}

/// Dry-run output: each selected pipeline with the commands it would run.
fn print_dry_run(cfg: &ConfigFile, selected: &[String]) {
    let registry = TaskRegistry::with_defaults();
    let tools = cfg.config.tools();

    println!("borgjobs dry-run");
    println!("  config.concurrency_limit = {}", cfg.config.concurrency_limit);
    println!("  config.task_failure_policy = {:?}", cfg.config.task_failure_policy);
    println!("  config.storage = {:?}", cfg.config.storage);
    println!();

    println!("pipelines ({}):", selected.len());
    for name in selected {
        let pipeline = &cfg.pipeline[name];
        let request = pipeline.to_request(name);
        println!("  - {name} (priority {})", pipeline.priority);
        if let Some(repo) = &pipeline.repository {
            println!("      repository: {repo}");
        }
        for (i, def) in request.tasks.iter().enumerate() {
            let label = def.name.clone().unwrap_or_else(|| def.kind.to_string());
            println!(
                "      {i}. {label}: {}",
                registry.describe(def, request.repository.as_deref(), &tools)
            );
        }
    }

    debug!("dry-run complete (no execution)");
}
