use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use borgjobs::errors::{EngineError, Result};
use borgjobs::exec::{CommandSpec, ExecRequest, ExecutorBackend, ExitResult};
use borgjobs::output::{OutputSink, StreamKind};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// What a scripted command does when "run".
#[derive(Debug, Clone, Default)]
pub struct Script {
    lines: Vec<(StreamKind, String)>,
    lines_after_gate: Vec<(StreamKind, String)>,
    exit_code: i32,
    gate: Option<Arc<Notify>>,
    until_cancelled: bool,
    spawn_error: bool,
    delay: Option<Duration>,
}

impl Script {
    pub fn exit(code: i32) -> Self {
        Self {
            exit_code: code,
            ..Self::default()
        }
    }

    pub fn ok() -> Self {
        Self::exit(0)
    }

    pub fn stdout(mut self, line: &str) -> Self {
        self.lines.push((StreamKind::Stdout, line.to_string()));
        self
    }

    pub fn stderr(mut self, line: &str) -> Self {
        self.lines.push((StreamKind::Stderr, line.to_string()));
        self
    }

    /// Emitted only once the gate opens.
    pub fn stdout_after_gate(mut self, line: &str) -> Self {
        self.lines_after_gate.push((StreamKind::Stdout, line.to_string()));
        self
    }

    /// Hold the "process" open until `gate.notify_one()` (or cancellation).
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Never exit on its own; only cancellation ends it.
    pub fn until_cancelled(mut self) -> Self {
        self.until_cancelled = true;
        self
    }

    pub fn spawn_error() -> Self {
        Self {
            spawn_error: true,
            ..Self::default()
        }
    }

    pub fn delay(mut self, d: Duration) -> Self {
        self.delay = Some(d);
        self
    }
}

/// A fake executor that:
/// - records every command it was asked to run
/// - replays a `Script` chosen by the command's key instead of spawning
///
/// Keys are tried most specific first: `"<program> <first arg>"` (so
/// `"borg create"` and `"borg prune"` differ), then `"<program>"`. Queued
/// scripts for a key are consumed in order; the last one sticks. Commands
/// without a script exit 0 silently.
#[derive(Default)]
pub struct ScriptedExecutor {
    scripts: Mutex<HashMap<String, VecDeque<Script>>>,
    executed: Mutex<Vec<CommandSpec>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, key: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push_back(script);
    }

    pub fn executed(&self) -> Vec<CommandSpec> {
        self.executed.lock().unwrap().clone()
    }

    /// `"<program> <first arg>"` for each executed command, in order.
    pub fn executed_keys(&self) -> Vec<String> {
        self.executed().iter().map(key_of).collect()
    }

    /// Highest number of commands that were running at the same time.
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn pick(&self, spec: &CommandSpec) -> Script {
        let mut scripts = self.scripts.lock().unwrap();
        for key in [key_of(spec), spec.program.clone()] {
            if let Some(queue) = scripts.get_mut(&key) {
                if queue.len() > 1 {
                    if let Some(script) = queue.pop_front() {
                        return script;
                    }
                }
                if let Some(script) = queue.front() {
                    return script.clone();
                }
            }
        }
        Script::ok()
    }
}

fn key_of(spec: &CommandSpec) -> String {
    match spec.args.first() {
        Some(first) => format!("{} {}", spec.program, first),
        None => spec.program.clone(),
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn emit(sink: &OutputSink, lines: &[(StreamKind, String)]) {
    for (stream, text) in lines {
        sink.push_chunk(*stream, format!("{text}\n").as_bytes());
    }
}

impl ExecutorBackend for ScriptedExecutor {
    fn execute(
        &self,
        request: ExecRequest,
        sink: OutputSink,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<ExitResult>> + Send + '_>> {
        Box::pin(async move {
            let started = Instant::now();
            self.executed.lock().unwrap().push(request.command.clone());
            let script = self.pick(&request.command);

            if script.spawn_error {
                return Err(EngineError::Spawn {
                    program: request.command.program.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "scripted"),
                });
            }

            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            let _guard = ActiveGuard(&self.active);

            emit(&sink, &script.lines);

            if let Some(gate) = &script.gate {
                tokio::select! {
                    _ = gate.notified() => {}
                    _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                }
            }
            if script.until_cancelled {
                cancel.cancelled().await;
                return Err(EngineError::Cancelled);
            }
            if let Some(d) = script.delay {
                tokio::select! {
                    _ = tokio::time::sleep(d) => {}
                    _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                }
            }

            emit(&sink, &script.lines_after_gate);

            Ok(ExitResult {
                exit_code: script.exit_code,
                duration: started.elapsed(),
            })
        })
    }
}
