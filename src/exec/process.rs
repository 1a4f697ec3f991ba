// src/exec/process.rs

//! Real subprocess executor.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{EngineError, Result};
use crate::exec::backend::{ExecRequest, ExecutorBackend, ExitResult};
use crate::output::{OutputSink, StreamKind};

const READ_CHUNK: usize = 8 * 1024;

/// Upper bound on waiting for the pipes to close after the child exited.
/// A grandchild that inherited stdout can keep them open indefinitely.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

type Chunk = (StreamKind, Vec<u8>);

enum Ending {
    Exited(i32),
    Cancelled,
    TimedOut(Duration),
}

/// Runs commands with `tokio::process`, stdin closed, stdout/stderr piped.
///
/// On Unix the child gets its own process group so SIGTERM and the forced
/// kill reach anything it spawned.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn new() -> Self {
        Self
    }

    async fn run(
        &self,
        request: ExecRequest,
        sink: OutputSink,
        cancel: CancellationToken,
    ) -> Result<ExitResult> {
        let started = Instant::now();
        let spec = &request.command;

        info!(cmd = %spec.display(), "starting process");

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| EngineError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        let (tx, mut rx) = mpsc::channel::<Chunk>(64);
        let mut readers: Vec<JoinHandle<()>> = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(pump(stdout, StreamKind::Stdout, tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(pump(stderr, StreamKind::Stderr, tx.clone())));
        }
        drop(tx);

        let deadline = async {
            match request.timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        let mut pipes_open = true;
        let ending = loop {
            tokio::select! {
                chunk = rx.recv(), if pipes_open => match chunk {
                    Some((stream, bytes)) => sink.push_chunk(stream, &bytes),
                    None => pipes_open = false,
                },
                status = child.wait() => {
                    break Ending::Exited(status?.code().unwrap_or(-1));
                }
                _ = cancel.cancelled() => break Ending::Cancelled,
                _ = &mut deadline => {
                    break Ending::TimedOut(request.timeout.unwrap_or_default());
                }
            }
        };

        if matches!(ending, Ending::Cancelled | Ending::TimedOut(_)) {
            terminate(&mut child, request.grace).await;
        }

        if pipes_open {
            let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
                while let Some((stream, bytes)) = rx.recv().await {
                    sink.push_chunk(stream, &bytes);
                }
            })
            .await;
            if drained.is_err() {
                warn!(cmd = %spec.display(), "output pipes still open after exit; abandoning");
                for reader in &readers {
                    reader.abort();
                }
            }
        }

        let duration = started.elapsed();
        match ending {
            Ending::Exited(exit_code) => {
                info!(cmd = %spec.display(), exit_code, ?duration, "process exited");
                Ok(ExitResult {
                    exit_code,
                    duration,
                })
            }
            Ending::Cancelled => {
                info!(cmd = %spec.display(), ?duration, "process cancelled");
                Err(EngineError::Cancelled)
            }
            Ending::TimedOut(limit) => {
                warn!(cmd = %spec.display(), ?limit, "process timed out");
                Err(EngineError::Timeout(limit))
            }
        }
    }
}

impl ExecutorBackend for ProcessExecutor {
    fn execute(
        &self,
        request: ExecRequest,
        sink: OutputSink,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<ExitResult>> + Send + '_>> {
        Box::pin(self.run(request, sink, cancel))
    }
}

async fn pump<R>(mut reader: R, stream: StreamKind, tx: mpsc::Sender<Chunk>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send((stream, buf[..n].to_vec())).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                debug!(%stream, error = %err, "pipe read failed");
                break;
            }
        }
    }
}

/// SIGTERM, then a forced kill once `grace` has passed.
async fn terminate(child: &mut Child, grace: Duration) {
    send_term(child);

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            debug!(?status, "process stopped after SIGTERM");
        }
        Ok(Err(err)) => {
            warn!(error = %err, "waiting for terminated process failed");
        }
        Err(_) => {
            warn!(?grace, "process ignored SIGTERM; killing");
            force_kill(child);
            if let Err(err) = child.kill().await {
                warn!(error = %err, "failed to kill process");
            }
        }
    }
}

#[cfg(unix)]
fn send_term(child: &mut Child) {
    signal_group(child, libc::SIGTERM);
}

#[cfg(not(unix))]
fn send_term(child: &mut Child) {
    if let Err(err) = child.start_kill() {
        warn!(error = %err, "failed to stop process");
    }
}

#[cfg(unix)]
fn force_kill(child: &mut Child) {
    signal_group(child, libc::SIGKILL);
}

#[cfg(not(unix))]
fn force_kill(_child: &mut Child) {}

/// Signal the child's whole process group (it leads its own group).
#[cfg(unix)]
fn signal_group(child: &Child, signal: libc::c_int) {
    let Some(pid) = child.id() else {
        return;
    };
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) with a negative pid only sends a signal to the process
    // group we created for this child; no memory is shared.
    let rc = unsafe { libc::kill(-pid, signal) };
    if rc != 0 {
        debug!(pid, signal, "kill(2) on process group failed");
    }
}
