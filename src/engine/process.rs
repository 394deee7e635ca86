//! Asynchronous child-process supervision.
//!
//! One runner per toolchain invocation: spawns the child, pumps stdout and
//! stderr as separately tagged chunk streams in OS delivery order, and
//! signals completion exactly once. Cancellation is cooperative - a
//! termination request (SIGTERM on Unix) followed by a bounded grace period,
//! then a forced kill - and idempotent.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;

/// Grace period between the termination request and the forced kill.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Read buffer size per stream.
const CHUNK_CAPACITY: usize = 8 * 1024;

/// Event channel depth; output pumps apply backpressure past this.
const EVENT_BUFFER: usize = 64;

/// A fully resolved command for one step.
#[derive(Debug, Clone)]
pub struct StepCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Environment overlay on top of the inherited environment
    pub env: Vec<(String, String)>,
}

/// Which output stream a chunk came from.
///
/// Ordering is preserved within each stream; interleaving across the two is
/// whatever the OS delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// Events pushed by a running step.
#[derive(Debug)]
pub enum ProcessEvent {
    /// Raw output bytes, not necessarily line-aligned
    Chunk { stream: StreamKind, data: Vec<u8> },
    /// Completion signal; sent exactly once, after all chunks
    Exited(ExitOutcome),
}

/// How the child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Conventional exit with a code
    Exited(i32),
    /// Killed by a signal outside our cancellation protocol
    Signaled,
    /// Ended after a cancellation request (forced termination may not yield
    /// a conventional code across platforms, so this is its own state)
    Cancelled,
}

/// Spawn failures, surfaced synchronously - a run never starts on these.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("program `{0}` not found")]
    NotFound(String),

    #[error("failed to spawn `{program}`")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

// ============================================================================
// Cancellation
// ============================================================================

/// Shared cancellation handle. Requesting twice, or after natural
/// completion, has no additional effect.
#[derive(Clone, Default)]
pub struct CancelHandle {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation (idempotent).
    pub fn request(&self) {
        if !self.inner.flag.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Resolve once cancellation has been requested.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let mut notified = std::pin::pin!(self.inner.notify.notified());
        // Register before re-checking so a request between the check and the
        // await cannot be missed
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

// ============================================================================
// Spawning
// ============================================================================

/// A spawned step; consume events until [`ProcessEvent::Exited`] arrives.
pub struct RunningStep {
    events: mpsc::Receiver<ProcessEvent>,
}

impl RunningStep {
    pub async fn next_event(&mut self) -> Option<ProcessEvent> {
        self.events.recv().await
    }
}

/// Start the child asynchronously and return immediately with a handle.
pub fn spawn(cmd: &StepCommand, cancel: CancelHandle) -> Result<RunningStep, SpawnError> {
    let program =
        which::which(&cmd.program).map_err(|_| SpawnError::NotFound(cmd.program.clone()))?;

    let mut command = Command::new(&program);
    command
        .args(&cmd.args)
        .envs(cmd.env.iter().cloned())
        .current_dir(&cmd.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|source| SpawnError::Io {
        program: cmd.program.clone(),
        source,
    })?;

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);

    let mut pumps: Vec<JoinHandle<()>> = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        pumps.push(tokio::spawn(pump(stdout, StreamKind::Stdout, tx.clone())));
    }
    if let Some(stderr) = child.stderr.take() {
        pumps.push(tokio::spawn(pump(stderr, StreamKind::Stderr, tx.clone())));
    }

    tokio::spawn(supervise(child, cancel, pumps, tx));

    Ok(RunningStep { events: rx })
}

/// Forward one stream's bytes as tagged chunks, in delivery order.
async fn pump<R: AsyncRead + Unpin>(mut reader: R, stream: StreamKind, tx: mpsc::Sender<ProcessEvent>) {
    let mut buf = vec![0u8; CHUNK_CAPACITY];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let data = buf[..n].to_vec();
                if tx.send(ProcessEvent::Chunk { stream, data }).await.is_err() {
                    break; // receiver gone, stop reading
                }
            }
        }
    }
}

/// Wait for exit or cancellation, then emit the single completion event
/// after both pumps have drained (all chunks precede `Exited`).
async fn supervise(
    mut child: Child,
    cancel: CancelHandle,
    pumps: Vec<JoinHandle<()>>,
    tx: mpsc::Sender<ProcessEvent>,
) {
    let outcome = tokio::select! {
        biased;

        _ = cancel.cancelled() => {
            request_termination(&child);
            if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_err() {
                // Child ignored the request; force it
                let _ = child.kill().await;
            }
            ExitOutcome::Cancelled
        }

        status = child.wait() => {
            if cancel.is_cancelled() {
                // Cancellation raced natural completion; cancellation wins
                ExitOutcome::Cancelled
            } else {
                match status {
                    Ok(s) => s.code().map(ExitOutcome::Exited).unwrap_or(ExitOutcome::Signaled),
                    Err(_) => ExitOutcome::Signaled,
                }
            }
        }
    };

    let cancelled = matches!(outcome, ExitOutcome::Cancelled);
    for pump in pumps {
        if cancelled {
            // A killed child can leave grandchildren holding the pipes;
            // cancelled runs do not wait for that tail output
            pump.abort();
        }
        let _ = pump.await;
    }
    let _ = tx.send(ProcessEvent::Exited(outcome)).await;
}

/// Ask the child to terminate without forcing it.
#[cfg(unix)]
fn request_termination(child: &Child) {
    if let Some(pid) = child.id() {
        // SAFETY: plain signal send to a pid we own
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
    }
}

/// No portable soft-terminate off Unix; the grace period simply delays the
/// forced kill.
#[cfg(not(unix))]
fn request_termination(_child: &Child) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> StepCommand {
        StepCommand {
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
            cwd: std::env::temp_dir(),
            env: Vec::new(),
        }
    }

    async fn collect(mut step: RunningStep) -> (Vec<(StreamKind, Vec<u8>)>, ExitOutcome) {
        let mut chunks = Vec::new();
        loop {
            match step.next_event().await {
                Some(ProcessEvent::Chunk { stream, data }) => chunks.push((stream, data)),
                Some(ProcessEvent::Exited(outcome)) => return (chunks, outcome),
                None => panic!("event channel closed before completion signal"),
            }
        }
    }

    #[tokio::test]
    async fn test_streams_are_tagged_and_exit_is_last() {
        let step = spawn(&sh("echo out; echo err 1>&2"), CancelHandle::new()).unwrap();
        let (chunks, outcome) = collect(step).await;

        assert_eq!(outcome, ExitOutcome::Exited(0));
        let stdout: Vec<u8> = chunks
            .iter()
            .filter(|(s, _)| *s == StreamKind::Stdout)
            .flat_map(|(_, d)| d.clone())
            .collect();
        let stderr: Vec<u8> = chunks
            .iter()
            .filter(|(s, _)| *s == StreamKind::Stderr)
            .flat_map(|(_, d)| d.clone())
            .collect();
        assert_eq!(String::from_utf8_lossy(&stdout), "out\n");
        assert_eq!(String::from_utf8_lossy(&stderr), "err\n");
    }

    #[tokio::test]
    async fn test_nonzero_exit_code() {
        let step = spawn(&sh("exit 3"), CancelHandle::new()).unwrap();
        let (_, outcome) = collect(step).await;
        assert_eq!(outcome, ExitOutcome::Exited(3));
    }

    #[tokio::test]
    async fn test_missing_program_is_synchronous_error() {
        let cmd = StepCommand {
            program: "texflow-test-no-such-program".into(),
            args: vec![],
            cwd: std::env::temp_dir(),
            env: Vec::new(),
        };
        match spawn(&cmd, CancelHandle::new()) {
            Err(SpawnError::NotFound(program)) => {
                assert_eq!(program, "texflow-test-no-such-program");
            }
            other => panic!("expected NotFound, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_env_overlay_reaches_child() {
        let mut cmd = sh("printf '%s' \"$TEXFLOW_TEST_VAR\"");
        cmd.env.push(("TEXFLOW_TEST_VAR".into(), "overlay".into()));
        let (chunks, outcome) = collect(spawn(&cmd, CancelHandle::new()).unwrap()).await;
        assert_eq!(outcome, ExitOutcome::Exited(0));
        let stdout: Vec<u8> = chunks.into_iter().flat_map(|(_, d)| d).collect();
        assert_eq!(String::from_utf8_lossy(&stdout), "overlay");
    }

    #[tokio::test]
    async fn test_cancellation_terminates_promptly() {
        let cancel = CancelHandle::new();
        let step = spawn(&sh("sleep 30"), cancel.clone()).unwrap();

        let started = Instant::now();
        cancel.request();
        let (_, outcome) = collect(step).await;

        assert_eq!(outcome, ExitOutcome::Cancelled);
        // SIGTERM, not the grace-period kill, should have ended it
        assert!(started.elapsed() < KILL_GRACE);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let cancel = CancelHandle::new();
        let step = spawn(&sh("sleep 30"), cancel.clone()).unwrap();
        cancel.request();
        cancel.request();
        let (_, outcome) = collect(step).await;
        assert_eq!(outcome, ExitOutcome::Cancelled);
        // Requesting after completion is also a no-op
        cancel.request();
    }

    #[tokio::test]
    async fn test_cancelled_handle_resolves_immediately() {
        let cancel = CancelHandle::new();
        cancel.request();
        // Must not hang even though the request preceded the wait
        tokio::time::timeout(Duration::from_secs(1), cancel.cancelled())
            .await
            .expect("cancelled() should resolve for an already-cancelled handle");
    }
}
