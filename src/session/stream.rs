//! Stream session
//!
//! A session supervises the decoder process for one source. Starting it
//! launches the decoder and spawns a monitor task; the monitor spawns the
//! reader for each decoder process, watches for exit and silence, applies the
//! restart policy and finally removes the session from the registry.
//!
//! ```text
//!                   ┌──────────── monitor task ─────────────┐
//!  start() ──spawn──►  select! {                            │
//!                   │    cancel      → terminate, Stopped   │
//!                   │    exit        → Crashed → restart    │
//!                   │    progress    → Running, re-arm      │
//!                   │    watchdog    → NoData → restart     │
//!                   │  }                                    │
//!                   └──────┬─────────────────────────────────┘
//!                          │ per process
//!                          ├── reader task: stdout → frames → destination
//!                          └── stderr drain: diagnostics
//! ```

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::context::SessionContext;
use super::process::{exit_code, DecoderPipes, DecoderProcess, Termination};
use super::reader::{drain_stderr, FrameReader, ReaderExit, ReaderProgress};
use super::state::{SessionState, StateCell};
use crate::error::{Error, Result};
use crate::source::StreamSource;
use crate::stats::metrics::SessionIdentity;
use crate::stats::{SessionSnapshot, SessionStats};
use crate::supervisor::StreamEvent;

/// Unique identifier of a session within one supervisor
pub type SessionId = u64;

/// Upper bound on waiting for the stderr drain after the decoder is gone
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
enum LaunchStatus {
    Pending,
    Launched,
    Failed {
        program: PathBuf,
        kind: io::ErrorKind,
        message: String,
    },
}

/// Outcome of one decoder process
enum Attempt {
    StopRequested,
    OutputClosed,
    Exited(Option<i32>),
    NoData(Duration),
}

/// Why the session needs a restart
enum Failure {
    Exited(Option<i32>),
    NoData(Duration),
    Launch(String),
}

impl Failure {
    fn exit_code(&self) -> Option<i32> {
        match self {
            Failure::Exited(code) => *code,
            _ => None,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Exited(Some(code)) => write!(f, "decoder exited with code {}", code),
            Failure::Exited(None) => write!(f, "decoder exited"),
            Failure::NoData(waited) => {
                write!(f, "no data from decoder for {} ms", waited.as_millis())
            }
            Failure::Launch(e) => write!(f, "decoder relaunch failed: {}", e),
        }
    }
}

enum Recovery {
    Relaunched(DecoderProcess, DecoderPipes),
    Stopped,
    GaveUp(String),
}

enum SessionExit {
    Stopped,
    Failed(String),
}

/// One supervised decoder for one source
pub struct StreamSession {
    id: SessionId,
    source: StreamSource,
    /// URL stamped on frames
    key: Arc<str>,
    /// Redacted URL for logs
    label: Arc<str>,
    state: StateCell,
    stats: Arc<SessionStats>,
    /// Frame numbering shared by every decoder process of this session
    sequence: Arc<AtomicU64>,
    /// Desired state: cancelled once a stop is requested
    cancel: CancellationToken,
    monitor: Mutex<Option<JoinHandle<()>>>,
    launch: watch::Sender<LaunchStatus>,
    /// Set once the decoder and every task of this session are gone
    terminated: watch::Sender<bool>,
}

impl StreamSession {
    /// Create a session in the `Stopped` state
    pub fn new(id: SessionId, source: StreamSource) -> Self {
        let (launch, _) = watch::channel(LaunchStatus::Pending);
        Self {
            id,
            key: Arc::from(source.url()),
            label: Arc::from(source.redacted_url()),
            source,
            state: StateCell::new(),
            stats: Arc::new(SessionStats::new()),
            sequence: Arc::new(AtomicU64::new(0)),
            cancel: CancellationToken::new(),
            monitor: Mutex::new(None),
            launch,
            terminated: watch::channel(false).0,
        }
    }

    /// Session identity
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Source this session decodes
    pub fn source(&self) -> &StreamSource {
        &self.source
    }

    /// Registry key
    pub fn url(&self) -> &str {
        self.source.url()
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Observe state changes
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Live counters
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Whether a stop has been requested
    pub fn is_stopping(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Point-in-time diagnostics
    pub fn snapshot(&self) -> SessionSnapshot {
        self.stats.snapshot(
            SessionIdentity {
                session_id: self.id,
                url: &self.label,
                protocol: self.source.protocol(),
                transport: self.source.transport(),
            },
            self.state.get(),
        )
    }

    /// Enter `Starting` ahead of launch so the registry never holds a stopped session
    pub(crate) fn mark_starting(&self) -> bool {
        self.state.transition(SessionState::Starting)
    }

    /// Launch the decoder and the monitor task
    ///
    /// Returns once the process has been spawned, not once data flows.
    /// Calling it on a session that already launched is a no-op.
    pub async fn start(self: &Arc<Self>, ctx: SessionContext) -> Result<()> {
        let mut slot = self.monitor.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        if self.cancel.is_cancelled() {
            tracing::debug!(stream = %self.label, session_id = self.id, "Stop requested before launch");
            self.state.transition(SessionState::Stopped);
            self.launch.send_replace(LaunchStatus::Failed {
                program: ctx.strategy.decoder_path().to_path_buf(),
                kind: io::ErrorKind::Interrupted,
                message: "stream stopped before launch".into(),
            });
            self.terminated.send_replace(true);
            return Ok(());
        }

        self.state.transition(SessionState::Starting);

        let command = ctx.strategy.build(&self.source);
        let (process, pipes) = match DecoderProcess::spawn(&command) {
            Ok(spawned) => spawned,
            Err(e) => {
                tracing::error!(
                    stream = %self.label,
                    session_id = self.id,
                    protocol = %self.source.protocol(),
                    program = %command.program().display(),
                    error = %e,
                    "Failed to launch decoder"
                );
                self.state.transition(SessionState::Stopped);
                self.launch.send_replace(LaunchStatus::Failed {
                    program: command.program().to_path_buf(),
                    kind: e.kind(),
                    message: e.to_string(),
                });
                self.terminated.send_replace(true);
                return Err(Error::LaunchFailure {
                    program: command.program().to_path_buf(),
                    protocol: self.source.protocol(),
                    source: e,
                });
            }
        };

        self.stats.mark_started();
        self.launch.send_replace(LaunchStatus::Launched);

        tracing::info!(
            stream = %self.label,
            session_id = self.id,
            protocol = %self.source.protocol(),
            transport = %self.source.transport(),
            pid = ?process.pid(),
            "Stream session started"
        );
        ctx.emit(StreamEvent::Started {
            url: self.key.to_string(),
            session_id: self.id,
            protocol: self.source.protocol(),
        });

        *slot = Some(tokio::spawn(Arc::clone(self).supervise(ctx, process, pipes)));
        Ok(())
    }

    /// Wait until a concurrent `start` has either launched or failed
    pub(crate) async fn wait_launched(&self) -> Result<()> {
        let mut rx = self.launch.subscribe();
        let status = rx
            .wait_for(|s| *s != LaunchStatus::Pending)
            .await
            .map(|s| (*s).clone());

        match status {
            Ok(LaunchStatus::Failed {
                program,
                kind,
                message,
            }) => Err(Error::LaunchFailure {
                program,
                protocol: self.source.protocol(),
                source: io::Error::new(kind, message),
            }),
            _ => Ok(()),
        }
    }

    /// Stop the session and wait until its decoder and tasks are gone
    ///
    /// Safe on a session that never started. Every caller, concurrent or
    /// late, returns only after the decoder process has exited.
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.state.transition(SessionState::Stopping);

        let handle = self.monitor.lock().await.take();
        match handle {
            Some(handle) => {
                if let Err(e) = handle.await {
                    tracing::error!(
                        stream = %self.label,
                        session_id = self.id,
                        error = %e,
                        "Session monitor task failed"
                    );
                }
                self.terminated.send_replace(true);
            }
            None if *self.launch.borrow() == LaunchStatus::Launched => {
                // Another caller owns the monitor handle; wait for it to wind down
                let mut rx = self.terminated.subscribe();
                let _ = rx.wait_for(|done| *done).await;
            }
            None => {
                // Never launched; nothing to tear down
                self.state.transition(SessionState::Stopped);
                self.terminated.send_replace(true);
            }
        }
    }

    async fn supervise(self: Arc<Self>, ctx: SessionContext, process: DecoderProcess, pipes: DecoderPipes) {
        let mut current = (process, pipes);

        let exit = loop {
            let (process, pipes) = current;
            let failure = match self.run_attempt(&ctx, process, pipes).await {
                Attempt::StopRequested => break SessionExit::Stopped,
                Attempt::OutputClosed => {
                    break SessionExit::Failed("destination channel closed by consumer".into())
                }
                Attempt::Exited(code) => Failure::Exited(code),
                Attempt::NoData(waited) => Failure::NoData(waited),
            };

            match self.recover(&ctx, failure).await {
                Recovery::Relaunched(process, pipes) => current = (process, pipes),
                Recovery::Stopped => break SessionExit::Stopped,
                Recovery::GaveUp(reason) => break SessionExit::Failed(reason),
            }
        };

        self.finish(&ctx, exit).await;
    }

    /// Drive one decoder process until it exits, goes silent, or is stopped
    async fn run_attempt(
        &self,
        ctx: &SessionContext,
        mut process: DecoderProcess,
        pipes: DecoderPipes,
    ) -> Attempt {
        let config = &ctx.config;
        let timeouts = config.health.for_protocol(self.source.protocol());

        let progress = Arc::new(ReaderProgress::new());
        let mut progress_rx = progress.subscribe();
        let reader_cancel = self.cancel.child_token();

        let reader = FrameReader::new(
            Arc::clone(&self.key),
            config.audio_format,
            config.chunk_bytes(),
            ctx.output.clone(),
        )
        .with_sequence(Arc::clone(&self.sequence))
        .with_stats(Arc::clone(&self.stats))
        .with_progress(Arc::clone(&progress));

        let mut reader_task = tokio::spawn(reader.run(pipes.stdout, reader_cancel.clone()));
        let stderr_task = pipes.stderr.map(|stderr| {
            tokio::spawn(drain_stderr(
                stderr,
                Arc::clone(&self.label),
                Arc::clone(&self.stats),
            ))
        });

        let mut receiving = false;
        let mut reader_done = false;
        let mut deadline = Instant::now() + timeouts.startup;

        let attempt = loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break Attempt::StopRequested,

                status = process.wait() => {
                    let code = match status {
                        Ok(status) => exit_code(&status),
                        Err(e) => {
                            tracing::warn!(stream = %self.label, error = %e, "Failed to wait for decoder");
                            None
                        }
                    };
                    self.stats.record_exit(code);
                    break Attempt::Exited(code);
                }

                changed = progress_rx.changed() => {
                    if changed.is_ok() {
                        if !receiving {
                            receiving = true;
                            self.on_first_data(ctx);
                        }
                        deadline = Instant::now() + timeouts.stall;
                    }
                }

                exit = &mut reader_task, if !reader_done => {
                    reader_done = true;
                    match exit {
                        Ok(ReaderExit::OutputClosed) => break Attempt::OutputClosed,
                        Ok(ReaderExit::Failed(e)) => {
                            tracing::warn!(stream = %self.label, error = %e, "Decoder output read failed");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::error!(stream = %self.label, error = %e, "Reader task failed");
                        }
                    }
                    // The decoder is on its way out; its exit status decides what comes next
                }

                _ = tokio::time::sleep_until(deadline) => {
                    if progress.is_backpressured() {
                        // Consumer is slow, decoder is fine
                        deadline = Instant::now() + timeouts.stall;
                        continue;
                    }
                    break Attempt::NoData(timeouts.current(receiving));
                }
            }
        };

        if !matches!(attempt, Attempt::Exited(_)) {
            reader_cancel.cancel();
            let termination = process.terminate(config.stop_grace_period).await;
            match termination {
                Termination::AlreadyExited(status) | Termination::Graceful(status) => {
                    self.stats.record_exit(exit_code(&status));
                }
                Termination::Forced(status) => {
                    tracing::warn!(
                        stream = %self.label,
                        session_id = self.id,
                        "Decoder stop timed out; process was killed"
                    );
                    self.stats.record_exit(status.as_ref().and_then(exit_code));
                }
            }
        }

        if !reader_done {
            // After a plain exit let the reader flush what the decoder already wrote
            if tokio::time::timeout(config.stop_grace_period, &mut reader_task)
                .await
                .is_err()
            {
                reader_cancel.cancel();
                let _ = reader_task.await;
            }
        }
        reader_cancel.cancel();

        if let Some(mut task) = stderr_task {
            if tokio::time::timeout(STDERR_DRAIN_TIMEOUT, &mut task).await.is_err() {
                task.abort();
                let _ = task.await;
            }
        }

        attempt
    }

    fn on_first_data(&self, ctx: &SessionContext) {
        if self.state.transition(SessionState::Running) {
            self.stats.mark_running();
            tracing::info!(
                stream = %self.label,
                session_id = self.id,
                restart_count = self.stats.restart_count(),
                "Stream running"
            );
            ctx.emit(StreamEvent::Running {
                url: self.key.to_string(),
                session_id: self.id,
            });
        }
    }

    /// Apply the restart policy until a decoder is relaunched, a stop is
    /// requested, or the policy gives up
    async fn recover(&self, ctx: &SessionContext, mut failure: Failure) -> Recovery {
        let policy = &ctx.config.restart_policy;

        loop {
            if self.cancel.is_cancelled() {
                return Recovery::Stopped;
            }
            self.state.transition(SessionState::Crashed);
            let attempt = self.stats.record_failure(policy.stable_after);

            if let Failure::NoData(waited) = failure {
                ctx.emit(StreamEvent::NoData {
                    url: self.key.to_string(),
                    session_id: self.id,
                    waited,
                });
            }

            tracing::warn!(
                stream = %self.label,
                session_id = self.id,
                reason = %failure,
                consecutive_failures = attempt,
                restart_count = self.stats.restart_count(),
                last_message = ?self.stats.last_message(),
                "Stream session crashed"
            );
            ctx.emit(StreamEvent::Crashed {
                url: self.key.to_string(),
                session_id: self.id,
                exit_code: failure.exit_code(),
                restart_count: self.stats.restart_count(),
            });

            let Some(delay) = policy.delay_for(attempt) else {
                return Recovery::GaveUp(format!(
                    "{}; giving up after {} consecutive failures",
                    failure, attempt
                ));
            };

            self.state.transition(SessionState::Restarting);
            tracing::info!(
                stream = %self.label,
                session_id = self.id,
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                "Restarting stream"
            );
            ctx.emit(StreamEvent::Restarting {
                url: self.key.to_string(),
                session_id: self.id,
                attempt,
                delay,
            });

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Recovery::Stopped,
                _ = tokio::time::sleep(delay) => {}
            }

            self.state.transition(SessionState::Starting);
            self.stats.record_restart();

            match DecoderProcess::spawn(&ctx.strategy.build(&self.source)) {
                Ok((process, pipes)) => {
                    self.stats.mark_started();
                    tracing::debug!(stream = %self.label, pid = ?process.pid(), "Decoder relaunched");
                    ctx.emit(StreamEvent::Started {
                        url: self.key.to_string(),
                        session_id: self.id,
                        protocol: self.source.protocol(),
                    });
                    return Recovery::Relaunched(process, pipes);
                }
                Err(e) => failure = Failure::Launch(e.to_string()),
            }
        }
    }

    async fn finish(&self, ctx: &SessionContext, exit: SessionExit) {
        if let SessionExit::Failed(reason) = &exit {
            self.stats.record_fatal(reason);
        }

        if self.state.get() != SessionState::Crashed {
            self.state.transition(SessionState::Stopping);
        }
        self.state.transition(SessionState::Stopped);
        ctx.registry.remove_if(self.url(), self.id).await;

        match exit {
            SessionExit::Stopped => {
                tracing::info!(
                    stream = %self.label,
                    session_id = self.id,
                    frames = self.stats.frames_delivered(),
                    restart_count = self.stats.restart_count(),
                    "Stream session stopped"
                );
                ctx.emit(StreamEvent::Stopped {
                    url: self.key.to_string(),
                    session_id: self.id,
                });
            }
            SessionExit::Failed(reason) => {
                tracing::error!(
                    stream = %self.label,
                    session_id = self.id,
                    reason = %reason,
                    restart_count = self.stats.restart_count(),
                    "Stream session failed permanently"
                );
                ctx.emit(StreamEvent::Failed {
                    url: self.key.to_string(),
                    session_id: self.id,
                    reason,
                });
            }
        }

        self.terminated.send_replace(true);
    }
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.id)
            .field("source", &self.label)
            .field("protocol", &self.source.protocol())
            .field("state", &self.state.get())
            .finish()
    }
}
