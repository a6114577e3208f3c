//! Stream supervisor
//!
//! The caller-facing owner of all sessions. Construct one per process (or per
//! test) and call [`StreamSupervisor::shutdown`] before dropping it.
//!
//! # Example
//! ```no_run
//! use audio_ingest::StreamSupervisor;
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> audio_ingest::Result<()> {
//! let supervisor = StreamSupervisor::new();
//! let (tx, mut frames) = mpsc::channel(64);
//!
//! supervisor.start_stream("rtsp://camera.local/stream1", "tcp", tx).await?;
//!
//! while let Some(frame) = frames.recv().await {
//!     println!("{} dBFS", frame.rms_dbfs());
//! }
//!
//! supervisor.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};

use super::config::SupervisorConfig;
use super::event::StreamEvent;
use crate::error::{Error, Result};
use crate::media::AudioFrame;
use crate::protocol::InvocationStrategy;
use crate::registry::{Claim, SessionRegistry};
use crate::session::{SessionContext, SessionId, SessionState, StreamSession};
use crate::source::{StreamConfig, StreamSource};
use crate::stats::SessionSnapshot;

/// Result of a successful start request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new session was created and its decoder launched
    Started(SessionId),
    /// The URL already had a live session; nothing changed
    AlreadyActive(SessionId),
}

impl StartOutcome {
    /// Session serving the URL
    pub fn session_id(&self) -> SessionId {
        match self {
            StartOutcome::Started(id) | StartOutcome::AlreadyActive(id) => *id,
        }
    }

    /// Whether this call created the session
    pub fn is_new(&self) -> bool {
        matches!(self, StartOutcome::Started(_))
    }
}

/// Supervises decoder sessions for any number of sources
pub struct StreamSupervisor {
    config: Arc<SupervisorConfig>,
    strategy: Arc<InvocationStrategy>,
    registry: Arc<SessionRegistry>,
    events: broadcast::Sender<StreamEvent>,
    next_session_id: AtomicU64,
    shutting_down: AtomicBool,
}

impl StreamSupervisor {
    /// Create a supervisor with default configuration
    pub fn new() -> Self {
        Self::with_config(SupervisorConfig::default())
    }

    /// Create a supervisor with custom configuration
    pub fn with_config(config: SupervisorConfig) -> Self {
        let strategy = InvocationStrategy::new(
            config.decoder_path.clone(),
            config.audio_format,
            config.io_timeout,
        );
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        Self {
            config: Arc::new(config),
            strategy: Arc::new(strategy),
            registry: Arc::new(SessionRegistry::new()),
            events,
            next_session_id: AtomicU64::new(1),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Get the supervisor configuration
    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Subscribe to lifecycle events of every session
    pub fn subscribe_events(&self) -> broadcast::Receiver<StreamEvent> {
        self.events.subscribe()
    }

    /// Start decoding `url` into `output`
    ///
    /// Returns once the decoder process is launched. Starting a URL that
    /// already has a live session is a no-op reported as
    /// [`StartOutcome::AlreadyActive`]; `output` is dropped in that case and
    /// frames keep flowing to the channel given by the first caller.
    pub async fn start_stream(
        &self,
        url: &str,
        transport: &str,
        output: mpsc::Sender<AudioFrame>,
    ) -> Result<StartOutcome> {
        let source = StreamSource::parse(url, transport)?;
        self.start_source(source, output).await
    }

    /// Start a stream from a settings definition
    pub async fn start_configured(
        &self,
        stream: &StreamConfig,
        output: mpsc::Sender<AudioFrame>,
    ) -> Result<StartOutcome> {
        let source = stream.to_source()?;
        tracing::debug!(
            name = %stream.name,
            stream = %source,
            protocol = %source.protocol(),
            "Starting configured stream"
        );
        self.start_source(source, output).await
    }

    /// Start an already classified source
    pub async fn start_source(
        &self,
        source: StreamSource,
        output: mpsc::Sender<AudioFrame>,
    ) -> Result<StartOutcome> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(Error::ShutDown);
        }

        loop {
            let claim = self
                .registry
                .claim(source.url(), || {
                    StreamSession::new(self.allocate_session_id(), source.clone())
                })
                .await;

            match claim {
                Claim::Existing(session) if session.is_stopping() => {
                    // A stop is in flight; let it finish, then take the URL over
                    session.stop().await;
                    self.registry.remove_if(session.url(), session.id()).await;
                }
                Claim::Existing(session) => {
                    session.wait_launched().await?;
                    tracing::debug!(
                        stream = %source,
                        session_id = session.id(),
                        state = %session.state(),
                        "Stream already active"
                    );
                    return Ok(StartOutcome::AlreadyActive(session.id()));
                }
                Claim::Created(session) => {
                    if let Err(e) = session.start(self.context(output)).await {
                        self.registry.remove_if(session.url(), session.id()).await;
                        return Err(e);
                    }
                    return Ok(StartOutcome::Started(session.id()));
                }
            }
        }
    }

    /// Stop the session for `url` and wait until its decoder is gone
    ///
    /// Fails with [`Error::NotFound`] when no session is registered.
    pub async fn stop_stream(&self, url: &str) -> Result<()> {
        let url = url.trim();
        let session = self
            .registry
            .get(url)
            .await
            .ok_or_else(|| Error::NotFound(url.to_string()))?;

        tracing::info!(stream = %session.source(), session_id = session.id(), "Stopping stream");

        session.stop().await;
        self.registry.remove_if(url, session.id()).await;
        Ok(())
    }

    /// URLs of every live session, sorted
    pub async fn active_streams(&self) -> Vec<String> {
        self.registry.active_urls().await
    }

    /// Whether `url` has a live session
    pub async fn is_active(&self, url: &str) -> bool {
        match self.registry.get(url.trim()).await {
            Some(session) => session.state().is_active(),
            None => false,
        }
    }

    /// Diagnostics for the session serving `url`
    pub async fn stream_stats(&self, url: &str) -> Option<SessionSnapshot> {
        self.registry
            .get(url.trim())
            .await
            .map(|session| session.snapshot())
    }

    /// Diagnostics for every registered session
    pub async fn all_stats(&self) -> Vec<SessionSnapshot> {
        let mut snapshots: Vec<SessionSnapshot> = self
            .registry
            .sessions()
            .await
            .iter()
            .map(|session| session.snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.url.cmp(&b.url));
        snapshots
    }

    /// Observe the lifecycle state of the session serving `url`
    pub async fn watch_state(&self, url: &str) -> Option<watch::Receiver<SessionState>> {
        self.registry
            .get(url.trim())
            .await
            .map(|session| session.watch_state())
    }

    /// Number of registered sessions
    pub async fn stream_count(&self) -> usize {
        self.registry.len().await
    }

    /// Stop every session and refuse new starts
    ///
    /// Sessions are stopped concurrently. Returns when all decoders are gone.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            tracing::debug!("Supervisor already shut down");
        }

        let sessions = self.registry.take_all().await;
        if sessions.is_empty() {
            return;
        }

        tracing::info!(sessions = sessions.len(), "Shutting down stream supervisor");

        let mut tasks = tokio::task::JoinSet::new();
        for session in sessions {
            tasks.spawn(async move { session.stop().await });
        }
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Session stop task failed");
            }
        }

        tracing::info!("Stream supervisor shut down");
    }

    fn allocate_session_id(&self) -> SessionId {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }

    fn context(&self, output: mpsc::Sender<AudioFrame>) -> SessionContext {
        SessionContext {
            config: Arc::clone(&self.config),
            strategy: Arc::clone(&self.strategy),
            output,
            events: self.events.clone(),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl Default for StreamSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
