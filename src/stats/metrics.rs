//! Per-session diagnostics
//!
//! Counters are updated from the reader and monitor tasks without locking;
//! the few non-counter fields sit behind a short-lived mutex.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::session::{SessionId, SessionState};
use crate::source::{StreamProtocol, Transport};

/// Longest decoder message kept for diagnostics
const MAX_MESSAGE_LEN: usize = 512;

#[derive(Debug, Default)]
struct Bookkeeping {
    /// Launch time of the current decoder process
    started_at: Option<Instant>,
    /// When the current process first produced data
    running_since: Option<Instant>,
    /// Exit code of the previous decoder process
    last_exit_code: Option<i32>,
    /// Last line the decoder wrote to stderr
    last_message: Option<String>,
    /// Reason the session gave up, if it did
    failure: Option<String>,
}

/// Live counters for one session
#[derive(Debug, Default)]
pub struct SessionStats {
    /// Frames written to the destination channel
    frames_delivered: AtomicU64,
    /// Audio bytes written to the destination channel
    bytes_delivered: AtomicU64,
    /// Restarts performed over the session's lifetime
    restart_count: AtomicU32,
    /// Failures since the session last ran stably
    consecutive_failures: AtomicU32,
    bookkeeping: Mutex<Bookkeeping>,
}

impl SessionStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self::default()
    }

    fn book(&self) -> std::sync::MutexGuard<'_, Bookkeeping> {
        self.bookkeeping
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// A decoder process was launched
    pub fn mark_started(&self) {
        let mut book = self.book();
        book.started_at = Some(Instant::now());
        book.running_since = None;
    }

    /// The current decoder process produced its first data
    pub fn mark_running(&self) {
        self.book().running_since = Some(Instant::now());
    }

    /// A frame was delivered downstream
    pub fn record_frame(&self, bytes: usize) {
        self.frames_delivered.fetch_add(1, Ordering::Relaxed);
        self.bytes_delivered.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record an exit code of the decoder process
    pub fn record_exit(&self, code: Option<i32>) {
        self.book().last_exit_code = code;
    }

    /// Keep the latest decoder diagnostic line
    pub fn record_message(&self, line: &str) {
        let mut line = line.trim_end().to_string();
        if line.len() > MAX_MESSAGE_LEN {
            let mut cut = MAX_MESSAGE_LEN;
            while !line.is_char_boundary(cut) {
                cut -= 1;
            }
            line.truncate(cut);
        }
        self.book().last_message = Some(line);
    }

    /// Record a failure and return the consecutive failure count
    ///
    /// If the failing process had been producing data for at least
    /// `stable_after`, earlier failures are forgotten first.
    pub fn record_failure(&self, stable_after: Duration) -> u32 {
        let stable = self
            .book()
            .running_since
            .map_or(false, |since| since.elapsed() >= stable_after);

        if stable {
            self.consecutive_failures.store(0, Ordering::Relaxed);
        }
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// A restart was performed
    pub fn record_restart(&self) {
        self.restart_count.fetch_add(1, Ordering::Relaxed);
    }

    /// The session gave up
    pub fn record_fatal(&self, reason: &str) {
        self.book().failure = Some(reason.to_string());
    }

    /// Total restarts
    pub fn restart_count(&self) -> u32 {
        self.restart_count.load(Ordering::Relaxed)
    }

    /// Failures since the session last ran stably
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Frames delivered
    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered.load(Ordering::Relaxed)
    }

    /// Bytes delivered
    pub fn bytes_delivered(&self) -> u64 {
        self.bytes_delivered.load(Ordering::Relaxed)
    }

    /// Exit code of the last decoder process that exited
    pub fn last_exit_code(&self) -> Option<i32> {
        self.book().last_exit_code
    }

    /// Latest decoder diagnostic line
    pub fn last_message(&self) -> Option<String> {
        self.book().last_message.clone()
    }

    /// Build a point-in-time snapshot
    pub(crate) fn snapshot(&self, identity: SessionIdentity<'_>, state: SessionState) -> SessionSnapshot {
        let book = self.book();
        SessionSnapshot {
            session_id: identity.session_id,
            url: identity.url.to_string(),
            protocol: identity.protocol,
            transport: identity.transport,
            state,
            restart_count: self.restart_count(),
            consecutive_failures: self.consecutive_failures(),
            last_exit_code: book.last_exit_code,
            started_at: book.started_at,
            uptime: book.started_at.map(|t| t.elapsed()),
            frames_delivered: self.frames_delivered(),
            bytes_delivered: self.bytes_delivered(),
            last_message: book.last_message.clone(),
            failure: book.failure.clone(),
        }
    }
}

/// Identity fields copied into a snapshot
pub(crate) struct SessionIdentity<'a> {
    pub session_id: SessionId,
    pub url: &'a str,
    pub protocol: StreamProtocol,
    pub transport: Transport,
}

/// Point-in-time diagnostics for one session
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    /// Session identity
    pub session_id: SessionId,
    /// Redacted source URL
    pub url: String,
    /// Source protocol
    pub protocol: StreamProtocol,
    /// Effective transport
    pub transport: Transport,
    /// Lifecycle state
    pub state: SessionState,
    /// Restarts over the session's lifetime
    pub restart_count: u32,
    /// Failures since the session last ran stably
    pub consecutive_failures: u32,
    /// Exit code of the last decoder process that exited
    pub last_exit_code: Option<i32>,
    /// Launch time of the current decoder process
    pub started_at: Option<Instant>,
    /// Time since the current decoder process was launched
    pub uptime: Option<Duration>,
    /// Frames delivered
    pub frames_delivered: u64,
    /// Bytes delivered
    pub bytes_delivered: u64,
    /// Latest decoder stderr line
    pub last_message: Option<String>,
    /// Reason the session gave up
    pub failure: Option<String>,
}

impl SessionSnapshot {
    /// Delivered audio in bits per second since the current process started
    pub fn bitrate(&self) -> u64 {
        match self.uptime.map(|d| d.as_secs()) {
            Some(secs) if secs > 0 => (self.bytes_delivered * 8) / secs,
            _ => 0,
        }
    }
}
