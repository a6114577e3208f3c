//! Decoder output readers
//!
//! The frame reader owns the write side of the destination channel for the
//! lifetime of one decoder process. It blocks on the channel when the
//! consumer is slow; the monitor task keeps running independently and uses
//! [`ReaderProgress`] to tell a stalled decoder apart from a stalled consumer.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::media::{AudioFormat, AudioFrame, PcmFramer};
use crate::stats::SessionStats;

/// Size of a single read from the decoder pipe
pub(crate) const READ_BUFFER_SIZE: usize = 32 * 1024;

/// Progress signal shared between a reader and its monitor
#[derive(Debug)]
pub(crate) struct ReaderProgress {
    /// Total bytes read from the decoder
    bytes_read: watch::Sender<u64>,
    /// Reader is waiting for room in the destination channel
    backpressured: AtomicBool,
}

impl ReaderProgress {
    pub fn new() -> Self {
        let (bytes_read, _) = watch::channel(0);
        Self {
            bytes_read,
            backpressured: AtomicBool::new(false),
        }
    }

    /// Receiver notified after every successful read
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.bytes_read.subscribe()
    }

    pub fn bytes_read(&self) -> u64 {
        *self.bytes_read.borrow()
    }

    pub fn is_backpressured(&self) -> bool {
        self.backpressured.load(Ordering::Acquire)
    }

    fn record(&self, n: usize) {
        self.bytes_read.send_modify(|total| *total += n as u64);
    }

    fn set_backpressured(&self, value: bool) {
        self.backpressured.store(value, Ordering::Release);
    }
}

/// Why a reader stopped
#[derive(Debug)]
pub(crate) enum ReaderExit {
    /// Decoder closed its stdout
    Eof,
    /// Session cancelled the reader
    Cancelled,
    /// Consumer dropped the destination channel
    OutputClosed,
    /// Reading the pipe failed
    Failed(io::Error),
}

/// Turns decoder stdout into frames on the destination channel
pub(crate) struct FrameReader {
    source: Arc<str>,
    format: AudioFormat,
    framer: PcmFramer,
    output: mpsc::Sender<AudioFrame>,
    sequence: Arc<AtomicU64>,
    stats: Arc<SessionStats>,
    progress: Arc<ReaderProgress>,
}

impl FrameReader {
    pub fn new(
        source: Arc<str>,
        format: AudioFormat,
        chunk_bytes: usize,
        output: mpsc::Sender<AudioFrame>,
    ) -> Self {
        Self {
            source,
            format,
            framer: PcmFramer::new(format, chunk_bytes),
            output,
            sequence: Arc::new(AtomicU64::new(0)),
            stats: Arc::new(SessionStats::new()),
            progress: Arc::new(ReaderProgress::new()),
        }
    }

    /// Continue numbering from a session-wide counter
    pub fn with_sequence(mut self, sequence: Arc<AtomicU64>) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_stats(mut self, stats: Arc<SessionStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_progress(mut self, progress: Arc<ReaderProgress>) -> Self {
        self.progress = progress;
        self
    }

    /// Read until EOF, cancellation, or the consumer goes away
    pub async fn run<R>(mut self, mut input: R, cancel: CancellationToken) -> ReaderExit
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return ReaderExit::Cancelled,
                read = input.read(&mut buf) => read,
            };

            let n = match read {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return ReaderExit::Failed(e),
            };

            self.progress.record(n);
            self.framer.push(&buf[..n]);

            while let Some(chunk) = self.framer.next_chunk() {
                if let Err(exit) = self.deliver(chunk, &cancel).await {
                    return exit;
                }
            }
        }

        if let Some(rest) = self.framer.finish() {
            if let Err(exit) = self.deliver(rest, &cancel).await {
                return exit;
            }
        }

        ReaderExit::Eof
    }

    async fn deliver(&mut self, data: Bytes, cancel: &CancellationToken) -> Result<(), ReaderExit> {
        let len = data.len();
        let frame = AudioFrame {
            source: Arc::clone(&self.source),
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            captured_at: SystemTime::now(),
            format: self.format,
            data,
        };

        match self.output.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Closed(_)) => return Err(ReaderExit::OutputClosed),
            Err(mpsc::error::TrySendError::Full(frame)) => {
                self.progress.set_backpressured(true);
                let sent = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(ReaderExit::Cancelled),
                    sent = self.output.send(frame) => sent.map_err(|_| ReaderExit::OutputClosed),
                };
                self.progress.set_backpressured(false);
                sent?;
            }
        }

        self.stats.record_frame(len);
        Ok(())
    }
}

/// Forward decoder stderr to the log and keep the last line
///
/// Runs until the pipe closes, which happens when the decoder exits.
pub(crate) async fn drain_stderr<R>(stderr: R, label: Arc<str>, stats: Arc<SessionStats>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stderr).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                tracing::debug!(stream = %label, line = %line, "Decoder stderr");
                stats.record_message(&line);
            }
            Ok(None) => break,
            Err(e) => {
                tracing::trace!(stream = %label, error = %e, "Decoder stderr closed with error");
                break;
            }
        }
    }
}
