//! # audio-ingest
//!
//! Supervised audio ingestion from RTSP, RTMP and HLS sources.
//!
//! Each source is decoded by an external ffmpeg process that writes raw PCM
//! to its stdout. The supervisor owns those processes: it launches them with
//! the right per-protocol flags, cuts their output into [`AudioFrame`]s on a
//! caller-owned channel, restarts them when they crash or go silent, and
//! tears them down on stop.
//!
//! ```text
//!  start_stream(url) ──► StreamSupervisor ──► SessionRegistry
//!                                                 │ one per URL
//!                                                 ▼
//!                                           StreamSession ── monitor task
//!                                                 │
//!                                  ffmpeg ── stdout ──► reader ──► mpsc<AudioFrame>
//!                                         └─ stderr ──► tracing
//! ```
//!
//! ## Modules
//!
//! - [`source`]: URL classification and stream definitions
//! - [`protocol`]: decoder command lines and per-protocol quirks
//! - [`media`]: PCM format, frames and framing
//! - [`session`]: per-stream state machine, process and reader tasks
//! - [`registry`]: URL to session map
//! - [`supervisor`]: public entry point, configuration and events
//! - [`stats`]: per-session diagnostics

pub mod error;
pub mod media;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod source;
pub mod stats;
pub mod supervisor;

pub use error::{Error, Result, SourceError};
pub use media::{AudioFormat, AudioFrame};
pub use session::SessionState;
pub use source::{StreamConfig, StreamProtocol, StreamSource, Transport};
pub use stats::SessionSnapshot;
pub use supervisor::{RestartPolicy, StartOutcome, StreamEvent, StreamSupervisor, SupervisorConfig};
