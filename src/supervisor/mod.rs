//! Stream supervision
//!
//! [`StreamSupervisor`] is the entry point: it validates sources, owns the
//! session registry and publishes [`StreamEvent`]s.

pub mod config;
pub mod event;
pub mod manager;

pub use config::{RestartPolicy, SupervisorConfig, DEFAULT_DECODER, MIN_RESTART_DELAY};
pub use event::StreamEvent;
pub use manager::{StartOutcome, StreamSupervisor};
