//! Decoder invocation
//!
//! This module provides:
//! - Per-protocol quirks and health thresholds
//! - The invocation strategy that turns a source into a decoder command line

pub mod invocation;
pub mod quirks;

pub use invocation::{DecoderCommand, InvocationStrategy, PIPE_OUTPUT};
pub use quirks::{HealthConfig, HealthTimeouts, ProtocolQuirks};
