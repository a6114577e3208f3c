//! Audio representation delivered to the analysis pipeline
//!
//! This module provides:
//! - The canonical PCM format shared by all sessions
//! - `AudioFrame`, the unit written to destination channels
//! - `PcmFramer`, which cuts decoder output into fixed-size chunks

pub mod frame;
pub mod pcm;

pub use frame::{AudioFormat, AudioFrame, BYTES_PER_SAMPLE, DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE};
pub use pcm::PcmFramer;
