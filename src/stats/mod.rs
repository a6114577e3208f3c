//! Statistics for stream sessions

pub mod metrics;

pub use metrics::{SessionSnapshot, SessionStats};
