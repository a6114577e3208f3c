//! Error types
//!
//! `Error` is what the supervisor returns to callers. Runtime health problems
//! (crashes, silent decoders) never show up here; they are handled by the
//! restart policy and reported through [`StreamEvent`](crate::StreamEvent).

use std::io;
use std::path::PathBuf;

use crate::source::StreamProtocol;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by supervisor operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The URL or declared stream type cannot be mapped to a supported protocol
    #[error("invalid stream source: {0}")]
    InvalidSource(#[from] SourceError),

    /// The decoder process could not be started
    #[error("failed to launch decoder {program} for {protocol} stream: {source}")]
    LaunchFailure {
        /// Decoder executable that was invoked
        program: PathBuf,
        /// Protocol of the stream being started
        protocol: StreamProtocol,
        /// Underlying spawn error
        #[source]
        source: io::Error,
    },

    /// No session is registered for this URL
    #[error("no active stream for {0}")]
    NotFound(String),

    /// The supervisor has been shut down and accepts no new streams
    #[error("supervisor is shut down")]
    ShutDown,
}

impl Error {
    /// Whether retrying the same request could succeed
    ///
    /// Every caller-visible error is permanent for the given input; transient
    /// failures are retried internally by the restart policy.
    pub fn is_retryable(&self) -> bool {
        false
    }
}

/// Reasons a stream definition cannot be classified
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// URL could not be parsed or has no host
    #[error("malformed URL '{url}': {reason}")]
    MalformedUrl {
        /// Offending URL
        url: String,
        /// Parser message
        reason: String,
    },

    /// URL scheme maps to no supported protocol
    #[error("unsupported URL scheme '{scheme}' in '{url}' (expected rtsp, rtmp, http or https)")]
    UnsupportedScheme {
        /// Offending URL
        url: String,
        /// Scheme found in the URL
        scheme: String,
    },

    /// Declared stream type is not one of rtsp, rtmp, hls
    #[error("unknown stream type '{0}' (expected rtsp, rtmp or hls)")]
    UnknownType(String),

    /// Declared stream type disagrees with the URL scheme
    #[error("stream type {declared} does not match URL '{url}'")]
    TypeMismatch {
        /// Type from the stream definition
        declared: StreamProtocol,
        /// Offending URL
        url: String,
    },

    /// Transport is unknown or not applicable to the protocol
    #[error("invalid transport '{transport}' for {protocol} stream")]
    InvalidTransport {
        /// Transport string from the stream definition
        transport: String,
        /// Protocol of the stream
        protocol: StreamProtocol,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_failure_names_protocol() {
        let err = Error::LaunchFailure {
            program: PathBuf::from("/opt/ffmpeg/bin/ffmpeg"),
            protocol: StreamProtocol::Rtmp,
            source: io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
        };

        let message = err.to_string();
        assert!(message.contains("/opt/ffmpeg/bin/ffmpeg"));
        assert!(message.contains("RTMP"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_source_error_converts() {
        let err: Error = SourceError::UnknownType("srt".into()).into();
        assert!(matches!(err, Error::InvalidSource(SourceError::UnknownType(_))));
        assert_eq!(
            err.to_string(),
            "invalid stream source: unknown stream type 'srt' (expected rtsp, rtmp or hls)"
        );
    }
}
