//! Stream definitions as accepted by the settings API
//!
//! The wire shape is fixed:
//!
//! ```json
//! { "name": "Backyard", "url": "rtsp://camera.local/stream1", "type": "rtsp", "transport": "tcp" }
//! ```
//!
//! `transport` only matters for RTSP and may be omitted. `type` may be omitted
//! or empty, in which case it is inferred from the URL scheme.

use serde::{Deserialize, Serialize};

use super::{StreamProtocol, StreamSource};
use crate::error::SourceError;

/// One configured stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Human readable label
    #[serde(default)]
    pub name: String,

    /// Source URL
    pub url: String,

    /// Declared stream type (`rtsp`, `rtmp`, `hls`)
    #[serde(rename = "type", default)]
    pub stream_type: String,

    /// RTSP transport (`tcp`, `udp`)
    #[serde(default)]
    pub transport: String,
}

impl StreamConfig {
    /// Create a definition with an explicit type
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        protocol: StreamProtocol,
        transport: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            stream_type: protocol.as_str().to_string(),
            transport: transport.into(),
        }
    }

    /// Declared protocol, if any
    pub fn declared_protocol(&self) -> Result<Option<StreamProtocol>, SourceError> {
        if self.stream_type.trim().is_empty() {
            return Ok(None);
        }
        self.stream_type.parse().map(Some)
    }

    /// Validate the definition and turn it into a source identity
    pub fn to_source(&self) -> Result<StreamSource, SourceError> {
        match self.declared_protocol()? {
            Some(declared) => StreamSource::with_protocol(&self.url, declared, &self.transport),
            None => StreamSource::parse(&self.url, &self.transport),
        }
    }
}
