//! Protocol quirks
//!
//! The three pull protocols behave differently enough that the decoder
//! invocation and the health checks must know which one they are dealing
//! with. This module documents the known differences and provides the
//! per-protocol knobs.
//!
//! # Known Quirks
//!
//! ## RTSP
//! - Lower transport is negotiated; TCP interleaving survives NAT and
//!   container port mapping, UDP does not
//! - A silent server stalls the socket forever unless `-timeout` is set
//! - First audio usually arrives within a couple of seconds
//!
//! ## RTMP
//! - For the RTMP demuxer `-timeout` is an alias of `listen_timeout`; passing
//!   it puts the decoder in server mode ("Address already in use") instead
//!   of pulling from the URL. Stalls are caught by the no-data watchdog.
//!
//! ## HLS
//! - The server must produce the first segments before anything can be
//!   read, so startup is several times slower than RTSP/RTMP
//! - Data arrives in segment-sized bursts, so gaps of a full segment
//!   duration are normal

use std::time::Duration;

use crate::source::StreamProtocol;

/// Static behavior differences between protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolQuirks {
    /// Decoder accepts `-timeout` as a client-side socket I/O timeout
    pub io_timeout_flag: bool,

    /// Lower transport (`-rtsp_transport`) can be selected
    pub selectable_transport: bool,

    /// Initial data takes materially longer than for other protocols
    pub slow_startup: bool,
}

impl ProtocolQuirks {
    /// Quirks for a protocol
    pub const fn of(protocol: StreamProtocol) -> Self {
        match protocol {
            StreamProtocol::Rtsp => Self {
                io_timeout_flag: true,
                selectable_transport: true,
                slow_startup: false,
            },
            StreamProtocol::Rtmp => Self {
                io_timeout_flag: false,
                selectable_transport: false,
                slow_startup: false,
            },
            StreamProtocol::Hls => Self {
                io_timeout_flag: true,
                selectable_transport: false,
                slow_startup: true,
            },
        }
    }
}

/// No-data thresholds for one protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthTimeouts {
    /// Maximum wait for the first byte after launch
    pub startup: Duration,

    /// Maximum gap between reads once data has flowed
    pub stall: Duration,
}

impl HealthTimeouts {
    /// Create thresholds
    pub const fn new(startup: Duration, stall: Duration) -> Self {
        Self { startup, stall }
    }

    /// Threshold that applies in the current phase
    pub fn current(&self, receiving: bool) -> Duration {
        if receiving {
            self.stall
        } else {
            self.startup
        }
    }
}

/// Protocol-aware health thresholds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthConfig {
    /// RTSP thresholds
    pub rtsp: HealthTimeouts,
    /// RTMP thresholds
    pub rtmp: HealthTimeouts,
    /// HLS thresholds
    pub hls: HealthTimeouts,
}

impl Default for HealthConfig {
    fn default() -> Self {
        let fast = HealthTimeouts::new(Duration::from_secs(15), Duration::from_secs(10));
        Self {
            rtsp: fast,
            rtmp: fast,
            hls: HealthTimeouts::new(Duration::from_secs(30), Duration::from_secs(30)),
        }
    }
}

impl HealthConfig {
    /// Same thresholds for every protocol
    pub fn uniform(timeouts: HealthTimeouts) -> Self {
        Self {
            rtsp: timeouts,
            rtmp: timeouts,
            hls: timeouts,
        }
    }

    /// Thresholds for a protocol
    pub fn for_protocol(&self, protocol: StreamProtocol) -> HealthTimeouts {
        match protocol {
            StreamProtocol::Rtsp => self.rtsp,
            StreamProtocol::Rtmp => self.rtmp,
            StreamProtocol::Hls => self.hls,
        }
    }

    /// Override thresholds for one protocol
    pub fn with(mut self, protocol: StreamProtocol, timeouts: HealthTimeouts) -> Self {
        match protocol {
            StreamProtocol::Rtsp => self.rtsp = timeouts,
            StreamProtocol::Rtmp => self.rtmp = timeouts,
            StreamProtocol::Hls => self.hls = timeouts,
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rtmp_has_no_io_timeout_flag() {
        assert!(!ProtocolQuirks::of(StreamProtocol::Rtmp).io_timeout_flag);
        assert!(ProtocolQuirks::of(StreamProtocol::Rtsp).io_timeout_flag);
        assert!(ProtocolQuirks::of(StreamProtocol::Hls).io_timeout_flag);
    }

    #[test]
    fn test_only_rtsp_selects_transport() {
        for protocol in StreamProtocol::ALL {
            assert_eq!(
                ProtocolQuirks::of(protocol).selectable_transport,
                protocol == StreamProtocol::Rtsp
            );
        }
    }

    #[test]
    fn test_hls_waits_longer() {
        let config = HealthConfig::default();
        let hls = config.for_protocol(StreamProtocol::Hls);

        for protocol in [StreamProtocol::Rtsp, StreamProtocol::Rtmp] {
            let other = config.for_protocol(protocol);
            assert!(hls.startup > other.startup);
            assert!(hls.stall >= other.stall);
        }
        assert!(ProtocolQuirks::of(StreamProtocol::Hls).slow_startup);
    }

    #[test]
    fn test_override_one_protocol() {
        let quick = HealthTimeouts::new(Duration::from_millis(200), Duration::from_millis(100));
        let config = HealthConfig::default().with(StreamProtocol::Rtmp, quick);

        assert_eq!(config.for_protocol(StreamProtocol::Rtmp), quick);
        assert_eq!(config.rtsp, HealthConfig::default().rtsp);
    }

    #[test]
    fn test_current_threshold() {
        let timeouts = HealthTimeouts::new(Duration::from_secs(30), Duration::from_secs(5));
        assert_eq!(timeouts.current(false), Duration::from_secs(30));
        assert_eq!(timeouts.current(true), Duration::from_secs(5));
    }
}
