//! Supervisor configuration

use std::path::PathBuf;
use std::time::Duration;

use crate::media::AudioFormat;
use crate::protocol::HealthConfig;

/// Smallest delay ever allowed between two decoder launches
pub const MIN_RESTART_DELAY: Duration = Duration::from_millis(50);

/// Default decoder executable, resolved through `PATH`
pub const DEFAULT_DECODER: &str = "ffmpeg";

/// How crashed sessions are restarted
///
/// Delays grow geometrically from `initial_delay` by `multiplier` up to
/// `max_delay`. After `max_attempts` consecutive failures the session gives
/// up. A decoder that produced data for `stable_after` before failing starts
/// the count over.
#[derive(Debug, Clone, PartialEq)]
pub struct RestartPolicy {
    /// Consecutive failures tolerated before giving up (0 = never restart)
    pub max_attempts: u32,

    /// Delay before the first restart
    pub initial_delay: Duration,

    /// Upper bound on the delay
    pub max_delay: Duration,

    /// Growth factor per consecutive failure (1.0 = fixed delay)
    pub multiplier: f64,

    /// Running time after which a failure no longer counts as consecutive
    pub stable_after: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            stable_after: Duration::from_secs(60),
        }
    }
}

impl RestartPolicy {
    /// Fixed delay between at most `max_attempts` restarts
    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            ..Default::default()
        }
    }

    /// Never restart; the first failure is final
    pub fn never() -> Self {
        Self {
            max_attempts: 0,
            ..Default::default()
        }
    }

    /// Set the maximum consecutive attempts
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the initial delay
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the delay cap
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the growth factor; values below 1.0 are treated as 1.0
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Set the stability window
    pub fn stable_after(mut self, window: Duration) -> Self {
        self.stable_after = window;
        self
    }

    /// Delay before restart number `attempt` (1-based), or `None` to give up
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }

        let floor = MIN_RESTART_DELAY;
        let initial = self.initial_delay.max(floor);
        let cap = self.max_delay.max(initial);

        let multiplier = if self.multiplier.is_finite() && self.multiplier > 1.0 {
            self.multiplier
        } else {
            1.0
        };

        let exponent = (attempt - 1).min(i32::MAX as u32) as i32;
        let secs = initial.as_secs_f64() * multiplier.powi(exponent);

        let delay = if secs.is_finite() && secs < cap.as_secs_f64() {
            Duration::from_secs_f64(secs)
        } else {
            cap
        };

        Some(delay.max(floor))
    }
}

/// Supervisor configuration options
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Decoder executable
    pub decoder_path: PathBuf,

    /// PCM format requested from the decoder
    pub audio_format: AudioFormat,

    /// Audio carried by one frame
    pub frame_duration: Duration,

    /// Network I/O timeout passed to the decoder (RTSP and HLS only)
    pub io_timeout: Duration,

    /// Time a decoder gets to exit after SIGTERM before it is killed
    pub stop_grace_period: Duration,

    /// Restart behavior for crashed sessions
    pub restart_policy: RestartPolicy,

    /// Per-protocol no-data thresholds
    pub health: HealthConfig,

    /// Capacity of the lifecycle event channel
    pub event_capacity: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            decoder_path: PathBuf::from(DEFAULT_DECODER),
            audio_format: AudioFormat::default(),
            frame_duration: Duration::from_millis(100),
            io_timeout: Duration::from_secs(10),
            stop_grace_period: Duration::from_secs(5),
            restart_policy: RestartPolicy::default(),
            health: HealthConfig::default(),
            event_capacity: 256,
        }
    }
}

impl SupervisorConfig {
    /// Set the decoder executable
    pub fn decoder_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.decoder_path = path.into();
        self
    }

    /// Set the output PCM format
    pub fn audio_format(mut self, format: AudioFormat) -> Self {
        self.audio_format = format;
        self
    }

    /// Set the duration of audio per frame
    pub fn frame_duration(mut self, duration: Duration) -> Self {
        self.frame_duration = duration;
        self
    }

    /// Set the decoder network I/O timeout
    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Set the stop grace period
    pub fn stop_grace_period(mut self, grace: Duration) -> Self {
        self.stop_grace_period = grace;
        self
    }

    /// Set the restart policy
    pub fn restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self
    }

    /// Set the health thresholds
    pub fn health(mut self, health: HealthConfig) -> Self {
        self.health = health;
        self
    }

    /// Set the event channel capacity
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Bytes of PCM per frame
    pub fn chunk_bytes(&self) -> usize {
        self.audio_format.chunk_bytes(self.frame_duration)
    }
}
