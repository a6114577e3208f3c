//! Canonical audio format and the frames delivered downstream
//!
//! Every session produces the same representation regardless of protocol:
//! interleaved signed 16-bit little-endian PCM at a fixed rate and channel
//! count (48 kHz mono unless configured otherwise).

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;

/// Default sample rate of the analysis pipeline
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// Default channel count of the analysis pipeline
pub const DEFAULT_CHANNELS: u16 = 1;

/// Bytes per sample for s16le
pub const BYTES_PER_SAMPLE: usize = 2;

/// PCM layout produced by the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    sample_rate: u32,
    channels: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
        }
    }
}

impl AudioFormat {
    /// Create a format, clamping zero values to 1
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            channels: channels.max(1),
        }
    }

    /// Samples per second per channel
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Interleaved channel count
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Size of one sample frame (one sample for every channel)
    pub fn bytes_per_frame(&self) -> usize {
        BYTES_PER_SAMPLE * self.channels as usize
    }

    /// Bytes per second of audio
    pub fn bytes_per_second(&self) -> usize {
        self.bytes_per_frame() * self.sample_rate as usize
    }

    /// Chunk size in bytes for the given duration
    ///
    /// Always a whole number of sample frames and never smaller than one.
    pub fn chunk_bytes(&self, duration: Duration) -> usize {
        let frames = (self.sample_rate as u128 * duration.as_micros() / 1_000_000) as usize;
        frames.max(1) * self.bytes_per_frame()
    }

    /// Playback duration of `bytes` of audio
    pub fn duration_of(&self, bytes: usize) -> Duration {
        let frames = (bytes / self.bytes_per_frame()) as u64;
        Duration::from_micros(frames * 1_000_000 / self.sample_rate as u64)
    }
}

/// A chunk of decoded audio from one source
///
/// Cloning is cheap; the sample data is reference counted.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// URL of the source that produced this frame
    pub source: Arc<str>,
    /// Position in the session's output, starting at 0 and continuing across restarts
    pub sequence: u64,
    /// Wall-clock time the chunk was read from the decoder
    pub captured_at: SystemTime,
    /// Layout of `data`
    pub format: AudioFormat,
    /// Interleaved s16le samples
    pub data: Bytes,
}

impl AudioFrame {
    /// Number of sample frames in this chunk
    pub fn sample_count(&self) -> usize {
        self.data.len() / self.format.bytes_per_frame()
    }

    /// Playback duration of this chunk
    pub fn duration(&self) -> Duration {
        self.format.duration_of(self.data.len())
    }

    /// Iterate over the interleaved samples
    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.data
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
    }

    /// RMS level in dBFS; negative infinity for silence or an empty frame
    pub fn rms_dbfs(&self) -> f64 {
        let (sum, count) = self.samples().fold((0f64, 0usize), |(sum, count), s| {
            let v = s as f64 / i16::MAX as f64;
            (sum + v * v, count + 1)
        });

        if count == 0 || sum == 0.0 {
            return f64::NEG_INFINITY;
        }

        20.0 * (sum / count as f64).sqrt().log10()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_from_samples(samples: &[i16]) -> AudioFrame {
        let data: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        AudioFrame {
            source: Arc::from("rtsp://test/stream"),
            sequence: 0,
            captured_at: SystemTime::now(),
            format: AudioFormat::default(),
            data: Bytes::from(data),
        }
    }

    #[test]
    fn test_default_format() {
        let format = AudioFormat::default();
        assert_eq!(format.sample_rate(), 48_000);
        assert_eq!(format.channels(), 1);
        assert_eq!(format.bytes_per_frame(), 2);
        assert_eq!(format.bytes_per_second(), 96_000);
    }

    #[test]
    fn test_chunk_bytes_aligned() {
        let mono = AudioFormat::default();
        assert_eq!(mono.chunk_bytes(Duration::from_millis(100)), 9_600);

        let stereo = AudioFormat::new(44_100, 2);
        let bytes = stereo.chunk_bytes(Duration::from_millis(10));
        assert_eq!(bytes % stereo.bytes_per_frame(), 0);
        assert_eq!(bytes, 441 * 4);

        // Never zero
        assert_eq!(mono.chunk_bytes(Duration::ZERO), 2);
    }

    #[test]
    fn test_zero_values_clamped() {
        let format = AudioFormat::new(0, 0);
        assert_eq!(format.sample_rate(), 1);
        assert_eq!(format.channels(), 1);
        assert_eq!(format.bytes_per_frame(), 2);
        assert_eq!(format.duration_of(4), Duration::from_secs(2));
    }

    #[test]
    fn test_duration_of() {
        let format = AudioFormat::default();
        assert_eq!(format.duration_of(96_000), Duration::from_secs(1));
        assert_eq!(format.duration_of(9_600), Duration::from_millis(100));
    }

    #[test]
    fn test_samples_little_endian() {
        let frame = frame_from_samples(&[1, -1, i16::MAX]);
        let samples: Vec<i16> = frame.samples().collect();
        assert_eq!(samples, vec![1, -1, i16::MAX]);
        assert_eq!(frame.sample_count(), 3);
    }

    #[test]
    fn test_rms_silence() {
        let frame = frame_from_samples(&[0; 480]);
        assert_eq!(frame.rms_dbfs(), f64::NEG_INFINITY);
    }

    #[test]
    fn test_rms_full_scale() {
        let samples: Vec<i16> = (0..480)
            .map(|i| if i % 2 == 0 { i16::MAX } else { -i16::MAX })
            .collect();
        let frame = frame_from_samples(&samples);
        assert!(frame.rms_dbfs().abs() < 0.01);
    }

    #[test]
    fn test_rms_half_scale() {
        let frame = frame_from_samples(&[i16::MAX / 2; 480]);
        let level = frame.rms_dbfs();
        assert!((level + 6.02).abs() < 0.05, "level was {level}");
    }
}
