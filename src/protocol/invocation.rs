//! Decoder invocation strategy
//!
//! Builds the exact ffmpeg command line for a source. All protocol-specific
//! branching lives here; the rest of the crate only sees a [`DecoderCommand`].
//!
//! Layout of the generated command:
//!
//! ```text
//! ffmpeg <global> <input options> -i <url> <output options> pipe:1
//!        │         │                       │
//!        │         │                       └ -vn -sn -dn -ac N -ar R -c:a pcm_s16le -f s16le
//!        │         └ per protocol, see ProtocolQuirks
//!        └ -hide_banner -nostdin -loglevel error
//! ```
//!
//! The decoder is always a client pulling from the URL; no listen option is
//! ever emitted.

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::quirks::ProtocolQuirks;
use crate::media::AudioFormat;
use crate::source::{StreamSource, Transport};

/// Output target: raw PCM on the decoder's stdout
pub const PIPE_OUTPUT: &str = "pipe:1";

/// A fully resolved decoder command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderCommand {
    program: PathBuf,
    args: Vec<String>,
    format: AudioFormat,
}

impl DecoderCommand {
    /// Executable to run
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Ordered argument list
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// PCM layout written to stdout
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Whether a flag appears anywhere in the argument list
    pub fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().any(|a| a == flag)
    }

    /// Value following a flag, if present
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    /// Arguments placed before `-i`
    pub fn input_args(&self) -> &[String] {
        let end = self.args.iter().position(|a| a == "-i").unwrap_or(0);
        &self.args[..end]
    }

    /// Arguments placed after the input URL
    pub fn output_args(&self) -> &[String] {
        match self.args.iter().position(|a| a == "-i") {
            Some(i) if i + 2 <= self.args.len() => &self.args[i + 2..],
            _ => &[],
        }
    }
}

/// Builds decoder commands for sources
#[derive(Debug, Clone)]
pub struct InvocationStrategy {
    decoder_path: PathBuf,
    format: AudioFormat,
    io_timeout: Duration,
}

impl InvocationStrategy {
    /// Create a strategy
    ///
    /// `io_timeout` is the client socket timeout given to protocols that
    /// support it.
    pub fn new(decoder_path: impl Into<PathBuf>, format: AudioFormat, io_timeout: Duration) -> Self {
        Self {
            decoder_path: decoder_path.into(),
            format,
            io_timeout,
        }
    }

    /// Decoder executable
    pub fn decoder_path(&self) -> &Path {
        &self.decoder_path
    }

    /// Build the command for a source
    pub fn build(&self, source: &StreamSource) -> DecoderCommand {
        let mut args: Vec<String> = Vec::with_capacity(32);

        args.extend(["-hide_banner", "-nostdin", "-loglevel", "error"].map(String::from));
        self.push_input_args(&mut args, source);
        args.push("-i".into());
        args.push(source.url().to_string());
        self.push_output_args(&mut args);

        DecoderCommand {
            program: self.decoder_path.clone(),
            args,
            format: self.format,
        }
    }

    fn push_input_args(&self, args: &mut Vec<String>, source: &StreamSource) {
        let quirks = ProtocolQuirks::of(source.protocol());

        if quirks.selectable_transport {
            let transport = match source.transport() {
                Transport::Udp => "udp",
                Transport::Tcp | Transport::None => "tcp",
            };
            args.push("-rtsp_transport".into());
            args.push(transport.into());
        }

        if quirks.io_timeout_flag {
            // Microseconds
            args.push("-timeout".into());
            args.push(self.io_timeout.as_micros().to_string());
        }
    }

    fn push_output_args(&self, args: &mut Vec<String>) {
        args.extend(["-vn", "-sn", "-dn"].map(String::from));
        args.push("-ac".into());
        args.push(self.format.channels().to_string());
        args.push("-ar".into());
        args.push(self.format.sample_rate().to_string());
        args.extend(["-c:a", "pcm_s16le", "-f", "s16le", PIPE_OUTPUT].map(String::from));
    }
}
