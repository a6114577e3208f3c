//! PCM chunking
//!
//! Decoder stdout arrives in reads of arbitrary size. `PcmFramer` turns that
//! byte stream into fixed-size, sample-aligned chunks so downstream consumers
//! always receive whole samples.

use bytes::{Bytes, BytesMut};

use super::frame::AudioFormat;

/// Splits a raw PCM byte stream into fixed-size chunks
#[derive(Debug)]
pub struct PcmFramer {
    /// Chunk size in bytes (multiple of `align`)
    chunk_bytes: usize,
    /// Sample frame size in bytes
    align: usize,
    /// Bytes not yet emitted
    buffer: BytesMut,
}

impl PcmFramer {
    /// Create a framer emitting `chunk_bytes` chunks of `format` audio
    ///
    /// `chunk_bytes` is rounded down to a whole number of sample frames
    /// (minimum one).
    pub fn new(format: AudioFormat, chunk_bytes: usize) -> Self {
        let align = format.bytes_per_frame();
        let chunk_bytes = (chunk_bytes / align).max(1) * align;
        Self {
            chunk_bytes,
            align,
            buffer: BytesMut::with_capacity(chunk_bytes * 2),
        }
    }

    /// Chunk size in bytes
    pub fn chunk_bytes(&self) -> usize {
        self.chunk_bytes
    }

    /// Bytes buffered but not yet emitted
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Append bytes read from the decoder
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Take the next complete chunk, if one is buffered
    pub fn next_chunk(&mut self) -> Option<Bytes> {
        if self.buffer.len() >= self.chunk_bytes {
            Some(self.buffer.split_to(self.chunk_bytes).freeze())
        } else {
            None
        }
    }

    /// Drain whatever whole samples remain at end of stream
    ///
    /// A trailing partial sample is discarded.
    pub fn finish(&mut self) -> Option<Bytes> {
        let usable = self.buffer.len() - self.buffer.len() % self.align;
        let chunk = self.buffer.split_to(usable).freeze();
        self.buffer.clear();

        if chunk.is_empty() {
            None
        } else {
            Some(chunk)
        }
    }
}
