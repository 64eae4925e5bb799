//! Opus encoder wrapper
//!
//! Mono voice encoding for the outgoing stream sink. Opus keeps encoder
//! state across frames, which is why the mixer substitutes silence
//! instead of skipping ticks: a gap in framing resets that state audibly.

use bytes::Bytes;
use opus::{Application, Channels, Encoder};

use crate::error::SinkError;

/// Opus encoder configured for continuous mono voice.
pub struct OpusEncoder {
    encoder: Encoder,
    frame_size: usize,
    /// Encoding buffer (reused to avoid allocations)
    encode_buffer: Vec<u8>,
    frames_encoded: u64,
    bytes_produced: u64,
}

impl OpusEncoder {
    /// `frame_size` must be a valid Opus frame length for `sample_rate`
    /// (2.5/5/10/20/40/60 ms worth of samples).
    pub fn new(sample_rate: u32, frame_size: usize, bitrate: u32) -> Result<Self, SinkError> {
        let mut encoder = Encoder::new(sample_rate, Channels::Mono, Application::Voip)
            .map_err(|e| SinkError::EncoderInit(e.to_string()))?;

        encoder
            .set_bitrate(opus::Bitrate::Bits(bitrate as i32))
            .map_err(|e| SinkError::EncoderInit(format!("Failed to set bitrate: {e}")))?;
        encoder
            .set_vbr(true)
            .map_err(|e| SinkError::EncoderInit(format!("Failed to set VBR: {e}")))?;

        Ok(Self {
            encoder,
            frame_size,
            // Max Opus frame is about 1275 bytes
            encode_buffer: vec![0u8; 4000],
            frames_encoded: 0,
            bytes_produced: 0,
        })
    }

    /// Encode exactly one frame of mono samples.
    pub fn encode(&mut self, samples: &[i16]) -> Result<Bytes, SinkError> {
        if samples.len() != self.frame_size {
            return Err(SinkError::EncodingFailed(format!(
                "expected {} samples, got {}",
                self.frame_size,
                samples.len()
            )));
        }

        let written = self
            .encoder
            .encode(samples, &mut self.encode_buffer)
            .map_err(|e| SinkError::EncodingFailed(e.to_string()))?;

        self.frames_encoded += 1;
        self.bytes_produced += written as u64;
        Ok(Bytes::copy_from_slice(&self.encode_buffer[..written]))
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded
    }

    pub fn bytes_produced(&self) -> u64 {
        self.bytes_produced
    }
}
