//! The fixed-format unit of audio exchanged between all components
//!
//! The engine operates on mono 16-bit signed PCM at a fixed sample rate.
//! Every chunk has exactly the configured sample count; partial data is
//! padded with silence before it reaches any consumer.

use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::constants::{BYTES_PER_SAMPLE, DEFAULT_CHUNK_SAMPLES, DEFAULT_SAMPLE_RATE};

/// Fixed audio format shared by every component of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Samples per chunk
    pub chunk_samples: usize,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, chunk_samples: usize) -> Self {
        Self {
            sample_rate,
            chunk_samples,
        }
    }

    /// Chunk size in bytes of raw PCM
    pub fn chunk_bytes(&self) -> usize {
        self.chunk_samples * BYTES_PER_SAMPLE
    }

    /// Duration of one chunk (the mixer tick period)
    pub fn chunk_duration(&self) -> Duration {
        Duration::from_secs_f64(self.chunk_samples as f64 / self.sample_rate as f64)
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            chunk_samples: DEFAULT_CHUNK_SAMPLES,
        }
    }
}

/// One chunk of mono 16-bit audio with a monotonic capture timestamp.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Mono samples, exactly `format.chunk_samples` long
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count (always 1 inside the engine)
    pub channels: u16,
    /// Monotonic timestamp of capture / synthesis
    pub captured_at: Instant,
}

impl AudioChunk {
    /// Build a chunk from exactly one chunk's worth of samples.
    ///
    /// Short input is padded with trailing silence so the fixed-length
    /// invariant holds for every consumer.
    pub fn from_samples(mut samples: Vec<i16>, format: AudioFormat, captured_at: Instant) -> Self {
        samples.resize(format.chunk_samples, 0);
        Self {
            samples,
            sample_rate: format.sample_rate,
            channels: 1,
            captured_at,
        }
    }

    /// An all-zero chunk (silence substitution for continuous sinks).
    pub fn silence(format: AudioFormat, captured_at: Instant) -> Self {
        Self {
            samples: vec![0; format.chunk_samples],
            sample_rate: format.sample_rate,
            channels: 1,
            captured_at,
        }
    }

    /// Decode little-endian 16-bit PCM bytes into a chunk, padding any
    /// trailing partial sample or shortfall with silence.
    pub fn from_pcm_bytes(pcm: &[u8], format: AudioFormat, captured_at: Instant) -> Self {
        let mut samples = Vec::with_capacity(format.chunk_samples);
        for pair in pcm.chunks_exact(BYTES_PER_SAMPLE) {
            samples.push(i16::from_le_bytes([pair[0], pair[1]]));
        }
        Self::from_samples(samples, format, captured_at)
    }

    /// Encode the chunk as little-endian 16-bit PCM bytes.
    pub fn to_pcm_bytes(&self) -> Bytes {
        let mut out = Vec::with_capacity(self.samples.len() * BYTES_PER_SAMPLE);
        for s in &self.samples {
            out.extend_from_slice(&s.to_le_bytes());
        }
        Bytes::from(out)
    }

    /// RMS level in dBFS relative to full scale. Silence floors at -100.
    pub fn rms_dbfs(&self) -> f32 {
        rms_dbfs(&self.samples)
    }

    pub fn is_silence(&self) -> bool {
        self.samples.iter().all(|&s| s == 0)
    }
}

/// RMS level of a sample slice in dBFS. Returns -100.0 for silence.
pub fn rms_dbfs(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return -100.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    let rms = (sum_squares / samples.len() as f64).sqrt();
    if rms < 1.0 {
        return -100.0;
    }
    (20.0 * (rms / f64::from(i16::MAX) as f64 + f64::EPSILON).log10()) as f32
}

/// Downmix interleaved multi-channel samples to mono by averaging.
pub fn downmix_to_mono(interleaved: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    let ch = channels as usize;
    interleaved
        .chunks_exact(ch)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| i32::from(s)).sum();
            (sum / ch as i32) as i16
        })
        .collect()
}

/// Linear resampling for ingestion-time normalization (file sources).
///
/// Quality is adequate for voice announcements; live sources are expected
/// to already deliver the engine rate.
pub fn resample_linear(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = f64::from(from_rate) / f64::from(to_rate);
    let out_len = (samples.len() as f64 / ratio).round() as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let pos = i as f64 * ratio;
        let idx = pos as usize;
        let frac = pos - idx as f64;
        let a = f64::from(samples[idx.min(samples.len() - 1)]);
        let b = f64::from(samples[(idx + 1).min(samples.len() - 1)]);
        out.push((a + (b - a) * frac).round() as i16);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_always_full_length() {
        let format = AudioFormat::default();
        let chunk = AudioChunk::from_samples(vec![100; 10], format, Instant::now());
        assert_eq!(chunk.samples.len(), format.chunk_samples);
        assert_eq!(chunk.samples[9], 100);
        assert_eq!(chunk.samples[10], 0);
    }

    #[test]
    fn pcm_round_trip() {
        let format = AudioFormat::new(48_000, 4);
        let chunk = AudioChunk::from_samples(vec![-1, 0, 1, i16::MAX], format, Instant::now());
        let bytes = chunk.to_pcm_bytes();
        assert_eq!(bytes.len(), format.chunk_bytes());
        let back = AudioChunk::from_pcm_bytes(&bytes, format, Instant::now());
        assert_eq!(back.samples, chunk.samples);
    }

    #[test]
    fn silence_is_floor_level() {
        let format = AudioFormat::default();
        let chunk = AudioChunk::silence(format, Instant::now());
        assert!(chunk.is_silence());
        assert_eq!(chunk.rms_dbfs(), -100.0);
    }

    #[test]
    fn full_scale_is_near_zero_dbfs() {
        let samples = vec![i16::MAX; 2400];
        let db = rms_dbfs(&samples);
        assert!(db > -0.1 && db <= 0.1, "got {db}");
    }

    #[test]
    fn downmix_averages_frames() {
        let stereo = vec![100, 200, -100, -200];
        assert_eq!(downmix_to_mono(&stereo, 2), vec![150, -150]);
    }

    #[test]
    fn resample_halves_length() {
        let samples = vec![0i16; 960];
        let out = resample_linear(&samples, 96_000, 48_000);
        assert_eq!(out.len(), 480);
    }
}
