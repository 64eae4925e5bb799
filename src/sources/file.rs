//! File announcement source
//!
//! Plays queued WAV files in order. Playback is a deterministic,
//! explicitly-requested event: the transmitter is keyed for the whole
//! duration with no attack delay and no signal-presence hysteresis.
//! Files are normalized (downmix, resample, gain) once at load, so the
//! per-tick path is a plain slice.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::audio::chunk::{downmix_to_mono, resample_linear, AudioChunk, AudioFormat};
use crate::config::SourceConfig;
use crate::error::SourceError;
use crate::sources::{AudioSource, SourceDescriptor, SourcePoll};

/// Handle for queueing announcements from outside the mixer thread.
#[derive(Clone)]
pub struct AnnouncementQueue {
    pending: Arc<Mutex<VecDeque<PathBuf>>>,
}

impl AnnouncementQueue {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn enqueue(&self, path: PathBuf) {
        self.pending.lock().push_back(path);
    }

    pub fn clear(&self) {
        self.pending.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    fn pop(&self) -> Option<PathBuf> {
        self.pending.lock().pop_front()
    }
}

impl Default for AnnouncementQueue {
    fn default() -> Self {
        Self::new()
    }
}

pub struct FileSource {
    descriptor: SourceDescriptor,
    format: AudioFormat,
    gain: f32,
    queue: AnnouncementQueue,
    /// Samples of the announcement currently playing
    current: Vec<i16>,
    position: usize,
}

impl FileSource {
    pub fn new(cfg: &SourceConfig, format: AudioFormat) -> Self {
        Self {
            descriptor: SourceDescriptor::from_config(cfg),
            format,
            gain: cfg.gain,
            queue: AnnouncementQueue::new(),
            current: Vec::new(),
            position: 0,
        }
    }

    /// Handle the control seam uses to queue announcements.
    pub fn queue(&self) -> AnnouncementQueue {
        self.queue.clone()
    }

    pub fn is_playing(&self) -> bool {
        self.position < self.current.len()
    }

    fn advance_playback(&mut self) {
        while !self.is_playing() {
            let Some(path) = self.queue.pop() else {
                return;
            };
            match load_wav(&path, self.format.sample_rate, self.gain) {
                Ok(samples) => {
                    tracing::info!(
                        source = %self.descriptor.name,
                        file = %path.display(),
                        secs = samples.len() as f64 / f64::from(self.format.sample_rate),
                        "announcement started"
                    );
                    self.current = samples;
                    self.position = 0;
                }
                Err(e) => {
                    // A bad file is skipped, not fatal; the next queued
                    // announcement still plays.
                    tracing::error!(source = %self.descriptor.name, "skipping announcement: {e}");
                }
            }
        }
    }
}

impl AudioSource for FileSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    fn poll(&mut self, now: Instant) -> SourcePoll {
        self.advance_playback();
        if !self.is_playing() {
            return SourcePoll::empty();
        }

        let end = (self.position + self.format.chunk_samples).min(self.current.len());
        let samples = self.current[self.position..end].to_vec();
        self.position = end;
        if !self.is_playing() {
            self.current = Vec::new();
            self.position = 0;
            tracing::info!(source = %self.descriptor.name, "announcement finished");
        }

        SourcePoll {
            chunk: Some(AudioChunk::from_samples(samples, self.format, now)),
            wants_transmit: true,
        }
    }

    fn on_mute_changed(&mut self, muted: bool) {
        if muted {
            // Mute aborts the current announcement entirely.
            self.current = Vec::new();
            self.position = 0;
        }
    }

    fn shutdown(&mut self) {
        self.queue.clear();
        self.current = Vec::new();
        self.position = 0;
    }
}

/// Load a WAV file as mono i16 at the engine rate.
fn load_wav(path: &Path, target_rate: u32, gain: f32) -> Result<Vec<i16>, SourceError> {
    let reader = hound::WavReader::open(path).map_err(|e| SourceError::FileDecode {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let spec = reader.spec();

    let interleaved: Vec<i16> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let shift = spec.bits_per_sample.saturating_sub(16);
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| (v >> shift) as i16))
                .collect::<std::result::Result<_, _>>()
        }
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16))
            .collect::<std::result::Result<_, _>>(),
    }
    .map_err(|e| SourceError::FileDecode {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let mono = downmix_to_mono(&interleaved, spec.channels);
    let mut samples = resample_linear(&mono, spec.sample_rate, target_rate);
    if (gain - 1.0).abs() > f32::EPSILON {
        for s in &mut samples {
            *s = (f32::from(*s) * gain).clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16;
        }
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceKind;

    fn announce_config() -> SourceConfig {
        let mut cfg = SourceConfig::new("announce", SourceKind::File);
        cfg.ptt_triggering = true;
        cfg
    }

    fn write_test_wav(path: &Path, rate: u32, channels: u16, frames: usize) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for _ in 0..frames {
            for _ in 0..channels {
                writer.write_sample(1000i16).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn plays_queued_file_and_keys_transmit() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("announce.wav");
        let format = AudioFormat::new(48_000, 480);
        write_test_wav(&wav, 48_000, 1, 480 * 3);

        let mut source = FileSource::new(&announce_config(), format);
        let queue = source.queue();

        // Nothing queued yet.
        let poll = source.poll(Instant::now());
        assert!(poll.chunk.is_none());
        assert!(!poll.wants_transmit);

        queue.enqueue(wav);
        for _ in 0..3 {
            let poll = source.poll(Instant::now());
            let chunk = poll.chunk.expect("playing");
            assert_eq!(chunk.samples.len(), 480);
            assert!(poll.wants_transmit);
        }
        assert!(source.poll(Instant::now()).chunk.is_none());
    }

    #[test]
    fn final_partial_chunk_is_padded() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("short.wav");
        let format = AudioFormat::new(48_000, 480);
        write_test_wav(&wav, 48_000, 1, 100);

        let mut source = FileSource::new(&announce_config(), format);
        source.queue().enqueue(wav);

        let chunk = source.poll(Instant::now()).chunk.expect("playing");
        assert_eq!(chunk.samples.len(), 480);
        assert_eq!(chunk.samples[99], 1000);
        assert_eq!(chunk.samples[100], 0);
    }

    #[test]
    fn stereo_file_downmixed_at_load() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("stereo.wav");
        let format = AudioFormat::new(48_000, 480);
        write_test_wav(&wav, 48_000, 2, 480);

        let mut source = FileSource::new(&announce_config(), format);
        source.queue().enqueue(wav);
        let chunk = source.poll(Instant::now()).chunk.expect("playing");
        assert_eq!(chunk.samples[0], 1000);
    }

    #[test]
    fn unreadable_file_skipped_without_stalling_queue() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.wav");
        let format = AudioFormat::new(48_000, 480);
        write_test_wav(&good, 48_000, 1, 480);

        let mut source = FileSource::new(&announce_config(), format);
        source.queue().enqueue(dir.path().join("missing.wav"));
        source.queue().enqueue(good);

        let poll = source.poll(Instant::now());
        assert!(poll.chunk.is_some(), "bad file skipped, good one plays");
    }
}
