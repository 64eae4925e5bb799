//! Hardware capture source
//!
//! A cpal input device behind a [`SourceBuffer`]. The reader thread and
//! the mixer share only the buffer; the watchdog gets its own handle to
//! the reader so staged recovery never runs on the mixer thread.

use std::process::Command;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use parking_lot::Mutex;

use crate::audio::buffer::{create_shared_buffer, SharedSourceBuffer};
use crate::audio::capture::CaptureReader;
use crate::audio::chunk::{AudioChunk, AudioFormat};
use crate::config::SourceConfig;
use crate::engine::watchdog::{Recoverable, RecoveryStage};
use crate::error::{AudioError, Result, SourceError};
use crate::sources::{AudioSource, SourceDescriptor, SourcePoll};

pub struct HardwareCaptureSource {
    descriptor: SourceDescriptor,
    format: AudioFormat,
    buffer: SharedSourceBuffer,
    reader: Arc<Mutex<CaptureReader>>,
    /// Stream errors arrive here, off the reader mutex; recovery can
    /// hold the reader for seconds and the tick must never wait on it.
    error_rx: Receiver<AudioError>,
    reset_cmd: Option<String>,
}

impl HardwareCaptureSource {
    pub fn new(cfg: &SourceConfig, device: &str, format: AudioFormat) -> Result<Self> {
        let buffer = create_shared_buffer(
            format.chunk_bytes(),
            cfg.buffer_capacity_chunks,
            cfg.buffer_cushion_chunks,
        );
        let mut reader = CaptureReader::new(
            &cfg.name,
            device,
            format.sample_rate,
            cfg.gain,
            buffer.clone(),
        );
        reader.start()?;

        let error_rx = reader.error_receiver();
        Ok(Self {
            descriptor: SourceDescriptor::from_config(cfg),
            format,
            buffer,
            reader: Arc::new(Mutex::new(reader)),
            error_rx,
            reset_cmd: cfg.watchdog_reset_cmd.clone(),
        })
    }

    /// Handle the watchdog supervises this source through.
    pub fn recovery_target(&self) -> HardwareRecovery {
        HardwareRecovery {
            name: self.descriptor.name.clone(),
            buffer: self.buffer.clone(),
            reader: self.reader.clone(),
            reset_cmd: self.reset_cmd.clone(),
        }
    }

    pub fn buffer(&self) -> &SharedSourceBuffer {
        &self.buffer
    }
}

impl AudioSource for HardwareCaptureSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    fn poll(&mut self, now: Instant) -> SourcePoll {
        // Stream errors are absorbed here; the watchdog sees them as a
        // buffer that stops filling.
        if let Ok(err) = self.error_rx.try_recv() {
            tracing::debug!(source = %self.descriptor.name, "capture error absorbed: {err}");
        }

        let chunk = self
            .buffer
            .take_chunk()
            .map(|pcm| AudioChunk::from_pcm_bytes(&pcm, self.format, now));
        let wants_transmit = self.descriptor.ptt_triggering && chunk.is_some();
        SourcePoll {
            chunk,
            wants_transmit,
        }
    }

    fn on_mute_changed(&mut self, muted: bool) {
        if muted {
            self.buffer.reset();
        }
    }

    fn discard_tick(&mut self) {
        let _ = self.buffer.take_chunk();
    }

    fn shutdown(&mut self) {
        self.reader.lock().stop();
    }
}

/// Watchdog-side handle: staleness observation plus staged recovery.
pub struct HardwareRecovery {
    name: String,
    buffer: SharedSourceBuffer,
    reader: Arc<Mutex<CaptureReader>>,
    reset_cmd: Option<String>,
}

impl Recoverable for HardwareRecovery {
    fn name(&self) -> &str {
        &self.name
    }

    fn staleness(&self) -> Duration {
        self.buffer.staleness()
    }

    fn recover(&self, stage: RecoveryStage) -> std::result::Result<(), SourceError> {
        match stage {
            RecoveryStage::ReopenStream => {
                self.reader.lock().reopen().map_err(|e| {
                    SourceError::RecoveryFailed {
                        stage: 1,
                        reason: e.to_string(),
                    }
                })
            }
            RecoveryStage::ReinitSubsystem => {
                self.reader.lock().reinit().map_err(|e| {
                    SourceError::RecoveryFailed {
                        stage: 2,
                        reason: e.to_string(),
                    }
                })
            }
            RecoveryStage::ResetDriver => {
                let cmd = self.reset_cmd.as_ref().ok_or_else(|| {
                    SourceError::RecoveryFailed {
                        stage: 3,
                        reason: "no reset command configured".to_string(),
                    }
                })?;
                let status = Command::new("sh").arg("-c").arg(cmd).status().map_err(|e| {
                    SourceError::RecoveryFailed {
                        stage: 3,
                        reason: e.to_string(),
                    }
                })?;
                if !status.success() {
                    return Err(SourceError::RecoveryFailed {
                        stage: 3,
                        reason: format!("reset command exited with {status}"),
                    });
                }
                // Give the driver time to re-enumerate before reopening.
                std::thread::sleep(Duration::from_secs(2));
                self.reader.lock().reinit().map_err(|e| {
                    SourceError::RecoveryFailed {
                        stage: 3,
                        reason: e.to_string(),
                    }
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceKind;

    /// Source wired up without opening a device, for tick-path tests.
    fn unstarted(cfg: &SourceConfig, format: AudioFormat) -> HardwareCaptureSource {
        let buffer = create_shared_buffer(
            format.chunk_bytes(),
            cfg.buffer_capacity_chunks,
            cfg.buffer_cushion_chunks,
        );
        let reader = CaptureReader::new(
            &cfg.name,
            "input:none",
            format.sample_rate,
            cfg.gain,
            buffer.clone(),
        );
        let error_rx = reader.error_receiver();
        HardwareCaptureSource {
            descriptor: SourceDescriptor::from_config(cfg),
            format,
            buffer,
            reader: Arc::new(Mutex::new(reader)),
            error_rx,
            reset_cmd: None,
        }
    }

    #[test]
    fn poll_never_waits_on_a_held_reader() {
        let cfg = SourceConfig::new(
            "radio",
            SourceKind::Hardware {
                device: "input:none".to_string(),
            },
        );
        let mut source = unstarted(&cfg, AudioFormat::new(48_000, 480));

        // Staged recovery holds the reader across reopen/reinit, which
        // includes multi-second settle sleeps; the tick path must stay
        // off that mutex entirely.
        let reader = source.reader.clone();
        let _guard = reader.lock();

        let started = Instant::now();
        let poll = source.poll(Instant::now());
        assert!(poll.chunk.is_none());
        assert!(started.elapsed() < Duration::from_millis(100));
    }
}
