//! Hardware capture reader
//!
//! Owns the blocking/callback-driven device I/O for one source and runs
//! it on a dedicated thread, appending raw mono PCM blobs to the source's
//! [`SourceBuffer`]. Read failures are absorbed here: the mixer only ever
//! observes a buffer that stops filling, which the watchdog detects as
//! staleness.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver, Sender};

use crate::audio::buffer::SharedSourceBuffer;
use crate::audio::device::get_device_by_id;
use crate::error::AudioError;

/// Capture reader for a single hardware device.
pub struct CaptureReader {
    source_name: String,
    device_id: String,
    sample_rate: u32,
    gain: f32,
    running: Arc<AtomicBool>,
    buffer: SharedSourceBuffer,
    thread_handle: Option<JoinHandle<()>>,
    /// One channel for the reader's lifetime; restarts reuse it, so
    /// holders of a receiver clone stay subscribed across recovery.
    error_tx: Sender<AudioError>,
    error_rx: Receiver<AudioError>,
}

impl CaptureReader {
    pub fn new(
        source_name: &str,
        device_id: &str,
        sample_rate: u32,
        gain: f32,
        buffer: SharedSourceBuffer,
    ) -> Self {
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        Self {
            source_name: source_name.to_string(),
            device_id: device_id.to_string(),
            sample_rate,
            gain,
            running: Arc::new(AtomicBool::new(false)),
            buffer,
            thread_handle: None,
            error_tx,
            error_rx,
        }
    }

    /// Start the capture thread. Safe to call when already running.
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = get_device_by_id(&self.device_id)?;
        let channels = device.default_input_config()?.channels();
        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let error_tx = self.error_tx.clone();
        let running = self.running.clone();
        let running_for_loop = self.running.clone();
        let buffer = self.buffer.clone();
        let gain = self.gain;
        let name = self.source_name.clone();

        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name(format!("capture-{}", self.source_name))
            .spawn(move || {
                let cpal_device = device.into_inner();
                let cb_error_tx = error_tx.clone();

                let stream = cpal_device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if !running.load(Ordering::Relaxed) {
                            return;
                        }
                        // Downmix and convert at ingestion so every blob
                        // in the ring is already mono 16-bit.
                        let blob = interleaved_f32_to_mono_pcm(data, channels, gain);
                        let _ = buffer.push(blob);
                    },
                    move |err| {
                        let _ = cb_error_tx.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                );

                match stream {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            tracing::error!(source = %name, "failed to start capture stream: {e}");
                            let _ = error_tx.try_send(AudioError::StreamError(e.to_string()));
                            return;
                        }
                        while running_for_loop.load(Ordering::Relaxed) {
                            thread::sleep(Duration::from_millis(10));
                        }
                        // Stream drops here, closing the device.
                    }
                    Err(e) => {
                        tracing::error!(source = %name, "failed to build capture stream: {e}");
                        let _ = error_tx.try_send(AudioError::StreamError(e.to_string()));
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Stop the capture thread and close the device.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    /// Stage-1 recovery: close and reopen the capture stream.
    pub fn reopen(&mut self) -> Result<(), AudioError> {
        self.stop();
        self.start()
    }

    /// Stage-2 recovery: tear down, let the driver settle, re-enumerate
    /// the device from scratch and rebuild the stream.
    pub fn reinit(&mut self) -> Result<(), AudioError> {
        self.stop();
        thread::sleep(Duration::from_millis(500));
        // Force a fresh lookup; a replugged device keeps its name but not
        // its underlying handle.
        get_device_by_id(&self.device_id)?;
        self.start()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Pop the oldest stream error, if any.
    pub fn take_error(&self) -> Option<AudioError> {
        self.error_rx.try_recv().ok()
    }

    /// Receiver clone for harvesting stream errors without holding any
    /// handle on the reader itself.
    pub fn error_receiver(&self) -> Receiver<AudioError> {
        self.error_rx.clone()
    }
}

impl Drop for CaptureReader {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Convert an interleaved f32 callback buffer to a mono 16-bit PCM blob.
fn interleaved_f32_to_mono_pcm(data: &[f32], channels: u16, gain: f32) -> Bytes {
    let ch = channels.max(1) as usize;
    let mut out = Vec::with_capacity(data.len() / ch * 2);
    for frame in data.chunks_exact(ch) {
        let sum: f32 = frame.iter().sum();
        let sample = (sum / ch as f32 * gain).clamp(-1.0, 1.0);
        let s = (sample * f32::from(i16::MAX)) as i16;
        out.extend_from_slice(&s.to_le_bytes());
    }
    Bytes::from(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_stereo_to_mono_pcm() {
        let data = [0.5f32, 0.5, -1.0, -1.0];
        let blob = interleaved_f32_to_mono_pcm(&data, 2, 1.0);
        assert_eq!(blob.len(), 4);
        let first = i16::from_le_bytes([blob[0], blob[1]]);
        let second = i16::from_le_bytes([blob[2], blob[3]]);
        assert_eq!(first, (0.5 * f32::from(i16::MAX)) as i16);
        assert_eq!(second, -i16::MAX);
    }

    #[test]
    fn gain_clamps_at_full_scale() {
        let data = [0.9f32];
        let blob = interleaved_f32_to_mono_pcm(&data, 1, 4.0);
        let s = i16::from_le_bytes([blob[0], blob[1]]);
        assert_eq!(s, i16::MAX);
    }
}
