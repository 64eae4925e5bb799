//! Hardware playback stream
//!
//! Output-side counterpart of [`crate::audio::capture`]: a cpal output
//! stream on its own thread, pulling mono chunks from a bounded ring and
//! zero-filling on underrun so the device never starves.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam::queue::ArrayQueue;

use crate::audio::device::get_device_by_id;
use crate::error::AudioError;

/// Playback stream for one output device.
pub struct PlaybackStream {
    name: String,
    device_id: String,
    sample_rate: u32,
    running: Arc<AtomicBool>,
    queue: Arc<ArrayQueue<Vec<i16>>>,
    dropped: Arc<AtomicUsize>,
    thread_handle: Option<JoinHandle<()>>,
}

impl PlaybackStream {
    /// `queue_chunks` bounds how much audio may be in flight to the
    /// device; pushes beyond that are dropped, not blocked on.
    pub fn new(name: &str, device_id: &str, sample_rate: u32, queue_chunks: usize) -> Self {
        Self {
            name: name.to_string(),
            device_id: device_id.to_string(),
            sample_rate,
            running: Arc::new(AtomicBool::new(false)),
            queue: Arc::new(ArrayQueue::new(queue_chunks.max(1))),
            dropped: Arc::new(AtomicUsize::new(0)),
            thread_handle: None,
        }
    }

    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = get_device_by_id(&self.device_id)?;
        let channels = device.default_output_config()?.channels();
        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let running = self.running.clone();
        let running_for_loop = self.running.clone();
        let queue = self.queue.clone();
        let name = self.name.clone();

        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name(format!("playback-{}", self.name))
            .spawn(move || {
                let cpal_device = device.into_inner();
                let ch = channels as usize;
                // Remainder of the chunk the last callback didn't consume.
                let mut pending: Vec<i16> = Vec::new();
                let mut pos = 0usize;

                let stream = cpal_device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        for frame in data.chunks_exact_mut(ch) {
                            if pos >= pending.len() {
                                match queue.pop() {
                                    Some(next) => {
                                        pending = next;
                                        pos = 0;
                                    }
                                    None => {
                                        for s in frame.iter_mut() {
                                            *s = 0.0;
                                        }
                                        continue;
                                    }
                                }
                            }
                            let v = f32::from(pending[pos]) / f32::from(i16::MAX);
                            pos += 1;
                            for s in frame.iter_mut() {
                                *s = v;
                            }
                        }
                    },
                    move |err| {
                        tracing::warn!("playback stream error: {err}");
                    },
                    None,
                );

                match stream {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            tracing::error!(sink = %name, "failed to start playback stream: {e}");
                            return;
                        }
                        while running_for_loop.load(Ordering::Relaxed) {
                            thread::sleep(Duration::from_millis(10));
                        }
                    }
                    Err(e) => {
                        tracing::error!(sink = %name, "failed to build playback stream: {e}");
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Queue one mono chunk for playback. Never blocks; returns false
    /// when the device queue is full and the chunk was dropped.
    pub fn push(&self, samples: Vec<i16>) -> bool {
        match self.queue.push(samples) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn dropped_chunks(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PlaybackStream {
    fn drop(&mut self) {
        self.stop();
    }
}
