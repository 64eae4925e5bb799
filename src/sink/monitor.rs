//! Local monitor sink
//!
//! Plays the general mix on a local output device so an operator can
//! hear what the gateway is sending. Purely observational: skipped
//! ticks under backpressure are counted and otherwise ignored.

use crate::audio::chunk::AudioChunk;
use crate::audio::playback::PlaybackStream;
use crate::error::SinkError;
use crate::sink::SinkHandle;

pub struct MonitorSink {
    handle: SinkHandle<AudioChunk>,
}

impl MonitorSink {
    pub fn spawn(device_id: &str, sample_rate: u32) -> Result<Self, SinkError> {
        let mut playback = PlaybackStream::new("monitor", device_id, sample_rate, 4);
        playback
            .start()
            .map_err(|e| SinkError::Transmit(e.to_string()))?;

        let handle = SinkHandle::spawn("monitor", 4, move |chunk: AudioChunk| {
            playback.push(chunk.samples);
        });

        Ok(Self { handle })
    }

    pub fn send(&self, chunk: AudioChunk) -> bool {
        self.handle.send(chunk)
    }

    pub fn dropped_count(&self) -> usize {
        self.handle.dropped_count()
    }

    pub fn stop(&mut self) {
        self.handle.stop();
    }
}
