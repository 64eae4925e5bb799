//! Opus stream sink
//!
//! Encodes the general mix and pushes it to a remote peer as
//! length-prefixed Opus packets over TCP. The mixer feeds this sink
//! every tick, silence included, because the encoder carries state
//! across frames. A mixer chunk spans several Opus frames (Opus caps a
//! frame at 60 ms and the tick period may exceed that), so each chunk
//! is split into 10 ms frames before encoding.

use std::time::{Duration, Instant};

use crate::audio::chunk::AudioChunk;
use crate::codec::OpusEncoder;
use crate::error::SinkError;
use crate::net::FeedClient;
use crate::sink::SinkHandle;

pub struct StreamSink {
    handle: SinkHandle<AudioChunk>,
}

impl StreamSink {
    pub fn spawn(
        target: &str,
        sample_rate: u32,
        chunk_samples: usize,
        bitrate: u32,
        retry_interval: Duration,
    ) -> Result<Self, SinkError> {
        let frame_samples = (sample_rate / 100) as usize;
        if chunk_samples % frame_samples != 0 {
            return Err(SinkError::EncoderInit(format!(
                "chunk of {chunk_samples} samples is not a whole number of 10 ms frames"
            )));
        }
        let mut encoder = OpusEncoder::new(sample_rate, frame_samples, bitrate)?;
        let mut client = FeedClient::new(target, retry_interval);
        let mut last_report = Instant::now();

        let handle = SinkHandle::spawn("stream", 8, move |chunk: AudioChunk| {
            for frame in chunk.samples.chunks_exact(frame_samples) {
                match encoder.encode(frame) {
                    Ok(packet) => {
                        client.send(&packet);
                    }
                    Err(e) => {
                        tracing::error!("opus encode failed: {e}");
                        return;
                    }
                }
            }
            if last_report.elapsed() > Duration::from_secs(60) {
                last_report = Instant::now();
                tracing::debug!(
                    frames = encoder.frames_encoded(),
                    bytes = encoder.bytes_produced(),
                    discarded = client.discarded_count(),
                    "stream sink stats"
                );
            }
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
