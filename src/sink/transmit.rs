//! Transmit sink
//!
//! Plays the outgoing signal on the transmit audio device and drives
//! the push-to-talk switch. Keying follows the mixer's per-tick demand
//! with a release delay: the transmitter stays keyed for a short while
//! after the last demanding tick so word gaps do not chop the carrier.

use std::time::{Duration, Instant};

use crate::audio::chunk::AudioChunk;
use crate::audio::playback::PlaybackStream;
use crate::error::SinkError;
use crate::sink::SinkHandle;

/// Push-to-talk control line.
///
/// Implementations must tolerate repeated key-down calls (idempotent);
/// the sink re-asserts rather than tracking the hardware's own state.
pub trait PttSwitch: Send {
    fn set_transmit(&mut self, on: bool) -> Result<(), SinkError>;
}

/// PTT stand-in for setups where the transmitter is VOX-keyed or keying
/// is handled out-of-band. Logs transitions so the demand signal stays
/// observable.
pub struct NullPtt {
    keyed: bool,
}

impl NullPtt {
    pub fn new() -> Self {
        Self { keyed: false }
    }
}

impl Default for NullPtt {
    fn default() -> Self {
        Self::new()
    }
}

impl PttSwitch for NullPtt {
    fn set_transmit(&mut self, on: bool) -> Result<(), SinkError> {
        if on != self.keyed {
            self.keyed = on;
            tracing::debug!(keyed = on, "ptt transition");
        }
        Ok(())
    }
}

/// One tick's worth of input to the transmit worker.
pub struct TransmitItem {
    pub chunk: AudioChunk,
    pub demand: bool,
    pub now: Instant,
}

pub struct TransmitSink {
    handle: SinkHandle<TransmitItem>,
}

impl TransmitSink {
    /// Open the transmit device and start the worker. A device failure
    /// here is reported to the caller, who degrades rather than aborts.
    pub fn spawn(
        device_id: &str,
        sample_rate: u32,
        ptt: Box<dyn PttSwitch>,
        release_delay: Duration,
    ) -> Result<Self, SinkError> {
        let mut playback = PlaybackStream::new("transmit", device_id, sample_rate, 8);
        playback
            .start()
            .map_err(|e| SinkError::Transmit(e.to_string()))?;

        let mut worker = TransmitWorker {
            playback,
            ptt,
            state: PttState::new(release_delay),
        };
        let handle = SinkHandle::spawn("transmit", 8, move |item: TransmitItem| {
            worker.handle(item);
        });

        Ok(Self { handle })
    }

    pub fn send(&self, chunk: AudioChunk, demand: bool, now: Instant) -> bool {
        self.handle.send(TransmitItem { chunk, demand, now })
    }

    pub fn dropped_count(&self) -> usize {
        self.handle.dropped_count()
    }

    pub fn stop(&mut self) {
        self.handle.stop();
    }
}

struct TransmitWorker {
    playback: PlaybackStream,
    ptt: Box<dyn PttSwitch>,
    state: PttState,
}

impl TransmitWorker {
    fn handle(&mut self, item: TransmitItem) {
        if let Some(key) = self.state.update(item.demand, item.now) {
            if let Err(e) = self.ptt.set_transmit(key) {
                // Keying failure leaves the demand honored upstream but
                // with no physical effect.
                tracing::error!("ptt switch failed: {e}");
                self.state.mark_unkeyed();
            }
        }
        self.playback.push(item.chunk.samples);
    }
}

impl Drop for TransmitWorker {
    fn drop(&mut self) {
        // Shutdown mid-transmission must not leave the carrier keyed.
        if let Err(e) = self.ptt.set_transmit(false) {
            tracing::error!("ptt unkey on shutdown failed: {e}");
        }
    }
}

/// Release-delay state machine, separated from the worker for testing.
struct PttState {
    release_delay: Duration,
    keyed: bool,
    last_demand: Option<Instant>,
}

impl PttState {
    fn new(release_delay: Duration) -> Self {
        Self {
            release_delay,
            keyed: false,
            last_demand: None,
        }
    }

    /// Returns the new key state when it should change.
    fn update(&mut self, demand: bool, now: Instant) -> Option<bool> {
        if demand {
            self.last_demand = Some(now);
            if !self.keyed {
                self.keyed = true;
                return Some(true);
            }
            return None;
        }
        if self.keyed {
            let expired = self
                .last_demand
                .is_none_or(|at| now.duration_since(at) >= self.release_delay);
            if expired {
                self.keyed = false;
                return Some(false);
            }
        }
        None
    }

    fn mark_unkeyed(&mut self) {
        self.keyed = false;
    }
}
