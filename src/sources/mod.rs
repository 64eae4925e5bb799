//! Audio source abstraction
//!
//! Every input to the mixer implements [`AudioSource`]: one chunk per
//! tick plus a transmit demand. Variants differ only in where bytes
//! originate; all of them normalize to the engine's mono chunk shape at
//! ingestion, so the mixer never sees format differences.

pub mod file;
pub mod hardware;
pub mod network;
pub mod pipe;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub use file::FileSource;
pub use hardware::HardwareCaptureSource;
pub use network::NetworkCaptureSource;
pub use pipe::NamedPipeSource;

use crate::audio::chunk::AudioChunk;
use crate::config::SourceConfig;

/// Result of polling a source for one tick.
#[derive(Debug)]
pub struct SourcePoll {
    /// One chunk of audio, or `None` when nothing is available. Absence
    /// of data is a normal outcome, never an error.
    pub chunk: Option<AudioChunk>,
    /// True while this source demands the transmitter be keyed.
    pub wants_transmit: bool,
}

impl SourcePoll {
    pub fn empty() -> Self {
        Self {
            chunk: None,
            wants_transmit: false,
        }
    }
}

/// Runtime-mutable source state. Mute/enable are written only by the
/// control seam and read by the mixer tick; the level is written by the
/// mixer's meter every tick and read by status reporting.
pub struct SourceControl {
    enabled: AtomicBool,
    muted: AtomicBool,
    /// Smoothed level in dBFS, stored as f32 bits
    level_bits: AtomicU32,
}

impl SourceControl {
    pub fn new(enabled: bool, muted: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            muted: AtomicBool::new(muted),
            level_bits: AtomicU32::new((-100.0f32).to_bits()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn level_dbfs(&self) -> f32 {
        f32::from_bits(self.level_bits.load(Ordering::Relaxed))
    }

    pub fn set_level_dbfs(&self, level: f32) {
        self.level_bits.store(level.to_bits(), Ordering::Relaxed);
    }
}

/// Static identity and policy of a source, created at startup from
/// configuration and never destroyed except at shutdown.
pub struct SourceDescriptor {
    pub name: String,
    pub priority: i32,
    pub duck_eligible: bool,
    pub ptt_triggering: bool,
    pub direct_mix: bool,
    pub mix_ratio: f32,
    pub control: Arc<SourceControl>,
}

impl SourceDescriptor {
    pub fn from_config(cfg: &SourceConfig) -> Self {
        Self {
            name: cfg.name.clone(),
            priority: cfg.priority,
            duck_eligible: cfg.duck_eligible,
            ptt_triggering: cfg.ptt_triggering,
            direct_mix: cfg.direct_mix,
            mix_ratio: cfg.mix_ratio,
            control: Arc::new(SourceControl::new(cfg.enabled, cfg.muted)),
        }
    }
}

/// Capability interface the mixer consumes.
pub trait AudioSource: Send {
    fn descriptor(&self) -> &SourceDescriptor;

    /// Pull one tick's worth of audio. Must never block longer than a
    /// small bounded timeout; underlying I/O failures surface as `None`,
    /// not as errors.
    fn poll(&mut self, now: Instant) -> SourcePoll;

    /// Called when the control seam mutes/unmutes the source, so buffered
    /// state can be discarded (no stale burst on resume).
    fn on_mute_changed(&mut self, _muted: bool) {}

    /// Called instead of `poll` while the source is muted or disabled.
    /// Buffered sources keep draining so resume plays live audio, not
    /// the backlog captured during the pause.
    fn discard_tick(&mut self) {}

    /// Stop reader threads and close underlying devices.
    fn shutdown(&mut self);
}

/// Closed set of source implementations, dispatched through one enum so
/// the mixer owns them by value.
pub enum Source {
    File(FileSource),
    Hardware(HardwareCaptureSource),
    Network(NetworkCaptureSource),
    Pipe(NamedPipeSource),
}

impl AudioSource for Source {
    fn descriptor(&self) -> &SourceDescriptor {
        match self {
            Source::File(s) => s.descriptor(),
            Source::Hardware(s) => s.descriptor(),
            Source::Network(s) => s.descriptor(),
            Source::Pipe(s) => s.descriptor(),
        }
    }

    fn poll(&mut self, now: Instant) -> SourcePoll {
        match self {
            Source::File(s) => s.poll(now),
            Source::Hardware(s) => s.poll(now),
            Source::Network(s) => s.poll(now),
            Source::Pipe(s) => s.poll(now),
        }
    }

    fn on_mute_changed(&mut self, muted: bool) {
        match self {
            Source::File(s) => s.on_mute_changed(muted),
            Source::Hardware(s) => s.on_mute_changed(muted),
            Source::Network(s) => s.on_mute_changed(muted),
            Source::Pipe(s) => s.on_mute_changed(muted),
        }
    }

    fn discard_tick(&mut self) {
        match self {
            Source::File(s) => s.discard_tick(),
            Source::Hardware(s) => s.discard_tick(),
            Source::Network(s) => s.discard_tick(),
            Source::Pipe(s) => s.discard_tick(),
        }
    }

    fn shutdown(&mut self) {
        match self {
            Source::File(s) => s.shutdown(),
            Source::Hardware(s) => s.shutdown(),
            Source::Network(s) => s.shutdown(),
            Source::Pipe(s) => s.shutdown(),
        }
    }
}
