//! # Radiomix
//!
//! Real-time multi-source audio mixing gateway.
//!
//! Merges several concurrently-arriving audio streams (radio receiver,
//! SDR receivers, remote network feeds, file announcements) into one
//! outgoing signal, while independently deciding which inputs key a
//! push-to-talk transmitter.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           GATEWAY                                │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐  ┌──────────┐          │
//! │  │ Radio RX │  │ TCP feed │  │ FIFO feed│  │ WAV queue│          │
//! │  │ (cpal)   │  │ (framed) │  │ (raw PCM)│  │ (hound)  │          │
//! │  └────┬─────┘  └────┬─────┘  └────┬─────┘  └────┬─────┘          │
//! │       │ reader      │ reader      │ reader      │                │
//! │       ▼ thread      ▼ thread      ▼ thread      ▼                │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐       │                │
//! │  │ Source   │  │ Source   │  │ Source   │       │                │
//! │  │ Buffer   │  │ Buffer   │  │ Buffer   │       │                │
//! │  └────┬─────┘  └────┬─────┘  └────┬─────┘       │                │
//! │       └─────────────┴──────┬──────┴─────────────┘                │
//! │                            ▼  fixed 50 ms tick                   │
//! │      ┌─────────────────────────────────────────────┐             │
//! │      │ Mixer: SignalDetector → DuckArbiter → sum   │◄── Watchdog │
//! │      └───────────────────┬─────────────────────────┘             │
//! │          ┌───────────────┼───────────────┐                       │
//! │          ▼               ▼               ▼                       │
//! │   ┌────────────┐  ┌────────────┐  ┌────────────┐                 │
//! │   │ Transmit   │  │ Opus       │  │ Local      │                 │
//! │   │ sink + PTT │  │ stream     │  │ monitor    │                 │
//! │   └────────────┘  └────────────┘  └────────────┘                 │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every sink worker is fed through its own bounded queue so a slow sink
//! can never stall the mixer tick.

pub mod audio;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod net;
pub mod sink;
pub mod sources;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for all audio processing
    pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

    /// Default chunk length in samples (50 ms at 48 kHz)
    pub const DEFAULT_CHUNK_SAMPLES: usize = 2400;

    /// Bytes per sample (mono 16-bit signed PCM)
    pub const BYTES_PER_SAMPLE: usize = 2;

    /// Instant signal-presence threshold in dBFS (engine-internal,
    /// distinct from any user-facing squelch setting)
    pub const DEFAULT_INSTANT_THRESHOLD_DBFS: f32 = -50.0;

    /// Default TCP port for the remote mix-input link
    pub const DEFAULT_REMOTE_PORT: u16 = 9600;

    /// Largest accepted length-prefixed frame (1 s of PCM at 48 kHz mono)
    pub const MAX_FRAME_BYTES: usize = 96_000;

    /// Interval between feeder reconnection attempts, in seconds
    pub const RECONNECT_INTERVAL_SECS: u64 = 5;

    /// Default source buffer capacity in chunks (2 s at 50 ms chunks)
    pub const DEFAULT_BUFFER_CAPACITY_CHUNKS: usize = 40;

    /// Default pre-buffer cushion in chunks
    pub const DEFAULT_BUFFER_CUSHION_CHUNKS: usize = 2;
}
