//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod chunk;
pub mod device;
pub mod playback;

pub use buffer::SourceBuffer;
pub use capture::CaptureReader;
pub use chunk::{AudioChunk, AudioFormat};
pub use device::{get_device_by_id, list_devices, AudioDevice};
pub use playback::PlaybackStream;
