//! Error types for the mixing gateway

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("cpal error: {0}")]
    CpalError(String),
}

/// Source errors
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Source not found: {0}")]
    NotFound(String),

    #[error("Duplicate source name: {0}")]
    Duplicate(String),

    #[error("Failed to decode file {path}: {reason}")]
    FileDecode { path: String, reason: String },

    #[error("Named pipe error: {0}")]
    Pipe(String),

    #[error("Recovery failed at stage {stage}: {reason}")]
    RecoveryFailed { stage: u8, reason: String },
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("Peer closed the connection")]
    Disconnected,

    #[error("Timeout")]
    Timeout,
}

/// Sink errors
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Transmit hardware error: {0}")]
    Transmit(String),

    #[error("Encoder initialization failed: {0}")]
    EncoderInit(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
