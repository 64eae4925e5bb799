//! Opus encoding for the outgoing stream sink

pub mod encoder;

pub use encoder::OpusEncoder;
