//! Network transport for remote audio links

pub mod feed;
pub mod frame;

pub use feed::FeedClient;
pub use frame::{read_frame, write_frame, FrameReader};
