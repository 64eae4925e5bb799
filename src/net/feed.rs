//! Framed TCP writer with fixed-interval reconnect
//!
//! Sender side of the length-prefixed PCM links: the feeder binary uses
//! it to push capture audio to the gateway, and the stream sink uses it
//! to push encoded output onward. Connection loss is absorbed here;
//! frames offered while disconnected are discarded and counted, and a
//! reconnect is attempted at a fixed interval.

use std::net::TcpStream;
use std::time::{Duration, Instant};

use crate::net::frame::write_frame;

pub struct FeedClient {
    target: String,
    retry_interval: Duration,
    stream: Option<TcpStream>,
    last_attempt: Option<Instant>,
    discarded: u64,
}

impl FeedClient {
    pub fn new(target: &str, retry_interval: Duration) -> Self {
        Self {
            target: target.to_string(),
            retry_interval,
            stream: None,
            last_attempt: None,
            discarded: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Frames discarded while disconnected.
    pub fn discarded_count(&self) -> u64 {
        self.discarded
    }

    /// Send one frame. Returns false when the frame was discarded
    /// (disconnected, or the write failed and dropped the connection).
    pub fn send(&mut self, payload: &[u8]) -> bool {
        self.ensure_connected();
        let Some(stream) = &mut self.stream else {
            self.discarded += 1;
            return false;
        };
        match write_frame(stream, payload) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(target = %self.target, "link lost: {e}");
                self.stream = None;
                self.discarded += 1;
                false
            }
        }
    }

    pub fn disconnect(&mut self) {
        self.stream = None;
    }

    fn ensure_connected(&mut self) {
        if self.stream.is_some() {
            return;
        }
        if let Some(at) = self.last_attempt {
            if at.elapsed() < self.retry_interval {
                return;
            }
        }
        self.last_attempt = Some(Instant::now());
        match TcpStream::connect(&self.target) {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                tracing::info!(target = %self.target, "link established");
                self.stream = Some(stream);
            }
            Err(e) => {
                tracing::warn!(target = %self.target, "connect failed: {e}, retrying in {:?}", self.retry_interval);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::frame::read_frame;
    use std::net::TcpListener;

    #[test]
    fn discards_while_disconnected() {
        // Port 1 is unassigned and refused on loopback.
        let mut client = FeedClient::new("127.0.0.1:1", Duration::from_secs(60));
        assert!(!client.send(&[0u8; 4]));
        assert!(!client.send(&[0u8; 4]));
        assert_eq!(client.discarded_count(), 2);
        assert!(!client.is_connected());
    }

    #[test]
    fn delivers_frames_once_connected() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut client = FeedClient::new(&addr.to_string(), Duration::from_millis(10));
        assert!(client.send(&[1, 2, 3, 4]));

        let (mut peer, _) = listener.accept().unwrap();
        let frame = read_frame(&mut peer).unwrap();
        assert_eq!(&frame[..], &[1, 2, 3, 4]);
    }
}
