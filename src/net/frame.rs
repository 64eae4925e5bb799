//! Length-prefixed PCM framing
//!
//! Wire format for remote audio links: a 4-byte big-endian length
//! followed by that many bytes of raw PCM at the configured rate/format.
//! No other framing. One TCP connection per link; the sender initiates,
//! the receiver listens, and reconnection on drop is the sender's
//! responsibility.
//!
//! Receivers on sockets with a read timeout must use [`FrameReader`]:
//! it keeps partially received bytes across timeouts, so a frame whose
//! delivery pauses mid-stream is resumed instead of lost.

use std::io::{Read, Write};

use bytes::Bytes;

use crate::constants::MAX_FRAME_BYTES;
use crate::error::NetworkError;

const HEADER_LEN: usize = 4;

/// Incremental frame reader.
///
/// A `Timeout` return keeps the header/payload bytes already consumed;
/// the next call resumes where the stream paused.
pub struct FrameReader {
    header: [u8; HEADER_LEN],
    header_filled: usize,
    payload: Vec<u8>,
    payload_filled: usize,
    in_payload: bool,
}

impl FrameReader {
    pub fn new() -> Self {
        Self {
            header: [0; HEADER_LEN],
            header_filled: 0,
            payload: Vec::new(),
            payload_filled: 0,
            in_payload: false,
        }
    }

    /// Read the next frame, resuming any partially received one.
    pub fn read<R: Read>(&mut self, reader: &mut R) -> Result<Bytes, NetworkError> {
        if !self.in_payload {
            while self.header_filled < HEADER_LEN {
                let filled = self.header_filled;
                self.header_filled += read_some(reader, &mut self.header[filled..])?;
            }
            self.header_filled = 0;

            let len = u32::from_be_bytes(self.header) as usize;
            if len > MAX_FRAME_BYTES {
                return Err(NetworkError::FrameTooLarge(len));
            }
            if len == 0 {
                return Ok(Bytes::new());
            }
            self.payload = vec![0u8; len];
            self.payload_filled = 0;
            self.in_payload = true;
        }

        while self.payload_filled < self.payload.len() {
            let filled = self.payload_filled;
            self.payload_filled += read_some(reader, &mut self.payload[filled..])?;
        }
        self.in_payload = false;
        Ok(Bytes::from(std::mem::take(&mut self.payload)))
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

/// Read one frame from a stream with no read timeout. Links that can
/// time out mid-frame should hold a [`FrameReader`] across calls.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Bytes, NetworkError> {
    FrameReader::new().read(reader)
}

/// Write one length-prefixed frame.
pub fn write_frame<W: Write>(writer: &mut W, pcm: &[u8]) -> Result<(), NetworkError> {
    if pcm.len() > MAX_FRAME_BYTES {
        return Err(NetworkError::FrameTooLarge(pcm.len()));
    }
    let header = (pcm.len() as u32).to_be_bytes();
    writer
        .write_all(&header)
        .and_then(|()| writer.write_all(pcm))
        .map_err(|e| NetworkError::SendFailed(e.to_string()))
}

fn read_some<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, NetworkError> {
    loop {
        match reader.read(buf) {
            Ok(0) => return Err(NetworkError::Disconnected),
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                ) =>
            {
                return Err(NetworkError::Timeout)
            }
            Err(e) => return Err(NetworkError::ConnectionFailed(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::Cursor;

    #[test]
    fn round_trip() {
        let mut wire = Vec::new();
        write_frame(&mut wire, &[1, 2, 3, 4]).unwrap();
        assert_eq!(&wire[..4], &4u32.to_be_bytes());

        let mut cursor = Cursor::new(wire);
        let frame = read_frame(&mut cursor).unwrap();
        assert_eq!(&frame[..], &[1, 2, 3, 4]);
    }

    #[test]
    fn back_to_back_frames_stay_separate() {
        // Two 200 ms chunks at 48 kHz mono 16-bit.
        let payload = vec![0xAB; 19_200];
        let mut wire = Vec::new();
        write_frame(&mut wire, &payload).unwrap();
        write_frame(&mut wire, &payload).unwrap();

        let mut cursor = Cursor::new(wire);
        let a = read_frame(&mut cursor).unwrap();
        let b = read_frame(&mut cursor).unwrap();
        assert_eq!(a.len(), 19_200);
        assert_eq!(b.len(), 19_200);
        assert!(read_frame(&mut cursor).is_err());
    }

    #[test]
    fn oversized_frame_rejected() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&(MAX_FRAME_BYTES as u32 + 1).to_be_bytes());
        let mut cursor = Cursor::new(wire);
        assert!(matches!(
            read_frame(&mut cursor),
            Err(NetworkError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn truncated_payload_is_disconnect() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&8u32.to_be_bytes());
        wire.extend_from_slice(&[0; 3]);
        let mut cursor = Cursor::new(wire);
        assert!(matches!(
            read_frame(&mut cursor),
            Err(NetworkError::Disconnected)
        ));
    }

    enum Step {
        Data(Vec<u8>),
        Stall,
    }

    /// Serves scripted segments; a `Stall` behaves like a socket read
    /// timeout.
    struct SlowWire {
        steps: VecDeque<Step>,
    }

    impl Read for SlowWire {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.steps.pop_front() {
                Some(Step::Stall) => Err(std::io::ErrorKind::WouldBlock.into()),
                Some(Step::Data(mut data)) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    if n < data.len() {
                        self.steps.push_front(Step::Data(data.split_off(n)));
                    }
                    Ok(n)
                }
                None => Ok(0),
            }
        }
    }

    #[test]
    fn partial_frame_survives_read_timeouts() {
        // One 1920-byte frame delivered with pauses mid-header and
        // mid-payload, as a slow sender would.
        let payload = vec![0x11u8; 1920];
        let mut wire = Vec::new();
        write_frame(&mut wire, &payload).unwrap();

        let mut steps = VecDeque::new();
        steps.push_back(Step::Data(wire[..2].to_vec()));
        steps.push_back(Step::Stall);
        steps.push_back(Step::Data(wire[2..104].to_vec()));
        steps.push_back(Step::Stall);
        steps.push_back(Step::Data(wire[104..].to_vec()));
        let mut slow = SlowWire { steps };

        let mut frames = FrameReader::new();
        let frame = loop {
            match frames.read(&mut slow) {
                Ok(frame) => break frame,
                Err(NetworkError::Timeout) => continue,
                Err(e) => panic!("unexpected error: {e}"),
            }
        };
        assert_eq!(frame.len(), 1920);
        assert!(frame.iter().all(|&b| b == 0x11));
    }
}
