//! Remote network capture source
//!
//! Listens on a TCP port for one sender at a time and feeds
//! length-prefixed PCM frames into the source buffer. Link loss is not
//! an error the mixer ever sees: the source simply goes silent and the
//! listener waits for the sender's reconnect.

use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use socket2::SockRef;

use crate::audio::buffer::{create_shared_buffer, SharedSourceBuffer};
use crate::audio::chunk::{AudioChunk, AudioFormat};
use crate::config::SourceConfig;
use crate::error::{NetworkError, Result};
use crate::net::frame::FrameReader;
use crate::sources::{AudioSource, SourceDescriptor, SourcePoll};

pub struct NetworkCaptureSource {
    descriptor: SourceDescriptor,
    format: AudioFormat,
    buffer: SharedSourceBuffer,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    local_port: u16,
}

impl NetworkCaptureSource {
    pub fn new(cfg: &SourceConfig, port: u16, format: AudioFormat) -> Result<Self> {
        let buffer = create_shared_buffer(
            format.chunk_bytes(),
            cfg.buffer_capacity_chunks,
            cfg.buffer_cushion_chunks,
        );
        let listener = TcpListener::bind(("0.0.0.0", port))
            .map_err(|e| NetworkError::BindFailed(format!("port {port}: {e}")))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
        let local_port = listener
            .local_addr()
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?
            .port();

        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let thread_buffer = buffer.clone();
        let name = cfg.name.clone();
        let gain = cfg.gain;

        let handle = thread::Builder::new()
            .name(format!("net-{}", cfg.name))
            .spawn(move || {
                accept_loop(&listener, &thread_buffer, &thread_running, &name, gain);
            })
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

        tracing::info!(source = %cfg.name, port = local_port, "remote audio link listening");

        Ok(Self {
            descriptor: SourceDescriptor::from_config(cfg),
            format,
            buffer,
            running,
            thread_handle: Some(handle),
            local_port,
        })
    }

    pub fn buffer(&self) -> &SharedSourceBuffer {
        &self.buffer
    }

    /// The bound listener port; differs from the configured one when
    /// that was 0 (ephemeral).
    pub fn local_port(&self) -> u16 {
        self.local_port
    }
}

impl AudioSource for NetworkCaptureSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    fn poll(&mut self, now: Instant) -> SourcePoll {
        let chunk = self
            .buffer
            .take_chunk()
            .map(|pcm| AudioChunk::from_pcm_bytes(&pcm, self.format, now));
        let wants_transmit = self.descriptor.ptt_triggering && chunk.is_some();
        SourcePoll {
            chunk,
            wants_transmit,
        }
    }

    fn on_mute_changed(&mut self, muted: bool) {
        if muted {
            self.buffer.reset();
        }
    }

    fn discard_tick(&mut self) {
        let _ = self.buffer.take_chunk();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

fn accept_loop(
    listener: &TcpListener,
    buffer: &SharedSourceBuffer,
    running: &AtomicBool,
    name: &str,
    gain: f32,
) {
    while running.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, peer)) => {
                tracing::info!(source = %name, %peer, "sender connected");
                if let Err(e) = serve_connection(stream, buffer, running, gain) {
                    tracing::info!(source = %name, %peer, "sender disconnected: {e}");
                }
                // Sender is responsible for reconnecting; drop any
                // buffered tail so the next session starts clean.
                buffer.reset();
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(100));
            }
            Err(e) => {
                tracing::warn!(source = %name, "accept failed: {e}");
                thread::sleep(Duration::from_millis(500));
            }
        }
    }
}

fn serve_connection(
    stream: TcpStream,
    buffer: &SharedSourceBuffer,
    running: &AtomicBool,
    gain: f32,
) -> std::result::Result<(), NetworkError> {
    stream
        .set_nonblocking(false)
        .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
    // Read timeout bounds how long shutdown can be held up by an idle
    // peer; keepalive reaps half-open links.
    stream
        .set_read_timeout(Some(Duration::from_millis(500)))
        .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
    let keepalive = socket2::TcpKeepalive::new().with_time(Duration::from_secs(30));
    let _ = SockRef::from(&stream).set_tcp_keepalive(&keepalive);
    let _ = stream.set_nodelay(true);

    let mut stream = stream;
    let mut frames = FrameReader::new();
    while running.load(Ordering::Relaxed) {
        match frames.read(&mut stream) {
            Ok(pcm) => {
                let _ = buffer.push(apply_gain(pcm, gain));
            }
            // A read timeout means the peer is idle or delivering
            // slowly; the reader keeps any partial frame, so just
            // retry. This also keeps shutdown responsive.
            Err(NetworkError::Timeout) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Scale 16-bit PCM at ingestion. Unity gain is a pass-through.
fn apply_gain(pcm: Bytes, gain: f32) -> Bytes {
    if (gain - 1.0).abs() < f32::EPSILON {
        return pcm;
    }
    let mut out = Vec::with_capacity(pcm.len());
    for pair in pcm.chunks_exact(2) {
        let s = i16::from_le_bytes([pair[0], pair[1]]);
        let scaled = (f32::from(s) * gain).clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16;
        out.extend_from_slice(&scaled.to_le_bytes());
    }
    Bytes::from(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceKind;
    use crate::net::frame::write_frame;
    use std::io::Write;

    #[test]
    fn unity_gain_is_passthrough() {
        let pcm = Bytes::from(vec![1, 2, 3, 4]);
        assert_eq!(apply_gain(pcm.clone(), 1.0), pcm);
    }

    #[test]
    fn gain_scales_samples() {
        let pcm = Bytes::from(100i16.to_le_bytes().to_vec());
        let out = apply_gain(pcm, 0.5);
        assert_eq!(i16::from_le_bytes([out[0], out[1]]), 50);
    }

    #[test]
    fn slow_frame_delivery_loses_no_bytes() {
        let format = AudioFormat::new(48_000, 480);
        let mut cfg = SourceConfig::new("remote", SourceKind::Network { port: 0 });
        cfg.buffer_cushion_chunks = 0;
        let mut source = NetworkCaptureSource::new(&cfg, 0, format).unwrap();
        let buffer = source.buffer().clone();

        let mut sender =
            TcpStream::connect(("127.0.0.1", source.local_port())).expect("connect to source");
        sender.set_nodelay(true).unwrap();

        let mut payload = Vec::new();
        for _ in 0..format.chunk_samples {
            payload.extend_from_slice(&9i16.to_le_bytes());
        }
        let mut wire = Vec::new();
        write_frame(&mut wire, &payload).unwrap();

        // Pause longer than the 500 ms read timeout after the first two
        // header bytes; the receiver must resume, not resync.
        sender.write_all(&wire[..2]).unwrap();
        sender.flush().unwrap();
        thread::sleep(Duration::from_millis(700));
        sender.write_all(&wire[2..]).unwrap();
        sender.flush().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while buffer.queued_bytes() == 0 {
            assert!(Instant::now() < deadline, "frame never arrived");
            thread::sleep(Duration::from_millis(10));
        }

        let poll = source.poll(Instant::now());
        let chunk = poll.chunk.expect("one full chunk reassembled");
        assert_eq!(chunk.samples[0], 9);
        assert!(chunk.samples.iter().all(|&s| s == 9));
        source.shutdown();
    }
}
