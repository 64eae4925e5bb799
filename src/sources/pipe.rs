//! Named pipe (FIFO) capture source
//!
//! Raw PCM bytes from a filesystem FIFO, typically fed by an external
//! demodulator process. The pipe is opened read-write so the open never
//! blocks waiting for a writer and the FIFO stays usable across writer
//! restarts.

use std::fs::{File, OpenOptions};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::audio::buffer::{create_shared_buffer, SharedSourceBuffer};
use crate::audio::chunk::{AudioChunk, AudioFormat};
use crate::config::SourceConfig;
use crate::error::{Result, SourceError};
use crate::sources::{AudioSource, SourceDescriptor, SourcePoll};

pub struct NamedPipeSource {
    descriptor: SourceDescriptor,
    format: AudioFormat,
    buffer: SharedSourceBuffer,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl NamedPipeSource {
    pub fn new(cfg: &SourceConfig, path: &Path, format: AudioFormat) -> Result<Self> {
        let buffer = create_shared_buffer(
            format.chunk_bytes(),
            cfg.buffer_capacity_chunks,
            cfg.buffer_cushion_chunks,
        );

        let file = open_pipe(path).map_err(|e| SourceError::Pipe(format!(
            "{}: {e}",
            path.display()
        )))?;

        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let thread_buffer = buffer.clone();
        let name = cfg.name.clone();
        let read_len = format.chunk_bytes();
        let pipe_path = PathBuf::from(path);

        let handle = thread::Builder::new()
            .name(format!("pipe-{}", cfg.name))
            .spawn(move || {
                read_loop(file, &pipe_path, &thread_buffer, &thread_running, &name, read_len);
            })
            .map_err(|e| SourceError::Pipe(e.to_string()))?;

        Ok(Self {
            descriptor: SourceDescriptor::from_config(cfg),
            format,
            buffer,
            running,
            thread_handle: Some(handle),
        })
    }
}

impl AudioSource for NamedPipeSource {
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

#[cfg(unix)]
fn open_pipe(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    // O_NONBLOCK keeps reads from parking the thread forever, which would
    // make shutdown unjoinable.
    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
}

#[cfg(not(unix))]
fn open_pipe(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().read(true).open(path)
}

fn read_loop(
    mut file: File,
    path: &Path,
    buffer: &SharedSourceBuffer,
    running: &AtomicBool,
    name: &str,
    read_len: usize,
) {
    let mut scratch = vec![0u8; read_len];
    while running.load(Ordering::Relaxed) {
        match file.read(&mut scratch) {
            Ok(0) => thread::sleep(Duration::from_millis(10)),
            Ok(n) => {
                let _ = buffer.push(Bytes::copy_from_slice(&scratch[..n]));
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(10));
            }
            Err(e) => {
                tracing::warn!(source = %name, "pipe read failed: {e}, reopening");
                thread::sleep(Duration::from_millis(500));
                match open_pipe(path) {
                    Ok(f) => file = f,
                    Err(e) => {
                        tracing::warn!(source = %name, "pipe reopen failed: {e}");
                        thread::sleep(Duration::from_secs(1));
                    }
                }
            }
        }
    }
}
