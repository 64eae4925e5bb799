//! Buffered capture between reader threads and the mixer tick
//!
//! Each hardware/network-backed source owns one [`SourceBuffer`]: a
//! bounded blob ring written by the source's reader thread plus a
//! consumer-side sub-buffer the mixer slices fixed chunks from. The ring
//! absorbs delivery jitter (readers hand over whole device periods, not
//! chunk-sized slices); the sub-buffer is drained eagerly every tick so
//! the pre-buffer cushion can actually accumulate.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use crossbeam::queue::ArrayQueue;
use parking_lot::Mutex;

/// Consumer-side slicing state, guarded by the buffer's only lock.
struct SubBuffer {
    data: BytesMut,
    /// While set, the buffer withholds chunks until the cushion threshold
    /// is met. Set on creation, on mute, and whenever the sub-buffer
    /// underflows to empty.
    pre_buffering: bool,
}

/// Bounded, thread-safe per-source byte buffer with a pre-buffering gate.
pub struct SourceBuffer {
    /// Reader → consumer handoff of raw PCM blobs
    blobs: ArrayQueue<Bytes>,
    sub: Mutex<SubBuffer>,
    chunk_bytes: usize,
    cushion_bytes: usize,
    /// Milliseconds since `created_at` of the last successful reader fill
    last_fill_ms: AtomicU64,
    created_at: Instant,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl SourceBuffer {
    /// Create a buffer holding up to `capacity_chunks` chunk-periods of
    /// audio, gated behind a `cushion_chunks` pre-buffer threshold.
    pub fn new(chunk_bytes: usize, capacity_chunks: usize, cushion_chunks: usize) -> Self {
        Self {
            blobs: ArrayQueue::new(capacity_chunks.max(1)),
            sub: Mutex::new(SubBuffer {
                data: BytesMut::with_capacity(chunk_bytes * (cushion_chunks + 2)),
                pre_buffering: true,
            }),
            chunk_bytes,
            cushion_bytes: chunk_bytes * cushion_chunks,
            last_fill_ms: AtomicU64::new(0),
            created_at: Instant::now(),
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Reader side: append one blob of raw PCM.
    ///
    /// Never blocks. Returns false when the ring is full (the blob is
    /// dropped and counted as an overflow).
    pub fn push(&self, blob: Bytes) -> bool {
        if blob.is_empty() {
            return true;
        }
        self.stamp_fill();
        match self.blobs.push(blob) {
            Ok(()) => true,
            Err(_) => {
                self.overflow_count.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Consumer side: drain everything queued, then slice exactly one
    /// chunk's worth of bytes.
    ///
    /// Draining is unconditional — if it only happened when the
    /// sub-buffer ran low, each tick would extract exactly what it needs
    /// and the cushion could never accumulate. Returns `None` while
    /// pre-buffering or on underrun; underrun re-arms the gate.
    pub fn take_chunk(&self) -> Option<Bytes> {
        let mut sub = self.sub.lock();
        while let Some(blob) = self.blobs.pop() {
            sub.data.extend_from_slice(&blob);
        }

        if sub.pre_buffering {
            if sub.data.len() >= self.cushion_bytes {
                sub.pre_buffering = false;
            } else {
                return None;
            }
        }

        if sub.data.len() >= self.chunk_bytes {
            Some(sub.data.split_to(self.chunk_bytes).freeze())
        } else {
            // Underflowed to empty: withhold output until the cushion
            // rebuilds, otherwise upstream jitter turns into audible gaps.
            sub.pre_buffering = true;
            self.underrun_count.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Discard all buffered data and re-arm the pre-buffering gate.
    /// Called on mute so a resume never starts with a stale burst.
    pub fn reset(&self) {
        let mut sub = self.sub.lock();
        while self.blobs.pop().is_some() {}
        sub.data.clear();
        sub.pre_buffering = true;
    }

    /// Record a successful reader fill without queueing data (used by
    /// readers that got a healthy read but produced silence downstream).
    pub fn stamp_fill(&self) {
        let ms = self.created_at.elapsed().as_millis() as u64;
        self.last_fill_ms.store(ms, Ordering::Relaxed);
    }

    /// Time since the reader last delivered data. The watchdog treats a
    /// large value as a staleness condition, not a buffer error.
    pub fn staleness(&self) -> Duration {
        let last = Duration::from_millis(self.last_fill_ms.load(Ordering::Relaxed));
        self.created_at.elapsed().saturating_sub(last)
    }

    pub fn is_pre_buffering(&self) -> bool {
        self.sub.lock().pre_buffering
    }

    /// Approximate bytes queued across the ring and sub-buffer (ring
    /// blobs are estimated at one chunk each).
    pub fn queued_bytes(&self) -> usize {
        self.sub.lock().data.len() + self.blobs.len() * self.chunk_bytes
    }

    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }

    pub fn chunk_bytes(&self) -> usize {
        self.chunk_bytes
    }
}

/// Thread-safe handle to a source buffer
pub type SharedSourceBuffer = Arc<SourceBuffer>;

/// Create a new shared source buffer
pub fn create_shared_buffer(
    chunk_bytes: usize,
    capacity_chunks: usize,
    cushion_chunks: usize,
) -> SharedSourceBuffer {
    Arc::new(SourceBuffer::new(chunk_bytes, capacity_chunks, cushion_chunks))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHUNK: usize = 8;

    fn blob(len: usize, fill: u8) -> Bytes {
        Bytes::from(vec![fill; len])
    }

    #[test]
    fn gate_holds_until_cushion_met() {
        let buf = SourceBuffer::new(CHUNK, 16, 2);

        // One chunk queued: below the two-chunk cushion, nothing yielded
        // even though a full chunk is present.
        buf.push(blob(CHUNK, 1));
        assert!(buf.take_chunk().is_none());
        assert!(buf.is_pre_buffering());

        // Cushion met: normal slicing resumes.
        buf.push(blob(CHUNK, 2));
        let chunk = buf.take_chunk().expect("cushion met");
        assert_eq!(chunk.len(), CHUNK);
        assert!(!buf.is_pre_buffering());
    }

    #[test]
    fn underrun_re_arms_gate() {
        let buf = SourceBuffer::new(CHUNK, 16, 2);
        buf.push(blob(CHUNK * 2, 1));
        assert!(buf.take_chunk().is_some());
        assert!(buf.take_chunk().is_some());

        // Empty now: underrun, gate re-armed.
        assert!(buf.take_chunk().is_none());
        assert_eq!(buf.underrun_count(), 1);
        assert!(buf.is_pre_buffering());

        // A single chunk is again not enough to reopen the gate.
        buf.push(blob(CHUNK, 2));
        assert!(buf.take_chunk().is_none());
        buf.push(blob(CHUNK, 3));
        assert!(buf.take_chunk().is_some());
    }

    #[test]
    fn eager_drain_accumulates_cushion() {
        let buf = SourceBuffer::new(CHUNK, 16, 2);
        // Burst of 4 chunks in one blob, then steady one-chunk ticks.
        buf.push(blob(CHUNK * 4, 1));
        for _ in 0..4 {
            assert!(buf.take_chunk().is_some());
        }
        assert!(buf.take_chunk().is_none());
    }

    #[test]
    fn slices_across_blob_boundaries() {
        let buf = SourceBuffer::new(CHUNK, 16, 1);
        buf.push(blob(CHUNK / 2, 1));
        buf.push(blob(CHUNK / 2, 2));
        let chunk = buf.take_chunk().expect("two half blobs make a chunk");
        assert_eq!(&chunk[..CHUNK / 2], &[1; CHUNK / 2]);
        assert_eq!(&chunk[CHUNK / 2..], &[2; CHUNK / 2]);
    }

    #[test]
    fn overflow_drops_newest() {
        let buf = SourceBuffer::new(CHUNK, 2, 1);
        assert!(buf.push(blob(CHUNK, 1)));
        assert!(buf.push(blob(CHUNK, 2)));
        assert!(!buf.push(blob(CHUNK, 3)));
        assert_eq!(buf.overflow_count(), 1);
    }

    #[test]
    fn reset_discards_and_re_arms() {
        let buf = SourceBuffer::new(CHUNK, 16, 1);
        buf.push(blob(CHUNK * 3, 1));
        assert!(buf.take_chunk().is_some());
        buf.reset();
        assert!(buf.is_pre_buffering());
        assert_eq!(buf.queued_bytes(), 0);
        assert!(buf.take_chunk().is_none());
    }

    #[test]
    fn staleness_tracks_fills() {
        let buf = SourceBuffer::new(CHUNK, 16, 1);
        buf.push(blob(CHUNK, 1));
        assert!(buf.staleness() < Duration::from_millis(100));
    }
}
