//! Output sink workers
//!
//! Every sink runs on its own thread behind a bounded channel. The
//! mixer's send never blocks: when a sink falls behind, ticks are
//! dropped at the channel boundary and counted, and the mixer carries
//! on. A slow transmitter, stream peer, or monitor device can therefore
//! never stretch the tick period.

pub mod monitor;
pub mod stream;
pub mod transmit;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Sender, TrySendError};

pub use monitor::MonitorSink;
pub use stream::StreamSink;
pub use transmit::{NullPtt, PttSwitch, TransmitSink};

/// Bounded handoff from the mixer tick to one sink worker thread.
pub struct SinkHandle<T> {
    tx: Option<Sender<T>>,
    dropped: Arc<AtomicUsize>,
    thread_handle: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> SinkHandle<T> {
    /// Spawn a worker draining the channel until the handle is stopped.
    pub fn spawn<F>(name: &str, capacity: usize, mut work: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        let (tx, rx) = bounded::<T>(capacity.max(1));
        let thread_handle = thread::Builder::new()
            .name(format!("sink-{name}"))
            .spawn(move || {
                for item in rx.iter() {
                    work(item);
                }
            })
            .ok();

        Self {
            tx: Some(tx),
            dropped: Arc::new(AtomicUsize::new(0)),
            thread_handle,
        }
    }

    /// Hand one item to the worker. Never blocks; a full queue drops the
    /// item and counts it.
    pub fn send(&self, item: T) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        match tx.try_send(item) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn dropped_count(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Close the channel and join the worker, letting it drain what is
    /// already queued.
    pub fn stop(&mut self) {
        self.tx = None;
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl<T> Drop for SinkHandle<T> {
    fn drop(&mut self) {
        self.tx = None;
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn worker_receives_items_in_order() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let worker_seen = seen.clone();
        let mut handle = SinkHandle::spawn("test", 8, move |v: u32| {
            worker_seen.lock().push(v);
        });
        for v in 0..5 {
            assert!(handle.send(v));
        }
        handle.stop();
        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn full_queue_drops_without_blocking() {
        let gate = Arc::new(AtomicUsize::new(0));
        let worker_gate = gate.clone();
        let handle = SinkHandle::spawn("test", 1, move |_: u32| {
            // Park the worker so the queue stays full.
            while worker_gate.load(Ordering::Relaxed) == 0 {
                thread::sleep(Duration::from_millis(1));
            }
        });

        // First item is picked up by the worker, second fills the queue,
        // later sends drop.
        handle.send(1);
        thread::sleep(Duration::from_millis(20));
        handle.send(2);
        let mut dropped = 0;
        for _ in 0..4 {
            if !handle.send(3) {
                dropped += 1;
            }
        }
        assert!(dropped >= 3);
        assert_eq!(handle.dropped_count(), dropped);
        gate.store(1, Ordering::Relaxed);
    }
}
