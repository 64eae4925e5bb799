//! Self-correcting fixed-period tick clock
//!
//! Drives the mixer at one chunk-duration per tick. Deadlines are
//! absolute (`next += period`), so the small jitter of each sleep does
//! not accumulate into drift. If processing overruns by more than one
//! whole period the clock resynchronizes to the present instead of
//! firing a burst of catch-up ticks.

use std::thread;
use std::time::{Duration, Instant};

pub struct TickClock {
    period: Duration,
    next: Instant,
    resync_count: u64,
}

impl TickClock {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            next: Instant::now() + period,
            resync_count: 0,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Sleep until the next deadline and return the tick instant.
    pub fn wait(&mut self) -> Instant {
        let now = Instant::now();
        if let Some(remaining) = self.next.checked_duration_since(now) {
            thread::sleep(remaining);
        }

        let tick = Instant::now();
        self.next += self.period;
        if tick.saturating_duration_since(self.next) > self.period {
            // More than one full period behind: skip the backlog.
            self.next = tick + self.period;
            self.resync_count += 1;
            tracing::warn!("tick clock fell behind, resynchronized");
        }
        tick
    }

    pub fn resync_count(&self) -> u64 {
        self.resync_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_do_not_drift() {
        let period = Duration::from_millis(10);
        let mut clock = TickClock::new(period);
        let start = Instant::now();
        for _ in 0..5 {
            clock.wait();
        }
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(50), "elapsed {elapsed:?}");
        // Generous upper bound; only catches runaway spinning.
        assert!(elapsed < Duration::from_millis(500), "elapsed {elapsed:?}");
        assert_eq!(clock.resync_count(), 0);
    }

    #[test]
    fn long_stall_resynchronizes_instead_of_bursting() {
        let period = Duration::from_millis(10);
        let mut clock = TickClock::new(period);
        clock.wait();

        thread::sleep(Duration::from_millis(50));
        clock.wait();
        assert_eq!(clock.resync_count(), 1);

        // Next tick is a full period away, not immediate.
        let before = Instant::now();
        clock.wait();
        assert!(before.elapsed() >= Duration::from_millis(8));
    }
}
