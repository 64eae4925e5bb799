//! Signal presence detection
//!
//! Two layers per source. The [`LevelMeter`] smooths per-chunk RMS into
//! a display/telemetry level with fast attack and slow decay. The
//! [`SignalDetector`] turns the instant per-chunk level into a debounced
//! active/idle flag: activation requires the level to stay at or above
//! the threshold continuously for the attack time (one quiet chunk resets
//! the clock), and deactivation requires it to stay below for the
//! release time plus a fixed post-release hold that bridges bursty
//! upstream delivery.

use std::time::{Duration, Instant};

/// Smoothed level for telemetry. Rises instantly, decays as a weighted
/// average so short peaks stay visible on a status line.
pub struct LevelMeter {
    level_dbfs: f32,
}

impl LevelMeter {
    pub fn new() -> Self {
        Self { level_dbfs: -100.0 }
    }

    pub fn update(&mut self, current_dbfs: f32) -> f32 {
        if current_dbfs > self.level_dbfs {
            self.level_dbfs = current_dbfs;
        } else {
            self.level_dbfs = self.level_dbfs * 0.7 + current_dbfs * 0.3;
        }
        self.level_dbfs
    }

    pub fn level_dbfs(&self) -> f32 {
        self.level_dbfs
    }
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new()
    }
}

/// Debounced signal-presence hysteresis for one source.
pub struct SignalDetector {
    threshold_dbfs: f32,
    attack: Duration,
    release: Duration,
    hold: Duration,
    active: bool,
    above_since: Option<Instant>,
    below_since: Option<Instant>,
    hold_until: Option<Instant>,
}

impl SignalDetector {
    pub fn new(threshold_dbfs: f32, attack: Duration, release: Duration, hold: Duration) -> Self {
        Self {
            threshold_dbfs,
            attack,
            release,
            hold,
            active: false,
            above_since: None,
            below_since: None,
            hold_until: None,
        }
    }

    /// Feed one tick's instant level. A tick with no chunk should be fed
    /// the silence floor so absence of data counts toward release.
    pub fn update(&mut self, level_dbfs: f32, now: Instant) -> bool {
        if level_dbfs >= self.threshold_dbfs {
            self.below_since = None;
            self.hold_until = None;
            if !self.active {
                let since = *self.above_since.get_or_insert(now);
                if now.duration_since(since) >= self.attack {
                    self.active = true;
                    self.above_since = None;
                }
            }
        } else {
            // Any sub-threshold chunk restarts the attack debounce.
            self.above_since = None;
            if self.active {
                if let Some(until) = self.hold_until {
                    if now >= until {
                        self.active = false;
                        self.hold_until = None;
                        self.below_since = None;
                    }
                } else {
                    let since = *self.below_since.get_or_insert(now);
                    if now.duration_since(since) >= self.release {
                        self.hold_until = Some(now + self.hold);
                    }
                }
            }
        }
        self.active
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Drop all debounce state (mute, watchdog restart).
    pub fn reset(&mut self) {
        self.active = false;
        self.above_since = None;
        self.below_since = None;
        self.hold_until = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const THRESHOLD: f32 = -50.0;
    const ATTACK: Duration = Duration::from_millis(150);
    const RELEASE: Duration = Duration::from_secs(3);
    const HOLD: Duration = Duration::from_secs(1);
    const TICK: Duration = Duration::from_millis(50);

    fn detector() -> SignalDetector {
        SignalDetector::new(THRESHOLD, ATTACK, RELEASE, HOLD)
    }

    /// Run `n` ticks at the given level, returning the final flag.
    fn run_ticks(d: &mut SignalDetector, start: Instant, n: u32, level: f32) -> (bool, Instant) {
        let mut now = start;
        let mut flag = d.is_active();
        for _ in 0..n {
            flag = d.update(level, now);
            now += TICK;
        }
        (flag, now)
    }

    #[test]
    fn activates_after_continuous_attack_time() {
        let mut d = detector();
        let t0 = Instant::now();
        // 150 ms attack at 50 ms ticks: ticks at 0, 50, 100 stay idle,
        // the tick at 150 ms flips active.
        let (flag, now) = run_ticks(&mut d, t0, 3, -30.0);
        assert!(!flag);
        assert!(d.update(-30.0, now));
    }

    #[test]
    fn level_exactly_at_threshold_counts_toward_attack() {
        let mut d = detector();
        let t0 = Instant::now();
        let (flag, now) = run_ticks(&mut d, t0, 3, THRESHOLD);
        assert!(!flag);
        assert!(d.update(THRESHOLD, now));
    }

    #[test]
    fn quiet_chunk_resets_attack_debounce() {
        let mut d = detector();
        let t0 = Instant::now();
        let (_, now) = run_ticks(&mut d, t0, 2, -30.0);
        // One chunk below threshold wipes the accumulated 100 ms.
        d.update(-80.0, now);
        let (flag, _) = run_ticks(&mut d, now + TICK, 3, -30.0);
        assert!(!flag);
    }

    #[test]
    fn stays_active_through_release_and_hold() {
        let mut d = detector();
        let t0 = Instant::now();
        let (_, mut now) = run_ticks(&mut d, t0, 4, -30.0);
        assert!(d.is_active());

        // Silence for just under release + hold: still active.
        let ticks_active = ((RELEASE + HOLD).as_millis() / TICK.as_millis()) as u32;
        let (flag, later) = run_ticks(&mut d, now, ticks_active, -100.0);
        assert!(flag);
        now = later;

        // A couple more ticks pushes past the hold boundary.
        let (flag, _) = run_ticks(&mut d, now, 3, -100.0);
        assert!(!flag);
    }

    #[test]
    fn signal_during_release_cancels_pending_deactivation() {
        let mut d = detector();
        let t0 = Instant::now();
        let (_, now) = run_ticks(&mut d, t0, 4, -30.0);
        assert!(d.is_active());

        // 2 s of silence (under the 3 s release), then signal returns.
        let (_, now) = run_ticks(&mut d, now, 40, -100.0);
        assert!(d.update(-30.0, now));

        // Release clock restarted: 2 s of silence again keeps it active.
        let (flag, _) = run_ticks(&mut d, now + TICK, 40, -100.0);
        assert!(flag);
    }

    #[test]
    fn reset_clears_active_state() {
        let mut d = detector();
        let (_, _) = run_ticks(&mut d, Instant::now(), 4, -30.0);
        assert!(d.is_active());
        d.reset();
        assert!(!d.is_active());
    }

    #[test]
    fn meter_attacks_fast_and_decays_slowly() {
        let mut m = LevelMeter::new();
        assert_eq!(m.update(-20.0), -20.0);
        let after_one = m.update(-100.0);
        assert!(after_one > -50.0, "one quiet chunk decays partially: {after_one}");
        for _ in 0..50 {
            m.update(-100.0);
        }
        assert!(m.level_dbfs() < -99.0);
    }

    proptest! {
        /// No level sequence may activate the detector in fewer ticks
        /// than the attack time spans.
        #[test]
        fn never_activates_before_attack_time(levels in prop::collection::vec(-100.0f32..0.0, 1..3)) {
            let mut d = detector();
            let mut now = Instant::now();
            for level in levels {
                prop_assert!(!d.update(level, now));
                now += TICK;
            }
        }

        /// The meter output never exceeds the loudest level seen so far.
        #[test]
        fn meter_bounded_by_peak(levels in prop::collection::vec(-100.0f32..0.0, 1..64)) {
            let mut m = LevelMeter::new();
            let mut peak = -100.0f32;
            for level in levels {
                peak = peak.max(level);
                let out = m.update(level);
                prop_assert!(out <= peak + 1e-3);
            }
        }
    }
}
