//! Priority duck arbitration
//!
//! Decides, per tick, which duck-eligible sources are audible. Strict
//! priority: a source is ducked while any strictly-higher-priority
//! source (lower number) has its debounced signal flag active,
//! including non-duck-eligible context sources resolved earlier in the
//! tick. Equal-priority active sources mix together. Ducking is full
//! silence, not attenuation.
//!
//! Duck transitions are padded: a source entering or leaving the ducked
//! state passes through a silent padding phase of the configured
//! duration so the changeover lands as a clean gap instead of a hard
//! splice. Only the transitioning source is gapped; the source taking
//! over plays immediately. A source becoming audible from plain idle
//! (its own signal appearing, nobody ducking it) is not padded.
//!
//! Decisions consume only debounced active flags. Instantaneous levels
//! would let background noise on a quiet high-priority source
//! permanently duck everything beneath it.

use std::time::{Duration, Instant};

use serde::Serialize;

/// Per-source duck phase. `Idle` means "not ducked": the source is
/// included whenever its own signal is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DuckPhase {
    Idle,
    /// Losing to a higher-priority source; silent until the timer expires
    PaddingOut,
    /// Fully silenced by a higher-priority source
    Ducked,
    /// Higher-priority source released; silent until the timer expires
    PaddingIn,
}

struct DuckState {
    priority: i32,
    padding: Duration,
    phase: DuckPhase,
    phase_until: Option<Instant>,
}

/// Arbiter over a fixed set of duck-eligible sources, indexed in
/// registration order.
pub struct DuckArbiter {
    states: Vec<DuckState>,
}

impl DuckArbiter {
    pub fn new() -> Self {
        Self { states: Vec::new() }
    }

    /// Register one duck-eligible source; returns its index.
    pub fn register(&mut self, priority: i32, padding: Duration) -> usize {
        self.states.push(DuckState {
            priority,
            padding,
            phase: DuckPhase::Idle,
            phase_until: None,
        });
        self.states.len() - 1
    }

    pub fn phase(&self, index: usize) -> DuckPhase {
        self.states[index].phase
    }

    /// Advance all phase machines one tick and return per-source
    /// inclusion. `active` holds the debounced flags in registration
    /// order; `context_priority` is the best priority among active
    /// sources resolved earlier in the tick (direct path and
    /// non-duck-eligible sources).
    pub fn arbitrate(
        &mut self,
        active: &[bool],
        context_priority: Option<i32>,
        now: Instant,
    ) -> Vec<bool> {
        debug_assert_eq!(active.len(), self.states.len());

        let duck_best = self
            .states
            .iter()
            .zip(active)
            .filter(|(_, &a)| a)
            .map(|(s, _)| s.priority)
            .min();
        let winner = match (context_priority, duck_best) {
            (Some(c), Some(d)) => Some(c.min(d)),
            (c, d) => c.or(d),
        };

        for state in &mut self.states {
            let ducked = winner.is_some_and(|w| w < state.priority);
            step(state, ducked, now);
        }

        self.states
            .iter()
            .zip(active)
            .map(|(s, &a)| a && s.phase == DuckPhase::Idle)
            .collect()
    }
}

impl Default for DuckArbiter {
    fn default() -> Self {
        Self::new()
    }
}

fn step(state: &mut DuckState, ducked: bool, now: Instant) {
    match state.phase {
        DuckPhase::Idle => {
            if ducked {
                state.phase = DuckPhase::PaddingOut;
                state.phase_until = Some(now + state.padding);
            }
        }
        DuckPhase::PaddingOut => {
            if !ducked {
                // The takeover reversed mid-gap; pad back in from here
                // so the gap keeps a symmetric trailing edge.
                state.phase = DuckPhase::PaddingIn;
                state.phase_until = Some(now + state.padding);
            } else if state.phase_until.is_some_and(|until| now >= until) {
                state.phase = DuckPhase::Ducked;
                state.phase_until = None;
            }
        }
        DuckPhase::Ducked => {
            if !ducked {
                state.phase = DuckPhase::PaddingIn;
                state.phase_until = Some(now + state.padding);
            }
        }
        DuckPhase::PaddingIn => {
            if ducked {
                state.phase = DuckPhase::Ducked;
                state.phase_until = None;
            } else if state.phase_until.is_some_and(|until| now >= until) {
                state.phase = DuckPhase::Idle;
                state.phase_until = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PADDING: Duration = Duration::from_secs(1);
    const TICK: Duration = Duration::from_millis(50);

    fn ticks(d: Duration) -> u32 {
        (d.as_millis() / TICK.as_millis()) as u32
    }

    fn run(
        arb: &mut DuckArbiter,
        active: &[bool],
        context: Option<i32>,
        start: Instant,
        n: u32,
    ) -> (Vec<bool>, Instant) {
        let mut now = start;
        let mut out = vec![false; active.len()];
        for _ in 0..n {
            out = arb.arbitrate(active, context, now);
            now += TICK;
        }
        (out, now)
    }

    #[test]
    fn lone_source_included_immediately_once_active() {
        let mut arb = DuckArbiter::new();
        arb.register(1, PADDING);
        let t0 = Instant::now();

        // Silent: excluded but not ducked.
        let out = arb.arbitrate(&[false], None, t0);
        assert_eq!(out, vec![false]);
        assert_eq!(arb.phase(0), DuckPhase::Idle);

        // Signal appears: included the same tick, no padding gap.
        let out = arb.arbitrate(&[true], None, t0 + TICK);
        assert_eq!(out, vec![true]);
    }

    #[test]
    fn higher_priority_context_ducks_with_padding_gap() {
        let mut arb = DuckArbiter::new();
        arb.register(1, PADDING);
        let t0 = Instant::now();
        assert_eq!(arb.arbitrate(&[true], None, t0), vec![true]);

        // Priority-0 context source goes active: padding gap, then ducked.
        let (out, now) = run(&mut arb, &[true], Some(0), t0 + TICK, ticks(PADDING));
        assert_eq!(out, vec![false], "silent during padding");
        assert_eq!(arb.phase(0), DuckPhase::PaddingOut);

        let (out, _) = run(&mut arb, &[true], Some(0), now, 2);
        assert_eq!(out, vec![false]);
        assert_eq!(arb.phase(0), DuckPhase::Ducked);
    }

    #[test]
    fn release_pads_back_in_before_resuming() {
        let mut arb = DuckArbiter::new();
        arb.register(1, PADDING);
        let t0 = Instant::now();
        let (_, now) = run(&mut arb, &[true], Some(0), t0, ticks(PADDING) + 2);
        assert_eq!(arb.phase(0), DuckPhase::Ducked);

        // Context released: one padding gap, then audio resumes.
        let (out, now) = run(&mut arb, &[true], None, now, ticks(PADDING));
        assert_eq!(out, vec![false], "still padding in");
        let (out, _) = run(&mut arb, &[true], None, now, 2);
        assert_eq!(out, vec![true]);
    }

    #[test]
    fn equal_priority_sources_both_included() {
        let mut arb = DuckArbiter::new();
        arb.register(1, PADDING);
        arb.register(1, PADDING);
        let out = arb.arbitrate(&[true, true], None, Instant::now());
        assert_eq!(out, vec![true, true]);
        assert_eq!(arb.phase(0), DuckPhase::Idle);
        assert_eq!(arb.phase(1), DuckPhase::Idle);
    }

    #[test]
    fn strict_priority_between_duck_eligible_sources() {
        let mut arb = DuckArbiter::new();
        arb.register(1, PADDING);
        arb.register(2, PADDING);
        let t0 = Instant::now();

        let (out, _) = run(&mut arb, &[true, true], None, t0, ticks(PADDING) + 2);
        assert_eq!(out, vec![true, false]);
        assert_eq!(arb.phase(1), DuckPhase::Ducked);
    }

    #[test]
    fn reversal_mid_padding_pads_back_in() {
        let mut arb = DuckArbiter::new();
        arb.register(1, PADDING);
        let t0 = Instant::now();
        arb.arbitrate(&[true], None, t0);

        // Context keys up briefly and drops before the gap completes.
        arb.arbitrate(&[true], Some(0), t0 + TICK);
        assert_eq!(arb.phase(0), DuckPhase::PaddingOut);
        arb.arbitrate(&[true], None, t0 + TICK * 2);
        assert_eq!(arb.phase(0), DuckPhase::PaddingIn);

        // Still one full gap before resuming.
        let (out, _) = run(&mut arb, &[true], None, t0 + TICK * 3, ticks(PADDING) + 2);
        assert_eq!(out, vec![true]);
    }

    #[test]
    fn silent_ducked_source_transitions_without_effect() {
        let mut arb = DuckArbiter::new();
        arb.register(2, PADDING);
        let t0 = Instant::now();
        // Source silent, context active: phases move but inclusion stays
        // false throughout.
        let (out, now) = run(&mut arb, &[false], Some(0), t0, ticks(PADDING) + 2);
        assert_eq!(out, vec![false]);
        assert_eq!(arb.phase(0), DuckPhase::Ducked);
        let (out, _) = run(&mut arb, &[false], None, now, ticks(PADDING) + 2);
        assert_eq!(out, vec![false]);
        assert_eq!(arb.phase(0), DuckPhase::Idle);
    }
}
