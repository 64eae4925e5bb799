//! Staged recovery for hardware-backed sources
//!
//! The watchdog never inspects devices directly. It watches each
//! supervised source's buffer staleness and, when reads have stopped for
//! longer than the source's timeout, walks a fixed escalation ladder:
//! reopen the stream, reinitialize the capture subsystem, and finally run
//! an operator-configured privileged reset command. Each attempt gets a
//! grace period to restore reads before the next stage fires. A bounded
//! total restart count keeps a dead device from being hammered forever;
//! once exhausted the source is abandoned and simply contributes silence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::SourceConfig;
use crate::error::SourceError;

/// Escalation ladder, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStage {
    /// Close and reopen the capture stream
    ReopenStream,
    /// Tear down and re-enumerate the device from scratch
    ReinitSubsystem,
    /// Run the configured privileged reset command, then reinit
    ResetDriver,
}

impl RecoveryStage {
    fn next(self) -> Self {
        match self {
            RecoveryStage::ReopenStream => RecoveryStage::ReinitSubsystem,
            // The last stage repeats until the restart budget runs out.
            RecoveryStage::ReinitSubsystem | RecoveryStage::ResetDriver => {
                RecoveryStage::ResetDriver
            }
        }
    }

    pub fn number(self) -> u8 {
        match self {
            RecoveryStage::ReopenStream => 1,
            RecoveryStage::ReinitSubsystem => 2,
            RecoveryStage::ResetDriver => 3,
        }
    }
}

/// What the watchdog needs from a supervised source: a staleness
/// observation and a way to run one recovery stage. Recovery may block
/// for seconds, which is exactly why it runs on the watchdog thread and
/// not the mixer tick.
pub trait Recoverable: Send {
    fn name(&self) -> &str;

    /// Time since the source's reader last delivered data.
    fn staleness(&self) -> Duration;

    fn recover(&self, stage: RecoveryStage) -> Result<(), SourceError>;
}

/// Per-source escalation state. Pure decision logic, no I/O.
pub struct WatchdogState {
    timeout: Duration,
    grace: Duration,
    max_restarts: u32,
    stage: RecoveryStage,
    restart_count: u32,
    last_attempt: Option<Instant>,
    abandoned: bool,
}

/// One decision per poll.
#[derive(Debug, PartialEq, Eq)]
pub enum WatchdogAction {
    None,
    Recover(RecoveryStage),
    /// Restart budget exhausted; the source is now permanently silent.
    Abandon,
}

impl WatchdogState {
    pub fn new(timeout: Duration, grace: Duration, max_restarts: u32) -> Self {
        Self {
            timeout,
            grace,
            max_restarts,
            stage: RecoveryStage::ReopenStream,
            restart_count: 0,
            last_attempt: None,
            abandoned: false,
        }
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandoned
    }

    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    pub fn evaluate(&mut self, staleness: Duration, now: Instant) -> WatchdogAction {
        if self.abandoned {
            return WatchdogAction::None;
        }

        if staleness <= self.timeout {
            // Healthy. A pending recovery that brought reads back earns a
            // clean escalation ladder for the next incident.
            if self.last_attempt.take().is_some() {
                self.stage = RecoveryStage::ReopenStream;
            }
            return WatchdogAction::None;
        }

        if let Some(at) = self.last_attempt {
            if now.duration_since(at) < self.grace {
                return WatchdogAction::None;
            }
            // Grace expired and reads are still stalled: escalate.
            self.stage = self.stage.next();
        }

        if self.restart_count >= self.max_restarts {
            self.abandoned = true;
            return WatchdogAction::Abandon;
        }

        self.restart_count += 1;
        self.last_attempt = Some(now);
        WatchdogAction::Recover(self.stage)
    }
}

struct Supervised {
    target: Box<dyn Recoverable>,
    state: WatchdogState,
    skip_reset_stage: bool,
}

/// Background supervisor thread over all hardware-backed sources.
pub struct Watchdog {
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// Spawn the supervisor. `targets` pairs each recovery handle with
    /// the source configuration its timeouts come from.
    pub fn spawn(
        poll: Duration,
        grace: Duration,
        targets: Vec<(Box<dyn Recoverable>, SourceConfig)>,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();

        let mut supervised: Vec<Supervised> = targets
            .into_iter()
            .map(|(target, cfg)| Supervised {
                target,
                state: WatchdogState::new(cfg.watchdog_timeout, grace, cfg.watchdog_max_restarts),
                skip_reset_stage: cfg.watchdog_reset_cmd.is_none(),
            })
            .collect();

        let thread_handle = thread::Builder::new()
            .name("watchdog".to_string())
            .spawn(move || {
                while thread_running.load(Ordering::Relaxed) {
                    for entry in &mut supervised {
                        check_one(entry);
                    }
                    // Sleep in slices so shutdown stays responsive.
                    let mut remaining = poll;
                    while thread_running.load(Ordering::Relaxed) && !remaining.is_zero() {
                        let slice = remaining.min(Duration::from_millis(100));
                        thread::sleep(slice);
                        remaining = remaining.saturating_sub(slice);
                    }
                }
            })
            .ok();

        Self {
            running,
            thread_handle,
        }
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

fn check_one(entry: &mut Supervised) {
    let staleness = entry.target.staleness();
    match entry.state.evaluate(staleness, Instant::now()) {
        WatchdogAction::None => {}
        WatchdogAction::Abandon => {
            tracing::error!(
                source = %entry.target.name(),
                restarts = entry.state.restart_count(),
                "restart budget exhausted, abandoning source"
            );
        }
        WatchdogAction::Recover(stage) => {
            let stage = if stage == RecoveryStage::ResetDriver && entry.skip_reset_stage {
                // No reset command configured: stay on reinit instead of
                // failing stage 3 over and over.
                RecoveryStage::ReinitSubsystem
            } else {
                stage
            };
            tracing::warn!(
                source = %entry.target.name(),
                stage = stage.number(),
                stalled_secs = staleness.as_secs(),
                attempt = entry.state.restart_count(),
                "reads stalled, attempting recovery"
            );
            match entry.target.recover(stage) {
                Ok(()) => {
                    tracing::info!(
                        source = %entry.target.name(),
                        stage = stage.number(),
                        "recovery attempt completed"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        source = %entry.target.name(),
                        stage = stage.number(),
                        "recovery attempt failed: {e}"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(10);
    const GRACE: Duration = Duration::from_secs(5);

    fn stale() -> Duration {
        TIMEOUT + Duration::from_secs(1)
    }

    #[test]
    fn healthy_source_never_triggers() {
        let mut state = WatchdogState::new(TIMEOUT, GRACE, 8);
        let now = Instant::now();
        assert_eq!(
            state.evaluate(Duration::from_secs(1), now),
            WatchdogAction::None
        );
        assert_eq!(state.restart_count(), 0);
    }

    #[test]
    fn stall_starts_at_stage_one() {
        let mut state = WatchdogState::new(TIMEOUT, GRACE, 8);
        assert_eq!(
            state.evaluate(stale(), Instant::now()),
            WatchdogAction::Recover(RecoveryStage::ReopenStream)
        );
    }

    #[test]
    fn grace_period_suppresses_immediate_retry() {
        let mut state = WatchdogState::new(TIMEOUT, GRACE, 8);
        let t0 = Instant::now();
        assert!(matches!(state.evaluate(stale(), t0), WatchdogAction::Recover(_)));
        // Still within grace: no action even though still stale.
        assert_eq!(
            state.evaluate(stale(), t0 + Duration::from_secs(2)),
            WatchdogAction::None
        );
    }

    #[test]
    fn escalates_through_stages_after_grace() {
        let mut state = WatchdogState::new(TIMEOUT, GRACE, 8);
        let t0 = Instant::now();
        assert_eq!(
            state.evaluate(stale(), t0),
            WatchdogAction::Recover(RecoveryStage::ReopenStream)
        );
        let t1 = t0 + GRACE + Duration::from_secs(1);
        assert_eq!(
            state.evaluate(stale(), t1),
            WatchdogAction::Recover(RecoveryStage::ReinitSubsystem)
        );
        let t2 = t1 + GRACE + Duration::from_secs(1);
        assert_eq!(
            state.evaluate(stale(), t2),
            WatchdogAction::Recover(RecoveryStage::ResetDriver)
        );
        // Final stage repeats rather than wrapping around.
        let t3 = t2 + GRACE + Duration::from_secs(1);
        assert_eq!(
            state.evaluate(stale(), t3),
            WatchdogAction::Recover(RecoveryStage::ResetDriver)
        );
    }

    #[test]
    fn recovery_resets_escalation_ladder() {
        let mut state = WatchdogState::new(TIMEOUT, GRACE, 8);
        let t0 = Instant::now();
        state.evaluate(stale(), t0);
        let t1 = t0 + GRACE + Duration::from_secs(1);
        state.evaluate(stale(), t1);

        // Reads come back: next incident starts over at stage one.
        let t2 = t1 + Duration::from_secs(30);
        assert_eq!(state.evaluate(Duration::ZERO, t2), WatchdogAction::None);
        assert_eq!(
            state.evaluate(stale(), t2 + Duration::from_secs(60)),
            WatchdogAction::Recover(RecoveryStage::ReopenStream)
        );
    }

    #[test]
    fn restart_budget_leads_to_permanent_abandonment() {
        let mut state = WatchdogState::new(TIMEOUT, GRACE, 2);
        let mut now = Instant::now();
        assert!(matches!(state.evaluate(stale(), now), WatchdogAction::Recover(_)));
        now += GRACE + Duration::from_secs(1);
        assert!(matches!(state.evaluate(stale(), now), WatchdogAction::Recover(_)));
        now += GRACE + Duration::from_secs(1);
        assert_eq!(state.evaluate(stale(), now), WatchdogAction::Abandon);
        assert!(state.is_abandoned());

        // Permanently silent from here on, even if reads resume.
        now += GRACE + Duration::from_secs(1);
        assert_eq!(state.evaluate(stale(), now), WatchdogAction::None);
        assert_eq!(state.evaluate(Duration::ZERO, now), WatchdogAction::None);
    }
}
