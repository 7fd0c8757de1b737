use std::time::Duration;

use tokio::time::Instant;

use crate::config::LivenessConfig;

/// Escalation stage of a silent stream. Ordered; only new data moves it back
/// to [`StallStage::Healthy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum StallStage {
    #[default]
    Healthy,
    Warned,
    FirstRecoveryAttempted,
    ForcedRecovery,
}

impl StallStage {
    fn next(self) -> Option<Self> {
        match self {
            StallStage::Healthy => Some(StallStage::Warned),
            StallStage::Warned => Some(StallStage::FirstRecoveryAttempted),
            StallStage::FirstRecoveryAttempted => Some(StallStage::ForcedRecovery),
            StallStage::ForcedRecovery => None,
        }
    }

    /// Multiple of the warn threshold at which this stage is entered.
    fn threshold_factor(self) -> u32 {
        match self {
            StallStage::Healthy => 0,
            StallStage::Warned => 1,
            StallStage::FirstRecoveryAttempted => 2,
            StallStage::ForcedRecovery => 3,
        }
    }
}

/// What a tick asks the session to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallVerdict {
    /// Nothing changed.
    Steady,
    /// Entered [`StallStage::Warned`]; log only.
    Warn { idle: Duration },
    /// Entered [`StallStage::FirstRecoveryAttempted`] with enough content to
    /// complete early.
    Recover { idle: Duration },
    /// Entered [`StallStage::ForcedRecovery`]; the session must end now.
    Force { idle: Duration },
}

/// Time-since-last-byte tracker driven by periodic ticks.
///
/// Pure state: the caller supplies `now`, so the stage machine can be tested
/// without a timer.
#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    warn_after: Duration,
    min_recovery_chars: usize,
    stage: StallStage,
    last_activity: Instant,
    armed: bool,
}

impl LivenessMonitor {
    #[must_use]
    pub fn new(config: &LivenessConfig, now: Instant) -> Self {
        Self {
            warn_after: config.warn_after(),
            min_recovery_chars: config.min_recovery_chars,
            stage: StallStage::Healthy,
            last_activity: now,
            armed: false,
        }
    }

    pub fn arm(&mut self, now: Instant) {
        self.armed = true;
        self.record_activity(now);
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }

    /// New data arrived: reset the clock and the stage.
    pub fn record_activity(&mut self, now: Instant) {
        self.last_activity = now;
        self.stage = StallStage::Healthy;
    }

    #[must_use]
    pub fn stage(&self) -> StallStage {
        self.stage
    }

    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// Advance at most one stage if the silence has crossed the next threshold.
    ///
    /// `accumulated_chars` gates the early recovery: below
    /// `min_recovery_chars` the stage still advances but the verdict is
    /// [`StallVerdict::Steady`].
    pub fn evaluate(&mut self, now: Instant, accumulated_chars: usize) -> StallVerdict {
        if !self.armed {
            return StallVerdict::Steady;
        }
        let Some(next) = self.stage.next() else {
            return StallVerdict::Steady;
        };
        let idle = self.idle_for(now);
        if idle < self.warn_after * next.threshold_factor() {
            return StallVerdict::Steady;
        }

        self.stage = next;
        match next {
            StallStage::Warned => StallVerdict::Warn { idle },
            StallStage::FirstRecoveryAttempted if accumulated_chars >= self.min_recovery_chars => {
                StallVerdict::Recover { idle }
            }
            StallStage::FirstRecoveryAttempted => {
                tracing::debug!(
                    accumulated_chars,
                    min_recovery_chars = self.min_recovery_chars,
                    "stall recovery skipped, not enough content yet"
                );
                StallVerdict::Steady
            }
            StallStage::ForcedRecovery => StallVerdict::Force { idle },
            StallStage::Healthy => StallVerdict::Steady,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(now: Instant) -> LivenessMonitor {
        let config = LivenessConfig {
            tick_interval_ms: 5,
            stall_warn_after_ms: 20,
            min_recovery_chars: 10,
        };
        let mut monitor = LivenessMonitor::new(&config, now);
        monitor.arm(now);
        monitor
    }

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn healthy_below_warn_threshold() {
        let start = Instant::now();
        let mut m = monitor(start);
        assert_eq!(m.evaluate(start + ms(19), 0), StallVerdict::Steady);
        assert_eq!(m.stage(), StallStage::Healthy);
    }

    #[test]
    fn escalates_one_stage_per_tick() {
        let start = Instant::now();
        let mut m = monitor(start);
        let late = start + ms(100);
        assert_eq!(m.evaluate(late, 100), StallVerdict::Warn { idle: ms(100) });
        assert_eq!(m.evaluate(late, 100), StallVerdict::Recover { idle: ms(100) });
        assert_eq!(m.evaluate(late, 100), StallVerdict::Force { idle: ms(100) });
        assert_eq!(m.evaluate(late, 100), StallVerdict::Steady);
        assert_eq!(m.stage(), StallStage::ForcedRecovery);
    }

    #[test]
    fn early_recovery_needs_enough_content() {
        let start = Instant::now();
        let mut m = monitor(start);
        assert!(matches!(m.evaluate(start + ms(20), 3), StallVerdict::Warn { .. }));
        assert_eq!(m.evaluate(start + ms(40), 3), StallVerdict::Steady);
        assert_eq!(m.stage(), StallStage::FirstRecoveryAttempted);
        assert!(matches!(m.evaluate(start + ms(60), 3), StallVerdict::Force { .. }));
    }

    #[test]
    fn stage_is_monotonic_until_activity() {
        let start = Instant::now();
        let mut m = monitor(start);
        let _ = m.evaluate(start + ms(25), 0);
        assert_eq!(m.stage(), StallStage::Warned);
        // Time going "backwards" relative to the threshold never regresses.
        assert_eq!(m.evaluate(start + ms(21), 0), StallVerdict::Steady);
        assert_eq!(m.stage(), StallStage::Warned);

        m.record_activity(start + ms(30));
        assert_eq!(m.stage(), StallStage::Healthy);
        assert_eq!(m.evaluate(start + ms(45), 0), StallVerdict::Steady);
    }

    #[test]
    fn disarmed_monitor_never_fires() {
        let start = Instant::now();
        let mut m = monitor(start);
        m.disarm();
        assert_eq!(m.evaluate(start + ms(1_000), 1_000), StallVerdict::Steady);
        assert_eq!(m.stage(), StallStage::Healthy);
    }
}
