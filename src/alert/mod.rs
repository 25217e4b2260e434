//! Cooldown-gated alerting.
//!
//! The visual overlay is drawn on every flagged frame; only the external
//! alert (the audio cue) passes through the gate. Each stream owns its own
//! `CooldownGate`, so two viewers of one camera never share a cooldown.

mod sink;

pub use sink::{AlertCue, AlertSink, CommandSink, LogSink};

use std::time::{Duration, Instant};

/// When the alert last fired.
///
/// Starts as "never", which always lets the first flagged frame fire
/// regardless of how long the process has been up. Only `CooldownGate`
/// writes it, and only forward in time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AlertState {
    last_alert: Option<Instant>,
}

impl AlertState {
    pub fn never() -> Self {
        Self { last_alert: None }
    }

    pub fn last_alert(&self) -> Option<Instant> {
        self.last_alert
    }

    pub fn has_fired(&self) -> bool {
        self.last_alert.is_some()
    }
}

/// Outcome of feeding one frame's verdict through the gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertDecision {
    /// Frame was not flagged.
    Clear,
    /// Flagged and outside the cooldown: the sink should fire.
    Fire,
    /// Flagged but still cooling down.
    Suppressed { remaining: Duration },
}

impl AlertDecision {
    pub fn fired(&self) -> bool {
        matches!(self, AlertDecision::Fire)
    }
}

#[derive(Clone, Debug)]
pub struct CooldownGate {
    cooldown: Duration,
    state: AlertState,
}

impl CooldownGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            state: AlertState::never(),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn state(&self) -> AlertState {
        self.state
    }

    /// Decide whether a frame observed at `now` fires the alert.
    ///
    /// Fires when flagged and strictly more than `cooldown` has passed since
    /// the last firing, recording `now` as the new firing time. Unflagged and
    /// suppressed frames leave the state untouched.
    pub fn evaluate(&mut self, flagged: bool, now: Instant) -> AlertDecision {
        if !flagged {
            return AlertDecision::Clear;
        }
        match self.state.last_alert {
            None => self.fire(now),
            Some(last) => {
                let elapsed = now.saturating_duration_since(last);
                if elapsed > self.cooldown {
                    self.fire(now)
                } else {
                    AlertDecision::Suppressed {
                        remaining: self.cooldown - elapsed,
                    }
                }
            }
        }
    }

    fn fire(&mut self, now: Instant) -> AlertDecision {
        self.state.last_alert = Some(now);
        AlertDecision::Fire
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_secs(4);

    #[test]
    fn first_flag_always_fires() {
        let mut gate = CooldownGate::new(Duration::from_secs(3600));
        assert!(!gate.state().has_fired());
        let now = Instant::now();
        assert_eq!(gate.evaluate(true, now), AlertDecision::Fire);
        assert_eq!(gate.state().last_alert(), Some(now));
    }

    #[test]
    fn fires_again_only_after_cooldown() {
        let mut gate = CooldownGate::new(COOLDOWN);
        let t0 = Instant::now();
        let epsilon = Duration::from_millis(500);

        assert!(gate.evaluate(true, t0).fired());
        assert_eq!(
            gate.evaluate(true, t0 + epsilon),
            AlertDecision::Suppressed {
                remaining: COOLDOWN - epsilon
            }
        );
        assert_eq!(gate.state().last_alert(), Some(t0));
        let later = t0 + COOLDOWN + Duration::from_secs(1);
        assert!(gate.evaluate(true, later).fired());
        assert_eq!(gate.state().last_alert(), Some(later));
    }

    #[test]
    fn exactly_cooldown_is_still_suppressed() {
        let mut gate = CooldownGate::new(COOLDOWN);
        let t0 = Instant::now();
        gate.evaluate(true, t0);
        assert!(!gate.evaluate(true, t0 + COOLDOWN).fired());
    }

    #[test]
    fn unflagged_frames_do_not_touch_state() {
        let mut gate = CooldownGate::new(COOLDOWN);
        let t0 = Instant::now();
        assert_eq!(gate.evaluate(false, t0), AlertDecision::Clear);
        assert_eq!(gate.state(), AlertState::never());

        gate.evaluate(true, t0);
        assert_eq!(
            gate.evaluate(false, t0 + Duration::from_secs(60)),
            AlertDecision::Clear
        );
        assert_eq!(gate.state().last_alert(), Some(t0));
    }

    #[test]
    fn last_alert_never_moves_backwards() {
        let mut gate = CooldownGate::new(Duration::ZERO);
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_secs(2);
        assert!(gate.evaluate(true, t1).fired());
        // An earlier timestamp can never satisfy the strict cooldown check.
        assert!(!gate.evaluate(true, t0).fired());
        assert_eq!(gate.state().last_alert(), Some(t1));
        assert!(!gate.evaluate(true, t1).fired());
        assert!(gate.evaluate(true, t1 + Duration::from_millis(1)).fired());
    }
}
