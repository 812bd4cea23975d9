//! Activation loop timing
//!
//! The host calls `tick` once per rendered frame. This type decides, for a
//! given frame instant:
//! - how much running time elapsed since the previous frame (zero while
//!   paused, and for the first frame after a resume)
//! - whether an activation pass is due under the configured rate limit
//! - whether the playback clock jumped backwards since the last pass

use std::time::Instant;

/// Slack allowed when comparing frame spacing against the activation period
const RATE_SLACK_SECS: f64 = 0.001;

#[derive(Debug, Clone, Default)]
pub struct ActivationLoop {
    last_activation: Option<Instant>,
    last_frame: Option<Instant>,
    last_clock: Option<f64>,
    paused: bool,
    forced: bool,
}

impl ActivationLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Unfreeze; the wall time spent paused is never counted
    pub fn resume(&mut self) {
        self.paused = false;
        self.last_frame = None;
    }

    /// Running seconds since the previous frame
    pub fn frame_delta(&mut self, now: Instant) -> f64 {
        if self.paused {
            self.last_frame = None;
            return 0.0;
        }
        let dt = self
            .last_frame
            .map(|last| now.saturating_duration_since(last).as_secs_f64())
            .unwrap_or(0.0);
        self.last_frame = Some(now);
        dt
    }

    /// Whether an activation pass should run at `now` for a rate of `hz`
    pub fn activation_due(&self, now: Instant, hz: f64) -> bool {
        if self.forced {
            return true;
        }
        match self.last_activation {
            None => true,
            Some(last) => {
                let elapsed = now.saturating_duration_since(last).as_secs_f64();
                elapsed + RATE_SLACK_SECS >= 1.0 / hz.max(1.0)
            }
        }
    }

    pub fn mark_activated(&mut self, now: Instant) {
        self.last_activation = Some(now);
        self.forced = false;
    }

    /// Run an activation pass on the next tick regardless of the rate limit
    pub fn force_next(&mut self) {
        self.forced = true;
    }

    /// Record a clock reading; true when it moved back by more than `epsilon`
    pub fn observe_clock(&mut self, position: f64, epsilon: f64) -> bool {
        let jumped = self
            .last_clock
            .is_some_and(|last| position < last - epsilon);
        self.last_clock = Some(position);
        jumped
    }

    /// Forget clock history after an explicit seek
    pub fn reset_clock(&mut self, position: f64) {
        self.last_clock = Some(position);
        self.forced = true;
    }

    /// Forget all timing history
    pub fn reset(&mut self) {
        let paused = self.paused;
        *self = Self::default();
        self.paused = paused;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_rate_limit() {
        let base = Instant::now();
        let mut lp = ActivationLoop::new();
        assert!(lp.activation_due(base, 60.0));
        lp.mark_activated(base);
        assert!(!lp.activation_due(base + Duration::from_millis(5), 60.0));
        assert!(lp.activation_due(base + Duration::from_millis(17), 60.0));
        // 10 Hz cap
        assert!(!lp.activation_due(base + Duration::from_millis(50), 10.0));
    }

    #[test]
    fn test_force_bypasses_rate_limit() {
        let base = Instant::now();
        let mut lp = ActivationLoop::new();
        lp.mark_activated(base);
        lp.force_next();
        assert!(lp.activation_due(base, 1.0));
        lp.mark_activated(base);
        assert!(!lp.activation_due(base, 1.0));
    }

    #[test]
    fn test_pause_swallows_elapsed_time() {
        let base = Instant::now();
        let mut lp = ActivationLoop::new();
        assert_eq!(lp.frame_delta(base), 0.0);
        let dt = lp.frame_delta(base + Duration::from_millis(100));
        assert!((dt - 0.1).abs() < 1e-9);

        lp.pause();
        assert_eq!(lp.frame_delta(base + Duration::from_secs(5)), 0.0);
        lp.resume();
        assert_eq!(lp.frame_delta(base + Duration::from_secs(6)), 0.0);
        let dt = lp.frame_delta(base + Duration::from_millis(6100));
        assert!((dt - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_backward_jump_detection() {
        let mut lp = ActivationLoop::new();
        assert!(!lp.observe_clock(10.0, 0.5));
        assert!(!lp.observe_clock(9.8, 0.5));
        assert!(lp.observe_clock(3.0, 0.5));
        lp.reset_clock(1.0);
        assert!(!lp.observe_clock(1.0, 0.5));
    }
}
