//! Per-display motion
//!
//! Motion is stored as normalized progress (0.0 - 1.0) rather than as a
//! start timestamp. Advancing it takes an explicit frame delta, so:
//! - a paused engine simply stops advancing and resumes from the same spot
//! - a speed change alters how fast progress accrues, never the position
//!
//! Scroll comments travel `surface_width + item_width` pixels at
//! `surface_width / scroll_duration` px/s (times the speed multiplier),
//! starting from the right edge of the surface they were admitted on.
//! Fixed comments hold still for `fixed_duration` seconds.

/// Progress this close to the end counts as finished
const FINISH_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Trajectory {
    Scroll {
        /// Left edge at progress 0 (surface width at admission)
        start: f32,
        /// Total travel in logical pixels
        distance: f32,
        /// Pixels per second at speed 1.0
        base_speed: f32,
    },
    Fixed {
        duration: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Motion {
    trajectory: Trajectory,
    progress: f64,
}

impl Motion {
    pub fn scroll(surface_width: f32, item_width: f32, scroll_duration: f64) -> Self {
        let scroll_duration = scroll_duration.max(f64::EPSILON);
        Self {
            trajectory: Trajectory::Scroll {
                start: surface_width,
                distance: (surface_width + item_width).max(1.0),
                base_speed: (surface_width.max(1.0) as f64 / scroll_duration) as f32,
            },
            progress: 0.0,
        }
    }

    pub fn fixed(duration: f64) -> Self {
        Self {
            trajectory: Trajectory::Fixed {
                duration: duration.max(f64::EPSILON),
            },
            progress: 0.0,
        }
    }

    pub fn trajectory(&self) -> Trajectory {
        self.trajectory
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn is_finished(&self) -> bool {
        self.progress >= 1.0
    }

    /// Whether the speed multiplier applies
    pub fn is_scroll(&self) -> bool {
        matches!(self.trajectory, Trajectory::Scroll { .. })
    }

    /// Seconds for the whole trajectory at the given speed multiplier
    pub fn total(&self, speed: f64) -> f64 {
        match self.trajectory {
            Trajectory::Scroll {
                distance,
                base_speed,
                ..
            } => distance as f64 / (base_speed as f64 * speed.max(f64::EPSILON)),
            Trajectory::Fixed { duration } => duration,
        }
    }

    /// Seconds left at the given speed multiplier
    pub fn remaining(&self, speed: f64) -> f64 {
        (1.0 - self.progress).max(0.0) * self.total(speed)
    }

    /// Advance by `dt` seconds of running time
    pub fn advance(&mut self, dt: f64, speed: f64) {
        if dt <= 0.0 || self.is_finished() {
            return;
        }
        self.progress += dt / self.total(speed);
        if self.progress >= 1.0 - FINISH_EPSILON {
            self.progress = 1.0;
        }
    }

    /// Left edge for the current progress
    ///
    /// Scroll comments ignore `surface_width` so a resize never moves them;
    /// fixed comments re-center.
    pub fn x(&self, surface_width: f32, item_width: f32) -> f32 {
        match self.trajectory {
            Trajectory::Scroll {
                start, distance, ..
            } => start - (self.progress as f32) * distance,
            Trajectory::Fixed { .. } => ((surface_width - item_width) / 2.0).max(0.0),
        }
    }
}
