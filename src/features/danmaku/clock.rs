//! External playback clock
//!
//! The host media player is the only time source for activation. The engine
//! reads it through `PlaybackClock`; `SharedPlaybackClock` is a thread-safe
//! cell the host (or a test) writes positions into.

use std::sync::Arc;

use parking_lot::RwLock;

/// Read-only view of the host's playback position, in seconds
pub trait PlaybackClock: Send + Sync {
    fn current_time(&self) -> f64;
}

impl<F> PlaybackClock for F
where
    F: Fn() -> f64 + Send + Sync,
{
    fn current_time(&self) -> f64 {
        self()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ClockInner {
    position: f64,
    playing: bool,
}

/// Host-driven playback position
///
/// Cloning shares the same underlying state, so the host keeps one clone
/// and hands another to the engine.
#[derive(Clone, Default)]
pub struct SharedPlaybackClock {
    inner: Arc<RwLock<ClockInner>>,
}

impl std::fmt::Debug for SharedPlaybackClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("SharedPlaybackClock")
            .field("position", &inner.position)
            .field("playing", &inner.playing)
            .finish()
    }
}

impl SharedPlaybackClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update position; negative and non-finite values clamp to zero
    pub fn set_position(&self, seconds: f64) {
        let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        self.inner.write().position = seconds;
    }

    /// Move the position forward by `seconds`
    pub fn advance(&self, seconds: f64) {
        let mut inner = self.inner.write();
        inner.position = (inner.position + seconds).max(0.0);
    }

    pub fn position(&self) -> f64 {
        self.inner.read().position
    }

    pub fn set_playing(&self, playing: bool) {
        self.inner.write().playing = playing;
    }

    pub fn is_playing(&self) -> bool {
        self.inner.read().playing
    }
}

impl PlaybackClock for SharedPlaybackClock {
    fn current_time(&self) -> f64 {
        self.position()
    }
}
