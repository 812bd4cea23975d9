//! Engine communication types
//!
//! - `DanmakuEvent` - Notifications sent from the engine to the host
//! - `PlayerEvent` - Notifications the host player feeds into the engine
//!
//! ## Architecture
//! ```text
//! Host player --[PlayerEvent]--> CommentManager
//! Host        <--[DanmakuEvent]-- CommentManager
//! Remote task --[RemoteOutcome]--> CommentManager (drained on tick)
//! ```

use super::error::DanmakuError;
use super::lanes::LaneRef;
use super::pool::HandleToken;
use super::types::{CommentId, DisplayStatus, EngineState};

// ============ Events (Engine -> Host) ============

/// Why an Active display left the screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetireReason {
    /// Motion reached its end
    Completed,
    /// `clear()` was called
    Cleared,
    /// Playback position jumped
    Seek,
    /// Its lane disappeared after a resize
    Resized,
    /// The engine was disabled or destroyed
    Detached,
}

/// A configuration value that changed
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigChange {
    Opacity(f32),
    Speed(f64),
    FontSize(f32),
    MaxConcurrent(usize),
    PoolCapacity(usize),
    /// Whole config replaced
    Replaced,
}

/// Events emitted by `CommentManager`
#[derive(Debug, Clone, PartialEq)]
pub enum DanmakuEvent {
    /// An item entered the store (Pending or Filtered)
    ItemAdded { id: CommentId, status: DisplayStatus },
    /// An item was admitted to a lane and given a display handle
    ItemActivated {
        id: CommentId,
        lane: LaneRef,
        token: HandleToken,
    },
    /// An Active item released its handle and lane
    ItemRetired { id: CommentId, reason: RetireReason },
    /// The store was emptied
    Cleared,
    ConfigChanged(ConfigChange),
    /// A remote collection was ingested
    Loaded { source: String, count: usize },
    /// A remote collection could not be fetched or parsed; nothing changed
    LoadFailed { source: String, error: DanmakuError },
    /// A locally sent comment reached the backend
    Sent { id: CommentId },
    /// A locally sent comment did not reach the backend; it is still shown
    SendFailed { id: CommentId, error: DanmakuError },
    StateChanged { old: EngineState, new: EngineState },
}

// ============ Events (Host -> Engine) ============

/// Notifications from the host media player
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerEvent {
    Play,
    Pause,
    /// Playback jumped to a position in seconds
    Seeked(f64),
    /// The video surface changed size (logical pixels)
    Resized { width: f32, height: f32 },
    /// Playback rate changed (1.0 = normal)
    RateChanged(f64),
}

// ============ Channel Types ============

/// Sender for engine events
pub type DanmakuEventSender = tokio::sync::mpsc::UnboundedSender<DanmakuEvent>;

/// Receiver for engine events
pub type DanmakuEventReceiver = tokio::sync::mpsc::UnboundedReceiver<DanmakuEvent>;

/// Create a new event channel
pub fn event_channel() -> (DanmakuEventSender, DanmakuEventReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}

/// Sender for player notifications
pub type PlayerEventSender = tokio::sync::mpsc::UnboundedSender<PlayerEvent>;

/// Receiver for player notifications
pub type PlayerEventReceiver = tokio::sync::mpsc::UnboundedReceiver<PlayerEvent>;

/// Create a new player notification channel
pub fn player_channel() -> (PlayerEventSender, PlayerEventReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}
