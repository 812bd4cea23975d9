//! Danmaku - time-synchronized comment overlay engine
//!
//! Schedules short text comments against a host player's clock, places
//! them in collision-free lanes and recycles their display objects.

pub mod api;
pub mod features;
pub mod platform;

pub use features::danmaku;
pub use features::danmaku::{
    Color, CommentId, CommentItem, CommentKind, CommentManager, DanmakuError, DanmakuEvent,
    DisplayStatus, EngineState, PlaybackClock, PlayerEvent, SharedPlaybackClock, event_channel,
};
pub use features::settings::{ConfigFileError, EngineConfig, FilterRules};
pub use platform::plugin::{DanmakuPlugin, PluginError, PluginState};
