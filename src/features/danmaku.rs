//! Danmaku engine
//!
//! Timed comments that float across a video surface in sync with the host
//! player's clock.
//!
//! Data flow per frame:
//! ```text
//! clock -> ActivationLoop -> ItemStore::due -> LaneAllocator::admit
//!       -> ObjectPool::acquire -> DisplayObject (moved every frame)
//!       -> motion finished -> ObjectPool::release + lane freed
//! ```

mod clock;
mod error;
mod events;
mod filter;
mod lanes;
mod manager;
mod measure;
mod motion;
mod pool;
mod render;
mod scheduler;
mod store;
mod types;

pub use clock::{PlaybackClock, SharedPlaybackClock};
pub use error::{DanmakuError, ValidationError};
pub use events::{
    ConfigChange, DanmakuEvent, DanmakuEventReceiver, DanmakuEventSender, PlayerEvent,
    PlayerEventReceiver, PlayerEventSender, RetireReason, event_channel, player_channel,
};
pub use filter::{CommentFilter, ContentFilter, FilterReason, FilterVerdict, PredicateFilter};
pub use lanes::{Lane, LaneAllocator, LaneLayout, LaneRef};
pub use manager::{CommentManager, EngineStats};
pub use measure::{EstimatedMeasure, TextMeasure};
pub use motion::{Motion, Trajectory};
pub use pool::{DisplayObject, HandleToken, ObjectPool, PoolStats};
pub use render::{ActiveDisplay, AdmissionExhausted, Stage};
pub use scheduler::ActivationLoop;
pub use store::{ItemStore, StatusCounts};
pub use types::{Color, CommentId, CommentItem, CommentKind, DisplayStatus, EngineState};
