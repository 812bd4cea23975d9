//! Core data types for the danmaku engine
//!
//! A `CommentItem` is immutable once created. Everything that changes while
//! an item is on screen (status, lane, pool handle) is tracked by the engine.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use super::error::ValidationError;

/// Counter for generating unique comment ids
static COMMENT_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique comment identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommentId(pub u64);

impl CommentId {
    /// Allocate a fresh process-wide id
    pub fn next() -> Self {
        Self(COMMENT_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for CommentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a comment moves across the surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentKind {
    /// Flows right to left across the surface
    #[default]
    Scroll,
    /// Pinned to the top, centered
    Top,
    /// Pinned to the bottom, centered
    Bottom,
}

impl CommentKind {
    /// Wire code used by most danmaku backends (0 = scroll, 1 = top, 2 = bottom)
    pub fn code(&self) -> u8 {
        match self {
            CommentKind::Scroll => 0,
            CommentKind::Top => 1,
            CommentKind::Bottom => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(CommentKind::Scroll),
            1 => Some(CommentKind::Top),
            2 => Some(CommentKind::Bottom),
            _ => None,
        }
    }

    pub fn is_fixed(&self) -> bool {
        !matches!(self, CommentKind::Scroll)
    }
}

impl FromStr for CommentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scroll" | "right" | "flow" | "0" => Ok(CommentKind::Scroll),
            "top" | "1" => Ok(CommentKind::Top),
            "bottom" | "2" => Ok(CommentKind::Bottom),
            other => Err(format!("unknown comment type: {}", other)),
        }
    }
}

impl fmt::Display for CommentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommentKind::Scroll => write!(f, "scroll"),
            CommentKind::Top => write!(f, "top"),
            CommentKind::Bottom => write!(f, "bottom"),
        }
    }
}

/// 24-bit RGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color(pub u32);

impl Color {
    pub const WHITE: Self = Self(0xFF_FF_FF);

    pub fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        Self(((r as u32) << 16) | ((g as u32) << 8) | b as u32)
    }

    pub fn rgb(&self) -> (u8, u8, u8) {
        (
            ((self.0 >> 16) & 0xFF) as u8,
            ((self.0 >> 8) & 0xFF) as u8,
            (self.0 & 0xFF) as u8,
        )
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

impl FromStr for Color {
    type Err = String;

    /// Accepts `#rgb`, `#rrggbb` and the same without the leading `#`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim().trim_start_matches('#');
        let parse = |h: &str| u32::from_str_radix(h, 16).map_err(|e| format!("{}: {}", s, e));
        match hex.len() {
            3 => {
                let short = parse(hex)?;
                let (r, g, b) = ((short >> 8) & 0xF, (short >> 4) & 0xF, short & 0xF);
                Ok(Self((r * 0x11) << 16 | (g * 0x11) << 8 | b * 0x11))
            }
            6 => Ok(Self(parse(hex)?)),
            _ => Err(format!("invalid color: {}", s)),
        }
    }
}

impl TryFrom<String> for Color {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_string()
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:06x}", self.0 & 0xFF_FF_FF)
    }
}

/// A single timed comment
#[derive(Debug, Clone, PartialEq)]
pub struct CommentItem {
    pub id: CommentId,
    pub text: String,
    /// Seconds on the external playback clock
    pub scheduled_time: f64,
    pub kind: CommentKind,
    pub color: Color,
    /// Falls back to the engine font size when `None`
    pub font_size: Option<f32>,
    /// Higher priority items are admitted first within a tick
    pub priority: i32,
    /// Author, used by the user blocklist
    pub user: Option<String>,
}

impl CommentItem {
    /// Create a scrolling white comment with a fresh id
    pub fn new(text: impl Into<String>, scheduled_time: f64) -> Self {
        Self {
            id: CommentId::next(),
            text: text.into(),
            scheduled_time,
            kind: CommentKind::Scroll,
            color: Color::WHITE,
            font_size: None,
            priority: 0,
            user: None,
        }
    }

    pub fn with_id(mut self, id: CommentId) -> Self {
        self.id = id;
        self
    }

    pub fn with_kind(mut self, kind: CommentKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    pub fn with_font_size(mut self, font_size: f32) -> Self {
        self.font_size = Some(font_size);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Check the item can enter the store
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.scheduled_time.is_finite() {
            return Err(ValidationError::NonFiniteTime);
        }
        if self.scheduled_time < 0.0 {
            return Err(ValidationError::NegativeTime(self.scheduled_time));
        }
        if self.text.trim().is_empty() {
            return Err(ValidationError::EmptyText);
        }
        Ok(())
    }

    /// Scheduled time in whole milliseconds, the store's index key
    pub fn scheduled_ms(&self) -> u64 {
        seconds_to_ms(self.scheduled_time)
    }
}

/// Convert clock seconds to index milliseconds, saturating at zero
pub(crate) fn seconds_to_ms(seconds: f64) -> u64 {
    if seconds.is_finite() && seconds > 0.0 {
        (seconds * 1000.0).round() as u64
    } else {
        0
    }
}

/// Per-item display state owned by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisplayStatus {
    /// Waiting for its activation window
    Pending,
    /// On screen, holding a lane and a pool handle
    Active,
    /// Finished displaying, or dropped after its window elapsed
    Done,
    /// Rejected by the content filter at ingestion
    Filtered,
}

impl DisplayStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DisplayStatus::Filtered)
    }
}

/// Engine-level run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    #[default]
    Running,
    Paused,
    Destroyed,
}
