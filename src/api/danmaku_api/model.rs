//! Comment wire format
//!
//! Remote collections arrive as JSON records
//! `{text, time, type, color, fontSize}`, either as a bare array or wrapped
//! in `{"data": [...]}`. Several producers disagree on field encodings, so
//! `type` and `color` accept more than one shape.

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::features::danmaku::{Color, CommentItem, CommentKind};

#[derive(Deserialize)]
#[serde(untagged)]
enum KindRepr {
    Code(u8),
    Name(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ColorRepr {
    Int(u32),
    Hex(String),
}

fn de_kind<'de, D>(deserializer: D) -> std::result::Result<CommentKind, D::Error>
where
    D: Deserializer<'de>,
{
    match KindRepr::deserialize(deserializer)? {
        KindRepr::Code(code) => CommentKind::from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown comment type {}", code))),
        KindRepr::Name(name) => name.parse().map_err(serde::de::Error::custom),
    }
}

fn ser_kind<S>(kind: &CommentKind, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u8(kind.code())
}

fn de_color<'de, D>(deserializer: D) -> std::result::Result<Color, D::Error>
where
    D: Deserializer<'de>,
{
    match ColorRepr::deserialize(deserializer)? {
        ColorRepr::Int(value) => Ok(Color(value & 0xFF_FF_FF)),
        ColorRepr::Hex(hex) => hex.parse().map_err(serde::de::Error::custom),
    }
}

/// One comment as exchanged with a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentRecord {
    #[serde(alias = "content")]
    pub text: String,
    /// Seconds on the playback clock
    pub time: f64,
    #[serde(
        rename = "type",
        default,
        deserialize_with = "de_kind",
        serialize_with = "ser_kind"
    )]
    pub kind: CommentKind,
    #[serde(default, deserialize_with = "de_color")]
    pub color: Color,
    #[serde(rename = "fontSize", default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub priority: i32,
}

fn is_zero(value: &i32) -> bool {
    *value == 0
}

impl CommentRecord {
    /// Build an engine item with a fresh id
    pub fn into_item(self) -> CommentItem {
        let mut item = CommentItem::new(self.text, self.time)
            .with_kind(self.kind)
            .with_color(self.color)
            .with_priority(self.priority);
        item.font_size = self.font_size;
        item.user = self.user;
        item
    }
}

impl From<&CommentItem> for CommentRecord {
    fn from(item: &CommentItem) -> Self {
        Self {
            text: item.text.clone(),
            time: item.scheduled_time,
            kind: item.kind,
            color: item.color,
            font_size: item.font_size,
            user: item.user.clone(),
            priority: item.priority,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Payload {
    List(Vec<CommentRecord>),
    Wrapped { data: Vec<CommentRecord> },
}

/// Parse a remote collection body
///
/// Any malformed record fails the whole body.
pub fn parse_comments(body: &str) -> Result<Vec<CommentItem>> {
    let payload: Payload =
        serde_json::from_str(body).context("response is not a comment collection")?;
    let records = match payload {
        Payload::List(records) => records,
        Payload::Wrapped { data } => data,
    };
    Ok(records.into_iter().map(CommentRecord::into_item).collect())
}
