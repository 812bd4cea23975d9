//! Comment backend module
//!
//! Provides the wire format and HTTP client used by remote load and send.

pub mod danmaku_api;

pub use danmaku_api::{CommentBackend, CommentRecord, HttpBackend, parse_comments};
