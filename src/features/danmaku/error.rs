//! Error types for the danmaku engine
//!
//! Validation failures are synchronous and local to the call that caused
//! them. Remote failures are reported through `DanmakuEvent`s.

use super::types::CommentId;

/// A comment item that cannot enter the store
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Scheduled time is below zero
    NegativeTime(f64),
    /// Scheduled time is NaN or infinite
    NonFiniteTime,
    /// Text is empty or whitespace only
    EmptyText,
    /// An item with the same id is already stored
    DuplicateId(CommentId),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::NegativeTime(t) => write!(f, "scheduled time {} is negative", t),
            ValidationError::NonFiniteTime => write!(f, "scheduled time is not finite"),
            ValidationError::EmptyText => write!(f, "comment text is empty"),
            ValidationError::DuplicateId(id) => write!(f, "comment {} already exists", id),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Errors surfaced by `CommentManager`
#[derive(Debug, Clone, PartialEq)]
pub enum DanmakuError {
    /// Malformed item rejected at ingestion
    Validation(ValidationError),
    /// Remote write failed; the comment is still shown locally
    RemoteSend(String),
    /// Remote collection could not be fetched or parsed
    Load(String),
    /// The engine was torn down
    Destroyed,
}

impl std::fmt::Display for DanmakuError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DanmakuError::Validation(e) => write!(f, "Invalid comment: {}", e),
            DanmakuError::RemoteSend(e) => write!(f, "Send failed: {}", e),
            DanmakuError::Load(e) => write!(f, "Load failed: {}", e),
            DanmakuError::Destroyed => write!(f, "Engine has been destroyed"),
        }
    }
}

impl std::error::Error for DanmakuError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DanmakuError::Validation(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ValidationError> for DanmakuError {
    fn from(e: ValidationError) -> Self {
        DanmakuError::Validation(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = DanmakuError::from(ValidationError::NegativeTime(-1.5));
        assert_eq!(err.to_string(), "Invalid comment: scheduled time -1.5 is negative");
        assert_eq!(
            DanmakuError::Load("bad json".to_string()).to_string(),
            "Load failed: bad json"
        );
    }

    #[test]
    fn test_validation_is_source() {
        use std::error::Error;
        let err = DanmakuError::Validation(ValidationError::EmptyText);
        assert!(err.source().is_some());
        assert!(DanmakuError::Destroyed.source().is_none());
    }
}
