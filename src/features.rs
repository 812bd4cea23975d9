//! Feature modules - engine logic separated from host bindings
//!
//! Features should not depend on the platform layer directly.

pub mod danmaku;
pub mod settings;

pub use settings::{ConfigFileError, EngineConfig, FilterRules};
