//! Host integration layer
//!
//! Adapters between the engine and the media player that embeds it.
//!
//! # Structure
//! - `plugin.rs` - Plugin lifecycle (install / enable / disable / uninstall)

pub mod plugin;

pub use plugin::{DanmakuPlugin, PluginError, PluginState};
