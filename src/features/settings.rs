//! Engine configuration persistence
//!
//! Handles clamping, saving and loading danmaku preferences.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Ingestion filter rules
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterRules {
    /// Case-insensitive substrings that reject a comment
    pub keywords: Vec<String>,
    /// Regular expressions that reject a comment
    pub patterns: Vec<String>,
    /// Maximum text length in characters
    pub max_length: Option<usize>,
    /// Authors whose comments are rejected
    pub blocked_users: Vec<String>,
    /// Reject identical text scheduled within this many seconds
    pub dedup_window: Option<f64>,
}

/// Danmaku engine settings
///
/// Every value is clamped into range rather than rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Overlay opacity (0.0 to 1.0)
    pub opacity: f32,
    /// Scroll speed multiplier (0.1 to 5.0)
    pub speed_multiplier: f64,
    /// Default font size in logical pixels
    pub font_size: f32,
    /// Maximum comments on screen at once
    pub max_concurrent: usize,
    /// Maximum idle display objects kept for reuse
    pub pool_capacity: usize,
    /// Target activation frequency (Hz)
    pub tick_rate: f64,
    /// Hard cap on activation frequency (Hz)
    pub frame_rate_cap: f64,
    /// Allowed overlap between windows sharing a lane (seconds)
    pub collision_margin: f64,
    /// Half-width of the activation window (seconds)
    pub activation_epsilon: f64,
    /// Display time of top/bottom comments (seconds)
    pub fixed_duration: f64,
    /// Time for a scroll comment to cross the surface width at speed 1.0
    pub scroll_duration: f64,
    /// Fraction of the surface height used by scroll lanes
    pub display_area: f32,
    /// Lane band height as a multiple of the font size
    pub line_height: f32,
    /// Endpoint that receives locally sent comments
    pub send_endpoint: Option<String>,
    /// Network timeout for load/send (seconds)
    pub request_timeout_secs: u64,
    /// Ingestion filter rules
    pub filter: FilterRules,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            opacity: 1.0,
            speed_multiplier: 1.0,
            font_size: 25.0,
            max_concurrent: 200,
            pool_capacity: 100,
            tick_rate: 60.0,
            frame_rate_cap: 60.0,
            collision_margin: 0.0,
            activation_epsilon: 0.5,
            fixed_duration: 3.0,
            scroll_duration: 3.0,
            display_area: 1.0,
            line_height: 1.25,
            send_endpoint: None,
            request_timeout_secs: 10,
            filter: FilterRules::default(),
        }
    }
}

pub const OPACITY_RANGE: (f32, f32) = (0.0, 1.0);
pub const SPEED_RANGE: (f64, f64) = (0.1, 5.0);
pub const FONT_SIZE_RANGE: (f32, f32) = (8.0, 96.0);
pub const FRAME_RATE_RANGE: (f64, f64) = (1.0, 240.0);

/// Clamp a value, warning when it was out of range
fn clamp_f32(name: &str, value: f32, (min, max): (f32, f32), fallback: f32) -> f32 {
    if !value.is_finite() {
        warn!("{} is not finite, using {}", name, fallback);
        return fallback;
    }
    let clamped = value.clamp(min, max);
    if clamped != value {
        warn!("{} {} out of range, clamped to {}", name, value, clamped);
    }
    clamped
}

fn clamp_f64(name: &str, value: f64, (min, max): (f64, f64), fallback: f64) -> f64 {
    if !value.is_finite() {
        warn!("{} is not finite, using {}", name, fallback);
        return fallback;
    }
    let clamped = value.clamp(min, max);
    if clamped != value {
        warn!("{} {} out of range, clamped to {}", name, value, clamped);
    }
    clamped
}

pub fn clamp_opacity(value: f32) -> f32 {
    clamp_f32("opacity", value, OPACITY_RANGE, 1.0)
}

pub fn clamp_speed(value: f64) -> f64 {
    clamp_f64("speed_multiplier", value, SPEED_RANGE, 1.0)
}

pub fn clamp_font_size(value: f32) -> f32 {
    clamp_f32("font_size", value, FONT_SIZE_RANGE, 25.0)
}

impl EngineConfig {
    /// Return a copy with every field in range
    pub fn clamped(mut self) -> Self {
        let defaults = Self::default();
        self.opacity = clamp_opacity(self.opacity);
        self.speed_multiplier = clamp_speed(self.speed_multiplier);
        self.font_size = clamp_font_size(self.font_size);
        if self.max_concurrent == 0 {
            warn!("max_concurrent 0 out of range, clamped to 1");
            self.max_concurrent = 1;
        }
        self.frame_rate_cap = clamp_f64(
            "frame_rate_cap",
            self.frame_rate_cap,
            FRAME_RATE_RANGE,
            defaults.frame_rate_cap,
        );
        self.tick_rate = clamp_f64(
            "tick_rate",
            self.tick_rate,
            (FRAME_RATE_RANGE.0, self.frame_rate_cap),
            defaults.tick_rate.min(self.frame_rate_cap),
        );
        self.collision_margin = clamp_f64(
            "collision_margin",
            self.collision_margin,
            (0.0, 10.0),
            defaults.collision_margin,
        );
        self.activation_epsilon = clamp_f64(
            "activation_epsilon",
            self.activation_epsilon,
            (0.01, 10.0),
            defaults.activation_epsilon,
        );
        self.fixed_duration = clamp_f64(
            "fixed_duration",
            self.fixed_duration,
            (0.5, 30.0),
            defaults.fixed_duration,
        );
        self.scroll_duration = clamp_f64(
            "scroll_duration",
            self.scroll_duration,
            (1.0, 60.0),
            defaults.scroll_duration,
        );
        self.display_area = clamp_f32(
            "display_area",
            self.display_area,
            (0.1, 1.0),
            defaults.display_area,
        );
        self.line_height = clamp_f32(
            "line_height",
            self.line_height,
            (1.0, 3.0),
            defaults.line_height,
        );
        if self.request_timeout_secs == 0 {
            self.request_timeout_secs = 1;
        }
        self
    }

    /// Lane band height in logical pixels
    pub fn band_height(&self) -> f32 {
        self.font_size * self.line_height
    }

    /// Effective activation frequency
    pub fn activation_rate(&self) -> f64 {
        self.tick_rate.min(self.frame_rate_cap).max(FRAME_RATE_RANGE.0)
    }

    /// Get the config file path
    pub fn file_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "danmaku", "Danmaku")
            .map(|dirs| dirs.config_dir().join("engine.json"))
    }

    /// Load config from file, or return defaults if not found
    pub fn load() -> Self {
        Self::file_path()
            .and_then(|path| Self::load_from_file(&path).ok())
            .unwrap_or_default()
    }

    /// Load config from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigFileError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigFileError::Io(e.to_string()))?;
        serde_json::from_str::<Self>(&content)
            .map(Self::clamped)
            .map_err(|e| ConfigFileError::Parse(e.to_string()))
    }

    /// Save config to the default file
    pub fn save(&self) -> Result<(), ConfigFileError> {
        if let Some(path) = Self::file_path() {
            self.save_to_file(&path)
        } else {
            Err(ConfigFileError::Io(
                "Could not determine config directory".to_string(),
            ))
        }
    }

    /// Save config to a specific file
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigFileError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigFileError::Io(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigFileError::Parse(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigFileError::Io(e.to_string()))?;
        Ok(())
    }
}

/// Errors that can occur with config persistence
#[derive(Debug, Clone)]
pub enum ConfigFileError {
    Io(String),
    Parse(String),
}

impl std::fmt::Display for ConfigFileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigFileError::Io(e) => write!(f, "IO error: {}", e),
            ConfigFileError::Parse(e) => write!(f, "Parse error: {}", e),
        }
    }
}

impl std::error::Error for ConfigFileError {}
