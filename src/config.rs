//! Engine configuration.
//!
//! Handles loading, validating, and merging `darkroom.toml`. Stock defaults are
//! the base layer; a user file only needs the keys it wants to override.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [tracking]
//! change_threshold = 0.0001 # Changes at or below this are not recorded
//! debounce_ms = 100         # Minimum spacing of detected snapshot deltas
//!
//! [preview]
//! max_edge = 1024           # Longer edge of the interactive preview base
//!
//! [render]
//! max_threads = 4           # Render pool size (omit for auto = CPU cores)
//!
//! [history]
//! compact_after_commit = false
//!
//! [presets]
//! library = "looks.json"    # Extra presets merged over the built-ins
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::catalog::FilterProperty;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Engine configuration loaded from `darkroom.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Change detection thresholds for delta generation.
    pub tracking: TrackingConfig,
    /// Interactive preview settings.
    pub preview: PreviewConfig,
    /// Render pool settings.
    pub render: RenderConfig,
    pub history: HistoryConfig,
    pub presets: PresetsConfig,
}

impl EngineConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.tracking.change_threshold;
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(ConfigError::Validation(
                "tracking.change_threshold must be a non-negative number".into(),
            ));
        }
        let finest_step = FilterProperty::ALL
            .iter()
            .map(|p| p.info().step)
            .fold(f32::INFINITY, f32::min);
        if threshold >= finest_step {
            return Err(ConfigError::Validation(format!(
                "tracking.change_threshold must be below the finest adjustment step ({finest_step})"
            )));
        }
        if self.preview.max_edge == 0 {
            return Err(ConfigError::Validation(
                "preview.max_edge must be non-zero".into(),
            ));
        }
        if self.render.max_threads == Some(0) {
            return Err(ConfigError::Validation(
                "render.max_threads must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackingConfig {
    /// Changes no larger than this are not recorded.
    pub change_threshold: f32,
    /// Minimum spacing in milliseconds between deltas produced from snapshots.
    pub debounce_ms: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            change_threshold: 0.0001,
            debounce_ms: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PreviewConfig {
    /// Longer edge in pixels of the downsampled preview base.
    pub max_edge: u32,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self { max_edge: 1024 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    /// Maximum number of render threads.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_threads: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HistoryConfig {
    /// Merge adjacent same-property operations when a commit is requested.
    pub compact_after_commit: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PresetsConfig {
    /// JSON preset library loaded on top of the built-in looks.
    pub library: Option<String>,
}

/// Size of the render pool.
///
/// Without `max_threads` the pool gets one worker per core. A configured
/// value can lower that but never raise it.
pub fn effective_threads(config: &RenderConfig) -> usize {
    let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
    match config.max_threads {
        Some(requested) => requested.min(cores),
        None => cores,
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// [`EngineConfig::default`] as a TOML table, the bottom layer every
/// `darkroom.toml` is merged onto.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(EngineConfig::default())?)
}

/// Lay a user table over the stock one.
///
/// Sections merge key by key, so a file holding only `[preview] max_edge`
/// keeps the stock `[tracking]` and `[history]` values. Anything that is not
/// a table on both sides is replaced by the user's value.
pub fn merge_toml(stock: toml::Value, user: toml::Value) -> toml::Value {
    match (stock, user) {
        (toml::Value::Table(mut sections), toml::Value::Table(overrides)) => {
            for (key, value) in overrides {
                let merged = match sections.remove(&key) {
                    Some(stock_value) => merge_toml(stock_value, value),
                    None => value,
                };
                sections.insert(key, merged);
            }
            toml::Value::Table(sections)
        }
        (_, user) => user,
    }
}

/// Parse `darkroom.toml` without interpreting it.
///
/// A missing file is `Ok(None)`: the engine runs on stock settings. Any other
/// read failure or malformed TOML is an error.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    Ok(Some(toml::from_str(&content)?))
}

/// Merge the user layer (if any) over `stock`, deserialize into an
/// [`EngineConfig`] and validate it.
pub fn resolve_config(
    stock: toml::Value,
    user: Option<toml::Value>,
) -> Result<EngineConfig, ConfigError> {
    let merged = user.into_iter().fold(stock, merge_toml);
    let config: EngineConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `path`, falling back to stock defaults when absent.
pub fn load_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(path)?;
    let config = resolve_config(base, overlay)?;
    tracing::debug!(path = %path.display(), "configuration loaded");
    Ok(config)
}

/// Returns a fully-commented stock `darkroom.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Darkroom Configuration
# ======================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Change tracking
# ---------------------------------------------------------------------------
[tracking]
# Value changes at or below this size are not recorded as deltas.
# Must stay below the finest adjustment step (0.001) or one-step edits vanish.
change_threshold = 0.0001
# Minimum spacing in milliseconds between deltas detected from snapshots.
debounce_ms = 100

# ---------------------------------------------------------------------------
# Interactive preview
# ---------------------------------------------------------------------------
[preview]
# Longer edge in pixels of the downsampled image used while editing.
max_edge = 1024

# ---------------------------------------------------------------------------
# Rendering
# ---------------------------------------------------------------------------
[render]
# Maximum render threads. Omit to use all CPU cores.
# Values above the core count are clamped down.
# max_threads = 4

# ---------------------------------------------------------------------------
# History
# ---------------------------------------------------------------------------
[history]
# Merge adjacent edits of the same adjustment when a full render is requested.
compact_after_commit = false

# ---------------------------------------------------------------------------
# Presets
# ---------------------------------------------------------------------------
[presets]
# JSON file of extra looks, merged over the built-in presets.
# library = "looks.json"
"##
}
