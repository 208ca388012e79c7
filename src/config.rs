//! Configuration management for the overlay pipeline.
//!
//! Loads configuration from TOML files and provides runtime defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub extraction: ExtractionConfig,

    #[serde(default)]
    pub prediction: PredictionConfig,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub font: FontConfig,

    #[serde(default)]
    pub theme: ThemeConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Whether the overlay is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Minimum spacing between processed snapshot notifications
    #[serde(default = "default_debounce_interval")]
    pub debounce_interval_ms: u64,

    /// How long an unseen element survives before it is expired
    #[serde(default = "default_element_timeout")]
    pub element_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            debounce_interval_ms: default_debounce_interval(),
            element_timeout_ms: default_element_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Nodes beyond this count are dropped in traversal order
    #[serde(default = "default_max_nodes")]
    pub max_nodes_per_frame: usize,

    /// Width and height must both exceed this
    #[serde(default = "default_min_element_size")]
    pub min_element_size: f32,

    /// Bounds must lie within [0, max_coordinate] on both axes
    #[serde(default = "default_max_coordinate")]
    pub max_coordinate: f32,

    /// Traversal stops descending below this depth
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_nodes_per_frame: default_max_nodes(),
            min_element_size: default_min_element_size(),
            max_coordinate: default_max_coordinate(),
            max_depth: default_max_depth(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionConfig {
    /// Variance added per second of elapsed time
    #[serde(default = "default_process_noise")]
    pub process_noise: f32,

    /// Measurement variance (observation jitter)
    #[serde(default = "default_measurement_noise")]
    pub measurement_noise: f32,

    /// Variance assigned on cold start
    #[serde(default = "default_initial_error")]
    pub initial_error: f32,

    /// Lookahead used for lag compensation
    #[serde(default = "default_prediction_time")]
    pub prediction_time_ms: f32,

    #[serde(default = "default_min_dt")]
    pub min_dt_ms: u64,

    #[serde(default = "default_max_dt")]
    pub max_dt_ms: u64,

    /// Speed (units/s) above which scrolling counts as fast
    #[serde(default = "default_fast_scroll_threshold")]
    pub fast_scroll_threshold: f32,

    /// Vertical speed (units/s) that counts as scrolling up or down
    #[serde(default = "default_scroll_direction_threshold")]
    pub scroll_direction_threshold: f32,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            process_noise: default_process_noise(),
            measurement_noise: default_measurement_noise(),
            initial_error: default_initial_error(),
            prediction_time_ms: default_prediction_time(),
            min_dt_ms: default_min_dt(),
            max_dt_ms: default_max_dt(),
            fast_scroll_threshold: default_fast_scroll_threshold(),
            scroll_direction_threshold: default_scroll_direction_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of idle predictors kept for reuse
    #[serde(default = "default_pool_size")]
    pub max_size: usize,

    /// Predictors created up front
    #[serde(default = "default_pool_prefill")]
    pub prefill: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: default_pool_size(),
            prefill: default_pool_prefill(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// In-memory translations beyond this count are not cached
    #[serde(default = "default_max_memory_entries")]
    pub max_memory_entries: usize,

    /// Upper bound on a single backend call
    #[serde(default = "default_translate_timeout")]
    pub translate_timeout_ms: u64,

    /// SQLite dictionary location (in-memory store when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dictionary_path: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_memory_entries: default_max_memory_entries(),
            translate_timeout_ms: default_translate_timeout(),
            dictionary_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FontConfig {
    /// Font size estimate as a multiple of box height
    #[serde(default = "default_height_multiplier")]
    pub height_multiplier: f32,

    /// Average glyph width as a fraction of font size
    #[serde(default = "default_char_width_factor")]
    pub average_char_width_factor: f32,

    #[serde(default = "default_min_font_size")]
    pub min_size: f32,

    #[serde(default = "default_max_font_size")]
    pub max_size: f32,
}

impl Default for FontConfig {
    fn default() -> Self {
        Self {
            height_multiplier: default_height_multiplier(),
            average_char_width_factor: default_char_width_factor(),
            min_size: default_min_font_size(),
            max_size: default_max_font_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThemeConfig {
    /// Overlay text color as [r, g, b]
    #[serde(default = "default_text_color")]
    pub text_color: [u8; 3],
}

impl Default for ThemeConfig {
    fn default() -> Self {
        Self {
            text_color: default_text_color(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Frames buffered between the pipeline and the renderer
    #[serde(default = "default_frame_channel_capacity")]
    pub frame_channel_capacity: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            frame_channel_capacity: default_frame_channel_capacity(),
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_debounce_interval() -> u64 {
    50
}

fn default_element_timeout() -> u64 {
    500
}

fn default_max_nodes() -> usize {
    128
}

fn default_min_element_size() -> f32 {
    10.0
}

fn default_max_coordinate() -> f32 {
    4096.0
}

fn default_max_depth() -> usize {
    100
}

fn default_process_noise() -> f32 {
    0.01
}

fn default_measurement_noise() -> f32 {
    0.1
}

fn default_initial_error() -> f32 {
    1.0
}

fn default_prediction_time() -> f32 {
    16.0
}

fn default_min_dt() -> u64 {
    1
}

fn default_max_dt() -> u64 {
    100
}

fn default_fast_scroll_threshold() -> f32 {
    500.0
}

fn default_scroll_direction_threshold() -> f32 {
    50.0
}

fn default_pool_size() -> usize {
    256
}

fn default_pool_prefill() -> usize {
    32
}

fn default_max_memory_entries() -> usize {
    10_000
}

fn default_translate_timeout() -> u64 {
    5_000
}

fn default_height_multiplier() -> f32 {
    2.0
}

fn default_char_width_factor() -> f32 {
    0.6
}

fn default_min_font_size() -> f32 {
    30.0
}

fn default_max_font_size() -> f32 {
    150.0
}

fn default_text_color() -> [u8; 3] {
    [0, 0, 0]
}

fn default_frame_channel_capacity() -> usize {
    8
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Self {
        Self::load_from_path(Self::default_config_path())
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: PathBuf) -> Self {
        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("Failed to parse config file: {}, using defaults", e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("No config file found at {:?}, using defaults", path);
                Self::default()
            }
        }
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("translation-overlay")
            .join("config.toml")
    }

    /// Save configuration to a specific path
    pub fn save_to_path(&self, path: PathBuf) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

        std::fs::write(&path, contents)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.general.enabled);
        assert_eq!(config.timing.debounce_interval_ms, 50);
        assert_eq!(config.timing.element_timeout_ms, 500);
        assert_eq!(config.extraction.max_nodes_per_frame, 128);
        assert_eq!(config.font.min_size, 30.0);
        assert_eq!(config.font.max_size, 150.0);
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
[general]
log_level = "debug"

[timing]
debounce_interval_ms = 80

[extraction]
max_nodes_per_frame = 64

[theme]
text_color = [255, 255, 255]
"#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.timing.debounce_interval_ms, 80);
        // Unspecified fields in a present section still default
        assert_eq!(config.timing.element_timeout_ms, 500);
        assert_eq!(config.extraction.max_nodes_per_frame, 64);
        assert_eq!(config.theme.text_color, [255, 255, 255]);
        assert_eq!(config.prediction.max_dt_ms, 100);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from_path(dir.path().join("absent.toml"));
        assert_eq!(config.pool.max_size, 256);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.cache.max_memory_entries = 42;
        config.save_to_path(path.clone()).unwrap();

        let reloaded = Config::load_from_path(path);
        assert_eq!(reloaded.cache.max_memory_entries, 42);
    }
}
