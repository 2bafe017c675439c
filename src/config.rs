use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("no models configured")]
    NoModels,
    #[error("history capacity must be at least 1")]
    InvalidCapacity,
    #[error("encoder quality must be within 1..=100, got {0}")]
    InvalidQuality(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Device,
    Synthetic,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_source")]
    pub source: SourceKind,
    #[serde(default)]
    pub device: i32,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
}

fn default_source() -> SourceKind {
    SourceKind::Device
}

fn default_width() -> u32 {
    640
}

fn default_height() -> u32 {
    480
}

fn default_fps() -> u32 {
    15
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            device: 0,
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionBackend {
    Gaussian,
    Mog2,
}

fn default_motion_backend() -> MotionBackend {
    MotionBackend::Gaussian
}

fn default_min_area() -> u32 {
    500
}

fn default_learning_rate() -> f32 {
    0.005
}

fn default_deviation_threshold() -> f32 {
    2.5
}

#[derive(Debug, Clone, Deserialize)]
pub struct MotionConfig {
    #[serde(default = "default_motion_backend")]
    pub backend: MotionBackend,
    #[serde(default = "default_min_area")]
    pub min_area: u32,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f32,
    #[serde(default = "default_deviation_threshold")]
    pub deviation_threshold: f32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            backend: default_motion_backend(),
            min_area: default_min_area(),
            learning_rate: default_learning_rate(),
            deviation_threshold: default_deviation_threshold(),
        }
    }
}

fn default_history_capacity() -> usize {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_history_capacity(),
        }
    }
}

fn default_quality() -> u8 {
    80
}

#[derive(Debug, Clone, Deserialize)]
pub struct EncoderConfig {
    #[serde(default = "default_quality")]
    pub quality: u8,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            quality: default_quality(),
        }
    }
}

fn default_margin() -> i32 {
    10
}

fn default_line_height() -> i32 {
    40
}

fn default_font_scale() -> f32 {
    24.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnnotateConfig {
    #[serde(default)]
    pub font_path: Option<PathBuf>,
    #[serde(default = "default_margin")]
    pub margin: i32,
    #[serde(default = "default_line_height")]
    pub line_height: i32,
    #[serde(default = "default_font_scale")]
    pub font_scale: f32,
}

impl Default for AnnotateConfig {
    fn default() -> Self {
        Self {
            font_path: None,
            margin: default_margin(),
            line_height: default_line_height(),
            font_scale: default_font_scale(),
        }
    }
}

fn default_http_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: default_http_port(),
        }
    }
}

/// One classifier entry. Array order in the file is registration order.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub category: String,
    pub model_path: PathBuf,
    pub label_path: PathBuf,
    #[serde(default)]
    pub input_width: Option<u32>,
    #[serde(default)]
    pub input_height: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub motion: MotionConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub annotate: AnnotateConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;

        if config.models.is_empty() {
            return Err(ConfigError::NoModels);
        }
        if config.history.capacity == 0 {
            return Err(ConfigError::InvalidCapacity);
        }
        if !(1..=100).contains(&config.encoder.quality) {
            return Err(ConfigError::InvalidQuality(config.encoder.quality));
        }

        Ok(config)
    }
}
