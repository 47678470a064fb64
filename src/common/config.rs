use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use crate::common::error::{PanelError, Result};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub camera: CameraConfig,
    pub models: ModelConfig,
    #[serde(default)]
    pub matcher: MatcherConfig,
    pub registry: RegistryConfig,
    #[serde(default)]
    pub detection_log: DetectionLogConfig,
    pub gate: GateConfig,
    pub link: LinkConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CameraConfig {
    pub device_index: u32,
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_warmup_ms")]
    pub warmup_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_warmup_ms() -> u64 { 2000 }
fn default_max_retries() -> u32 { 3 }
fn default_retry_backoff_ms() -> u64 { 500 }

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModelConfig {
    pub detector_path: PathBuf,
    pub recognizer_path: PathBuf,
    #[serde(default = "default_detector_input")]
    pub detector_input_width: u32,
    #[serde(default = "default_detector_input")]
    pub detector_input_height: u32,
    #[serde(default = "default_detection_confidence")]
    pub detection_confidence: f32,
    #[serde(default = "default_recognizer_input")]
    pub recognizer_input_size: u32,
    #[serde(default = "default_normalization")]
    pub normalization_value: f32,
}

fn default_detector_input() -> u32 { 640 }
fn default_detection_confidence() -> f32 { 0.5 }
fn default_recognizer_input() -> u32 { 112 }
fn default_normalization() -> f32 { 127.5 }

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MatcherConfig {
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f32,
    #[serde(default = "default_frame_scale")]
    pub frame_scale: f32,
}

fn default_match_threshold() -> f32 { 0.6 }
fn default_frame_scale() -> f32 { 0.25 }

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            match_threshold: default_match_threshold(),
            frame_scale: default_frame_scale(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RegistryConfig {
    pub authorised_dir: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DetectionLogConfig {
    #[serde(default = "default_log_path")]
    pub path: PathBuf,
    #[serde(default = "default_debounce_secs")]
    pub debounce_secs: u64,
}

fn default_log_path() -> PathBuf { PathBuf::from("face_detections.csv") }
fn default_debounce_secs() -> u64 { 10 }

impl Default for DetectionLogConfig {
    fn default() -> Self {
        Self {
            path: default_log_path(),
            debounce_secs: default_debounce_secs(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GateConfig {
    /// SHA-256 hex digest of the operator password.
    pub password_sha256: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 { 3 }

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LinkConfig {
    pub device: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::default_path())
    }

    /// System config location, with a repo-local fallback for development.
    pub fn default_path() -> PathBuf {
        if let Some(dirs) = directories::ProjectDirs::from("com", "gatewarden", "gatewarden") {
            let path = dirs.config_dir().join("gatewarden.toml");
            if path.exists() {
                return path;
            }
        }
        PathBuf::from("configs/gatewarden.toml")
    }

    pub fn load_from_path(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Err(PanelError::Configuration(format!(
                "Config file not found: {}. Please create it from the example.",
                path.display()
            )));
        }

        tracing::info!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| PanelError::Configuration(format!("Config parse error: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.camera.width == 0 || self.camera.width > 4096 {
            return Err(PanelError::Configuration(format!(
                "Camera width must be between 1 and 4096, got {}", self.camera.width
            )));
        }
        if self.camera.height == 0 || self.camera.height > 4096 {
            return Err(PanelError::Configuration(format!(
                "Camera height must be between 1 and 4096, got {}", self.camera.height
            )));
        }

        if self.matcher.match_threshold <= 0.0 {
            return Err(PanelError::Configuration(format!(
                "Match threshold must be positive, got {}", self.matcher.match_threshold
            )));
        }
        if self.matcher.frame_scale <= 0.0 || self.matcher.frame_scale > 1.0 {
            return Err(PanelError::Configuration(format!(
                "Frame scale must be in (0, 1], got {}", self.matcher.frame_scale
            )));
        }

        if self.models.detection_confidence < 0.0 || self.models.detection_confidence > 1.0 {
            return Err(PanelError::Configuration(format!(
                "Detection confidence must be between 0.0 and 1.0, got {}",
                self.models.detection_confidence
            )));
        }

        if self.detection_log.debounce_secs == 0 {
            return Err(PanelError::Configuration(
                "Detection log debounce must be at least 1 second".into()
            ));
        }

        if self.gate.max_attempts == 0 {
            return Err(PanelError::Configuration(
                "Gate must allow at least one attempt".into()
            ));
        }
        let digest = &self.gate.password_sha256;
        if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(PanelError::Configuration(
                "Gate password_sha256 must be a 64-character hex digest".into()
            ));
        }

        Ok(())
    }
}
