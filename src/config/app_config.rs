//! Application Configuration - every tunable as a TOML value
//!
//! Each section implements `Default` with the values in
//! [`super::defaults`], so missing sections and missing keys behave exactly
//! like the built-in deployment.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::defaults;

/// Environment variable holding an explicit config path.
pub const CONFIG_ENV_VAR: &str = "ROTORWATCH_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "rotorwatch.toml";

/// Environment variable overriding `server.addr`.
pub const ADDR_ENV_VAR: &str = "ROTORWATCH_ADDR";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration.
///
/// Load with `AppConfig::load()` which searches:
/// 1. `$ROTORWATCH_CONFIG`
/// 2. `./rotorwatch.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Persisted model artifacts and inference contract
    #[serde(default)]
    pub model: ModelConfig,

    /// Training hyperparameters
    #[serde(default)]
    pub training: TrainingConfig,

    /// Raw corpus → chunk corpus conversion
    #[serde(default)]
    pub preprocess: PreprocessConfig,
}

impl AppConfig {
    /// Load configuration using the standard search order.
    ///
    /// A file that exists but fails to parse or validate is an error: running
    /// with silently different chunk lengths would corrupt every prediction.
    pub fn load() -> Result<Self, ConfigError> {
        // 1. Check env var
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                let config = Self::load_from_file(&p)?;
                info!(path = %p.display(), "Loaded config from {}", CONFIG_ENV_VAR);
                return Ok(config);
            }
            warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
        }

        // 2. Check ./rotorwatch.toml
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            let config = Self::load_from_file(&local)?;
            info!("Loaded config from ./{}", LOCAL_CONFIG_FILE);
            return Ok(config);
        }

        // 3. Defaults
        info!("No {} found, using built-in defaults", LOCAL_CONFIG_FILE);
        Ok(Self::default())
    }

    /// Load `path` when given (missing file is an error), otherwise use the
    /// standard search order.
    pub fn load_or_default_search(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => {
                let config = Self::load_from_file(p)?;
                info!(path = %p.display(), "Loaded config from command line");
                Ok(config)
            }
            None => Self::load(),
        }
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Bind address after applying the `ROTORWATCH_ADDR` override.
    pub fn server_addr(&self) -> String {
        std::env::var(ADDR_ENV_VAR).unwrap_or_else(|_| self.server.addr.clone())
    }

    /// Validate all values for internal consistency.
    ///
    /// Rules:
    /// - Sample counts, epochs and batch size must be > 0
    /// - Learning rate must be finite and > 0, gamma in (0, 1]
    /// - Train fraction strictly between 0 and 1
    /// - Inference length must equal the preprocessing chunk length
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        let m = &self.model;
        if m.expected_samples == 0 {
            errors.push("model.expected_samples must be > 0".to_string());
        }
        if m.fallback_label.trim().is_empty() {
            errors.push("model.fallback_label must not be empty".to_string());
        }

        let t = &self.training;
        if t.epochs == 0 {
            errors.push("training.epochs must be > 0".to_string());
        }
        if t.batch_size == 0 {
            errors.push("training.batch_size must be > 0".to_string());
        }
        if !t.learning_rate.is_finite() || t.learning_rate <= 0.0 {
            errors.push(format!(
                "training.learning_rate must be a finite value > 0, got {}",
                t.learning_rate
            ));
        }
        if t.lr_step_epochs == 0 {
            errors.push("training.lr_step_epochs must be > 0".to_string());
        }
        if !(t.lr_gamma > 0.0 && t.lr_gamma <= 1.0) {
            errors.push(format!(
                "training.lr_gamma must be in (0, 1], got {}",
                t.lr_gamma
            ));
        }
        if !(t.train_fraction > 0.0 && t.train_fraction < 1.0) {
            errors.push(format!(
                "training.train_fraction must be in (0, 1), got {}",
                t.train_fraction
            ));
        }

        let p = &self.preprocess;
        if p.sample_rate_hz == 0 || p.chunk_seconds == 0 {
            errors.push("preprocess.sample_rate_hz and chunk_seconds must be > 0".to_string());
        } else if p.chunk_samples() != m.expected_samples {
            errors.push(format!(
                "preprocess chunk length ({} = {} Hz x {} s) must equal model.expected_samples ({})",
                p.chunk_samples(),
                p.sample_rate_hz,
                p.chunk_seconds,
                m.expected_samples
            ));
        }

        if self.server.max_body_bytes == 0 {
            errors.push("server.max_body_bytes must be > 0".to_string());
        }
        if self.server.request_timeout_secs == 0 {
            errors.push("server.request_timeout_secs must be > 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Server
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server bind address.
    ///
    /// Can be overridden by `ROTORWATCH_ADDR` env var or `--addr` CLI flag.
    #[serde(default = "default_server_addr")]
    pub addr: String,

    /// Maximum request body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Per-request timeout in seconds. Requests still running after this
    /// get a 408; the blocking forward pass itself is not cancelled.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_server_addr() -> String {
    defaults::SERVER_ADDR.to_string()
}

fn default_max_body_bytes() -> usize {
    defaults::MAX_BODY_BYTES
}

fn default_request_timeout_secs() -> u64 {
    defaults::REQUEST_TIMEOUT_SECS
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_server_addr(),
            max_body_bytes: default_max_body_bytes(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

// ============================================================================
// Model
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Safetensors file holding every parameter tensor.
    #[serde(default = "default_weights_path")]
    pub weights_path: PathBuf,

    /// `<index>:<name>` class mapping written by the trainer.
    #[serde(default = "default_registry_path")]
    pub registry_path: PathBuf,

    /// Exact sample count of one inference chunk.
    #[serde(default = "default_expected_samples")]
    pub expected_samples: usize,

    /// Label reported when the predicted index has no registry entry.
    #[serde(default = "default_fallback_label")]
    pub fallback_label: String,
}

fn default_weights_path() -> PathBuf {
    PathBuf::from(defaults::WEIGHTS_FILE)
}

fn default_registry_path() -> PathBuf {
    PathBuf::from(defaults::REGISTRY_FILE)
}

fn default_expected_samples() -> usize {
    defaults::CHUNK_SAMPLES
}

fn default_fallback_label() -> String {
    defaults::FALLBACK_LABEL.to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            weights_path: default_weights_path(),
            registry_path: default_registry_path(),
            expected_samples: default_expected_samples(),
            fallback_label: default_fallback_label(),
        }
    }
}

// ============================================================================
// Training
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Chunk corpus root: one subdirectory of `.npy` files per class.
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,

    #[serde(default = "default_epochs")]
    pub epochs: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Adam base learning rate.
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    /// Epochs between step decays of the learning rate.
    #[serde(default = "default_lr_step_epochs")]
    pub lr_step_epochs: usize,

    /// Multiplicative decay applied every `lr_step_epochs`.
    #[serde(default = "default_lr_gamma")]
    pub lr_gamma: f64,

    /// Share of chunks used for training; the remainder is validation.
    #[serde(default = "default_train_fraction")]
    pub train_fraction: f64,

    /// Seed for weight init, split, shuffling and dropout.
    /// Unset means a fresh entropy seed per run (not reproducible).
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_data_root() -> PathBuf {
    PathBuf::from(defaults::CHUNK_CORPUS_DIR)
}

fn default_epochs() -> usize {
    defaults::TRAIN_EPOCHS
}

fn default_batch_size() -> usize {
    defaults::TRAIN_BATCH_SIZE
}

fn default_learning_rate() -> f64 {
    defaults::TRAIN_LEARNING_RATE
}

fn default_lr_step_epochs() -> usize {
    defaults::LR_STEP_EPOCHS
}

fn default_lr_gamma() -> f64 {
    defaults::LR_GAMMA
}

fn default_train_fraction() -> f64 {
    defaults::TRAIN_FRACTION
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            epochs: default_epochs(),
            batch_size: default_batch_size(),
            learning_rate: default_learning_rate(),
            lr_step_epochs: default_lr_step_epochs(),
            lr_gamma: default_lr_gamma(),
            train_fraction: default_train_fraction(),
            seed: None,
        }
    }
}

// ============================================================================
// Preprocess
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessConfig {
    /// Raw corpus root: one subdirectory of CSV files per class.
    #[serde(default = "default_input_root")]
    pub input_root: PathBuf,

    /// Where the `.npy` chunk corpus is written.
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,

    #[serde(default = "default_sample_rate_hz")]
    pub sample_rate_hz: usize,

    #[serde(default = "default_chunk_seconds")]
    pub chunk_seconds: usize,
}

impl PreprocessConfig {
    /// Samples per chunk.
    pub const fn chunk_samples(&self) -> usize {
        self.sample_rate_hz * self.chunk_seconds
    }
}

fn default_input_root() -> PathBuf {
    PathBuf::from("data/raw")
}

fn default_output_root() -> PathBuf {
    PathBuf::from(defaults::CHUNK_CORPUS_DIR)
}

fn default_sample_rate_hz() -> usize {
    defaults::SAMPLE_RATE_HZ
}

fn default_chunk_seconds() -> usize {
    defaults::CHUNK_SECONDS
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            input_root: default_input_root(),
            output_root: default_output_root(),
            sample_rate_hz: default_sample_rate_hz(),
            chunk_seconds: default_chunk_seconds(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
