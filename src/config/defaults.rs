//! System-wide default constants.
//!
//! Centralises the numbers that preprocessing, training and inference must
//! agree on. Grouped by subsystem for easy discovery.

// ============================================================================
// Signal
// ============================================================================

/// ADC sample rate of the sensor front-end (Hz).
pub const SAMPLE_RATE_HZ: usize = 38_400;

/// Length of one classification chunk in seconds.
pub const CHUNK_SECONDS: usize = 1;

/// Samples per chunk: 1 second at 38.4 kHz.
pub const CHUNK_SAMPLES: usize = SAMPLE_RATE_HZ * CHUNK_SECONDS;

// ============================================================================
// Class Registry
// ============================================================================

/// Label reported when a predicted index has no registry entry.
///
/// Kept from the field deployment. It can hide a real anomaly as a false
/// negative, so every use is flagged as a fallback in results and logs.
pub const FALLBACK_LABEL: &str = "healthy";

/// Default registry file written next to the weights.
pub const REGISTRY_FILE: &str = "class_mapping.txt";

// ============================================================================
// Model
// ============================================================================

/// Default weights file (safetensors).
pub const WEIGHTS_FILE: &str = "fault_detector.safetensors";

// ============================================================================
// Training
// ============================================================================

/// Default chunk corpus directory (one subdirectory per class).
pub const CHUNK_CORPUS_DIR: &str = "secdatachunks";

pub const TRAIN_EPOCHS: usize = 10;

pub const TRAIN_BATCH_SIZE: usize = 16;

/// Adam base learning rate.
pub const TRAIN_LEARNING_RATE: f64 = 0.0005;

/// Epochs between learning-rate decays.
pub const LR_STEP_EPOCHS: usize = 15;

/// Multiplicative learning-rate decay applied every `LR_STEP_EPOCHS`.
pub const LR_GAMMA: f64 = 0.5;

/// Share of the dataset assigned to training; the rest is validation.
pub const TRAIN_FRACTION: f64 = 0.8;

// ============================================================================
// Serving
// ============================================================================

/// Default HTTP bind address.
pub const SERVER_ADDR: &str = "0.0.0.0:8001";

/// Maximum accepted request body (bytes).
///
/// 38 400 JSON floats are roughly 0.8 MB; 4 MiB leaves room for verbose
/// float formatting.
pub const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Per-request timeout (seconds).
pub const REQUEST_TIMEOUT_SECS: u64 = 30;
