//! rotorwatch: rotating-machinery fault classification
//!
//! A 1-D CNN classifies fixed-length raw vibration chunks into fault
//! classes (bearing, belt, flywheel, healthy, ...).
//!
//! ## Architecture
//!
//! - **Signal**: per-chunk normalization, chunking, `.npy` chunk store and
//!   raw CSV corpus ingestion
//! - **Registry**: persisted class name <-> index mapping
//! - **Model**: the CNN, its layers and the safetensors weight store
//! - **Training**: dataset, split, Adam + step LR schedule, evaluation
//! - **Inference**: immutable engine built once at startup
//! - **API**: Axum HTTP surface around the engine

pub mod api;
pub mod config;
pub mod inference;
pub mod model;
pub mod registry;
pub mod signal;
pub mod training;

pub use config::AppConfig;
pub use inference::{InferenceEngine, PredictError, Prediction, StartupError};
pub use model::FaultClassifier;
pub use registry::{ClassRegistry, LabelLookup};
pub use training::{Trainer, TrainerOptions};

/// Install the global `tracing` subscriber shared by all binaries.
///
/// `RUST_LOG` is respected; the default level is `info`.
pub fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    }
}
