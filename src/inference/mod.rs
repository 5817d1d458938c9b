//! Inference Engine - immutable loaded model + registry behind `predict`.
//!
//! Built once at startup (weights, registry and the class-count check all
//! happen in [`InferenceEngine::load`]) and shared read-only afterwards.
//! `predict` takes `&self` and allocates only call-local buffers, so one
//! engine behind an `Arc` serves any number of concurrent requests.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

use crate::config::ModelConfig;
use crate::model::layers::{argmax, softmax, FeatureMap};
use crate::model::{weights, FaultClassifier, ModelError, WeightError};
use crate::registry::{ClassRegistry, LabelLookup, RegistryError};
use crate::signal::normalize;

/// Reasons the engine cannot be built. All of them are fatal for a server.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("class registry: {0}")]
    Registry(#[from] RegistryError),
    #[error("model weights: {0}")]
    Weights(#[from] WeightError),
    #[error("model has {model} outputs but the registry lists {registry} classes")]
    ClassCountMismatch { model: usize, registry: usize },
    #[error("expected sample count must be > 0")]
    ZeroExpectedSamples,
}

#[derive(Debug, Error)]
pub enum PredictError {
    #[error("expected {expected} samples, got {got}")]
    Length { expected: usize, got: usize },
    #[error("sample {index} is not a finite number")]
    NonFiniteInput { index: usize },
    #[error("model produced non-finite logits")]
    NonFiniteOutput,
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl PredictError {
    /// Whether the caller's input caused the failure.
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::Length { .. } | Self::NonFiniteInput { .. })
    }
}

/// One classified chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub label: String,
    /// Argmax class index.
    pub index: usize,
    /// Softmax probability of the winning class.
    pub confidence: f32,
    pub logits: Vec<f32>,
    /// `true` when `index` had no registry entry and `label` is the
    /// configured fallback, not a real class.
    pub fallback: bool,
}

#[derive(Debug)]
pub struct InferenceEngine {
    model: FaultClassifier,
    registry: ClassRegistry,
    expected_samples: usize,
}

impl InferenceEngine {
    /// Load registry and weights named by `config`.
    ///
    /// The registry is read first: its size fixes the output width the
    /// weights must have.
    pub fn load(config: &ModelConfig) -> Result<Self, StartupError> {
        let registry =
            ClassRegistry::load(&config.registry_path)?.with_fallback(config.fallback_label.clone());
        let model = weights::load(&config.weights_path, registry.len())?;
        Self::from_parts(model, registry, config.expected_samples)
    }

    /// Assemble an engine from an in-memory model and registry.
    pub fn from_parts(
        model: FaultClassifier,
        registry: ClassRegistry,
        expected_samples: usize,
    ) -> Result<Self, StartupError> {
        if model.num_classes() != registry.len() {
            return Err(StartupError::ClassCountMismatch {
                model: model.num_classes(),
                registry: registry.len(),
            });
        }
        if expected_samples == 0 {
            return Err(StartupError::ZeroExpectedSamples);
        }
        Ok(Self { model, registry, expected_samples })
    }

    pub const fn expected_samples(&self) -> usize {
        self.expected_samples
    }

    pub const fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    pub fn num_classes(&self) -> usize {
        self.registry.len()
    }

    /// Registry lookup with fallback, as used by [`InferenceEngine::predict`].
    pub fn label_for(&self, index: usize) -> LabelLookup<'_> {
        self.registry.lookup(index)
    }

    /// Classify one raw (un-normalized) chunk.
    pub fn predict(&self, samples: &[f32]) -> Result<Prediction, PredictError> {
        if samples.len() != self.expected_samples {
            return Err(PredictError::Length {
                expected: self.expected_samples,
                got: samples.len(),
            });
        }
        if let Some(index) = samples.iter().position(|v| !v.is_finite()) {
            return Err(PredictError::NonFiniteInput { index });
        }

        let (lo, hi) = samples
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        debug!(len = samples.len(), min = lo, max = hi, "Raw input range");

        let normalized = normalize(samples);
        let input = FeatureMap { batch: 1, channels: 1, len: normalized.len(), data: normalized };
        let logits = self.model.forward(&input)?.data;
        if logits.iter().any(|v| !v.is_finite()) {
            error!(?logits, "Non-finite logits");
            return Err(PredictError::NonFiniteOutput);
        }

        let index = argmax(&logits);
        let confidence = softmax(&logits)[index];
        let lookup = self.registry.lookup(index);

        Ok(Prediction {
            label: lookup.label().to_string(),
            index,
            confidence,
            fallback: lookup.is_fallback(),
            logits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn engine(classes: &[&str], expected: usize) -> InferenceEngine {
        let registry = ClassRegistry::from_names(classes.iter().copied());
        let model = FaultClassifier::new(registry.len(), &mut StdRng::seed_from_u64(31)).unwrap();
        InferenceEngine::from_parts(model, registry, expected).unwrap()
    }

    fn chunk(len: usize) -> Vec<f32> {
        (0..len).map(|i| (i as f32 * 0.05).sin() * 2.0 + 0.3).collect()
    }

    #[test]
    fn test_predict_is_deterministic() {
        let engine = engine(&["bearing", "belt", "flywheel", "healthy"], 256);
        let samples = chunk(256);
        let a = engine.predict(&samples).unwrap();
        let b = engine.predict(&samples).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.logits.len(), 4);
        assert!(!a.fallback);
        assert_eq!(engine.registry().index_of(&a.label), Some(a.index));
    }

    #[test]
    fn test_confidence_is_softmax_of_winner() {
        let engine = engine(&["belt", "healthy"], 128);
        let p = engine.predict(&chunk(128)).unwrap();
        let probs = softmax(&p.logits);
        assert!((p.confidence - probs[p.index]).abs() < 1e-6);
        assert!(p.confidence >= 0.5 && p.confidence <= 1.0);
    }

    #[test]
    fn test_prediction_ignores_affine_input_changes() {
        let engine = engine(&["belt", "healthy"], 128);
        let raw = chunk(128);
        let scaled: Vec<f32> = raw.iter().map(|v| v * 1000.0 - 7.0).collect();
        let a = engine.predict(&raw).unwrap();
        let b = engine.predict(&scaled).unwrap();
        assert_eq!(a.index, b.index);
    }

    #[test]
    fn test_wrong_length_is_client_error() {
        let engine = engine(&["belt", "healthy"], 128);
        let err = engine.predict(&chunk(127)).unwrap_err();
        assert!(matches!(err, PredictError::Length { expected: 128, got: 127 }));
        assert!(err.is_client_error());
        assert!(engine.predict(&[]).unwrap_err().is_client_error());
    }

    #[test]
    fn test_non_finite_input_rejected() {
        let engine = engine(&["belt", "healthy"], 64);
        let mut samples = chunk(64);
        samples[10] = f32::NAN;
        let err = engine.predict(&samples).unwrap_err();
        assert!(matches!(err, PredictError::NonFiniteInput { index: 10 }));
    }

    #[test]
    fn test_constant_input_still_predicts() {
        let engine = engine(&["belt", "healthy"], 64);
        let p = engine.predict(&[4.2; 64]).unwrap();
        assert!(p.confidence.is_finite());
    }

    #[test]
    fn test_out_of_range_index_uses_fallback() {
        let engine = engine(&["belt", "flywheel"], 64);
        let lookup = engine.label_for(5);
        assert_eq!(lookup, LabelLookup::Fallback("healthy"));
        assert_eq!(engine.label_for(1), LabelLookup::Registered("flywheel"));
    }

    #[test]
    fn test_class_count_mismatch_rejected() {
        let model = FaultClassifier::new(3, &mut StdRng::seed_from_u64(1)).unwrap();
        let registry = ClassRegistry::from_names(["a", "b"]);
        assert!(matches!(
            InferenceEngine::from_parts(model, registry, 64),
            Err(StartupError::ClassCountMismatch { model: 3, registry: 2 })
        ));
    }
}
