//! Training loop for the fault classifier.
//!
//! ```text
//! chunk corpus ─scan─▶ ChunkDataset (+ ClassRegistry)
//!              ─split─▶ train / validation index sets (seeded)
//!   per epoch: shuffle → mini-batches → cross-entropy → backprop → Adam
//!              validation pass (eval mode, accuracy only)
//! final epoch ─▶ weights (safetensors) + registry (text), written together
//! ```
//!
//! One `StdRng` drives weight init, the split, shuffling and dropout, so a
//! fixed seed reproduces a run exactly. There is no early stopping and no
//! best-epoch selection: the last epoch's parameters are the result.

pub mod dataset;
pub mod optimizer;

use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::config::TrainingConfig;
use crate::model::layers::{argmax, cross_entropy};
use crate::model::{weights, FaultClassifier, ModelError, WeightError};
use crate::registry::{ClassRegistry, RegistryError};
use crate::signal::chunk_store::ChunkFileError;

pub use dataset::{ChunkDataset, Sample};
pub use optimizer::{Adam, StepLr};

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("no class directories under {0}")]
    NoClasses(PathBuf),
    #[error("class {0:?} has no chunk files")]
    EmptyClass(String),
    #[error("dataset is empty")]
    EmptyDataset,
    #[error("split of {total} chunks leaves an empty set (train {train}, validation {validation})")]
    EmptySplit {
        total: usize,
        train: usize,
        validation: usize,
    },
    #[error("chunk {path} has {found} samples, expected {expected}")]
    ChunkLength {
        path: PathBuf,
        expected: usize,
        found: usize,
    },
    #[error("training loss became non-finite in epoch {epoch}")]
    NonFiniteLoss { epoch: usize },
    #[error("invalid training options: {0}")]
    InvalidOptions(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    ChunkFile(#[from] ChunkFileError),
    #[error(transparent)]
    Weights(#[from] WeightError),
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Hyperparameters of one run.
#[derive(Debug, Clone)]
pub struct TrainerOptions {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub lr_step_epochs: usize,
    pub lr_gamma: f64,
    pub train_fraction: f64,
    /// `None` draws a fresh seed from OS entropy.
    pub seed: Option<u64>,
}

impl From<&TrainingConfig> for TrainerOptions {
    fn from(c: &TrainingConfig) -> Self {
        Self {
            epochs: c.epochs,
            batch_size: c.batch_size,
            learning_rate: c.learning_rate,
            lr_step_epochs: c.lr_step_epochs,
            lr_gamma: c.lr_gamma,
            train_fraction: c.train_fraction,
            seed: c.seed,
        }
    }
}

impl Default for TrainerOptions {
    fn default() -> Self {
        Self::from(&TrainingConfig::default())
    }
}

/// Metrics of one finished epoch.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct EpochReport {
    /// 1-based.
    pub epoch: usize,
    pub epochs: usize,
    /// Mean cross-entropy per training sample.
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_accuracy: f64,
    pub learning_rate: f64,
}

/// Output of a run: final parameters, the registry they were trained
/// against, and the per-epoch history.
#[derive(Debug, Clone)]
pub struct TrainedModel {
    pub model: FaultClassifier,
    pub registry: ClassRegistry,
    pub history: Vec<EpochReport>,
    pub seed: u64,
}

impl TrainedModel {
    /// Persist weights and registry. The registry is written second so a
    /// registry on disk always has weights of matching width beside it.
    pub fn save(&self, weights_path: &Path, registry_path: &Path) -> Result<(), TrainingError> {
        weights::save(&self.model, weights_path)?;
        self.registry.save(registry_path)?;
        info!(
            weights = %weights_path.display(),
            registry = %registry_path.display(),
            classes = self.registry.len(),
            "Saved trained model"
        );
        Ok(())
    }
}

pub struct Trainer {
    options: TrainerOptions,
    rng: StdRng,
    seed: u64,
}

impl Trainer {
    pub fn new(options: TrainerOptions) -> Result<Self, TrainingError> {
        if options.epochs == 0 || options.batch_size == 0 {
            return Err(TrainingError::InvalidOptions(
                "epochs and batch_size must be > 0".to_string(),
            ));
        }
        if !(options.train_fraction > 0.0 && options.train_fraction < 1.0) {
            return Err(TrainingError::InvalidOptions(format!(
                "train_fraction must be in (0, 1), got {}",
                options.train_fraction
            )));
        }
        let seed = options.seed.unwrap_or_else(rand::random);
        Ok(Self { options, rng: StdRng::seed_from_u64(seed), seed })
    }

    /// Seed actually in use, for logging and reproduction.
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Random partition of `0..total` into `floor(train_fraction * total)`
    /// training indices and the rest for validation. Not stratified.
    pub fn split(&mut self, total: usize) -> Result<(Vec<usize>, Vec<usize>), TrainingError> {
        if total == 0 {
            return Err(TrainingError::EmptyDataset);
        }
        let train = (self.options.train_fraction * total as f64).floor() as usize;
        let validation = total - train;
        if train == 0 || validation == 0 {
            return Err(TrainingError::EmptySplit { total, train, validation });
        }

        let mut order: Vec<usize> = (0..total).collect();
        order.shuffle(&mut self.rng);
        let val_set = order.split_off(train);
        Ok((order, val_set))
    }

    /// Train a fresh model on `dataset`.
    pub fn fit(&mut self, dataset: &ChunkDataset) -> Result<TrainedModel, TrainingError> {
        self.fit_with(dataset, |_| {})
    }

    /// Like [`Trainer::fit`], calling `on_epoch` after every epoch.
    pub fn fit_with(
        &mut self,
        dataset: &ChunkDataset,
        mut on_epoch: impl FnMut(&EpochReport),
    ) -> Result<TrainedModel, TrainingError> {
        let registry = dataset.registry().clone();
        let (mut train_idx, val_idx) = self.split(dataset.len())?;

        info!(
            seed = self.seed,
            total = dataset.len(),
            train = train_idx.len(),
            validation = val_idx.len(),
            classes = ?registry.names(),
            chunk_len = dataset.chunk_len(),
            "Starting training"
        );

        let mut model = FaultClassifier::new(registry.len(), &mut self.rng)?;
        let sizes: Vec<usize> = model.trainable_mut().iter().map(|t| t.len()).collect();
        let mut adam = Adam::new(self.options.learning_rate, &sizes);
        let schedule = StepLr {
            base_lr: self.options.learning_rate,
            step_epochs: self.options.lr_step_epochs,
            gamma: self.options.lr_gamma,
        };

        let epochs = self.options.epochs;
        let mut history = Vec::with_capacity(epochs);

        for epoch in 0..epochs {
            adam.lr = schedule.lr_at(epoch);
            train_idx.shuffle(&mut self.rng);

            let mut loss_sum = 0.0_f64;
            let mut correct = 0usize;
            for batch in train_idx.chunks(self.options.batch_size) {
                let (input, labels) = dataset.load_batch(batch)?;
                let (logits, cache) = model.forward_train(&input, &mut self.rng)?;
                let (loss, grad) = cross_entropy(&logits, &labels);
                if !loss.is_finite() {
                    return Err(TrainingError::NonFiniteLoss { epoch: epoch + 1 });
                }
                loss_sum += f64::from(loss) * batch.len() as f64;
                correct += (0..logits.rows)
                    .filter(|&r| argmax(logits.row(r)) == labels[r])
                    .count();

                let grads = model.backward(&cache, &grad);
                adam.step(&mut model.trainable_mut(), &grads.tensors);
            }

            let train_total = train_idx.len() as f64;
            let report = EpochReport {
                epoch: epoch + 1,
                epochs,
                train_loss: loss_sum / train_total,
                train_accuracy: correct as f64 / train_total,
                val_accuracy: evaluate(&model, dataset, &val_idx, self.options.batch_size)?,
                learning_rate: adam.lr,
            };
            info!(
                epoch = report.epoch,
                epochs,
                train_loss = report.train_loss,
                train_acc = report.train_accuracy,
                val_acc = report.val_accuracy,
                lr = report.learning_rate,
                "Epoch complete"
            );
            on_epoch(&report);
            history.push(report);
        }

        Ok(TrainedModel { model, registry, history, seed: self.seed })
    }
}

/// Accuracy of `model` in eval mode over the samples at `indices`.
pub fn evaluate(
    model: &FaultClassifier,
    dataset: &ChunkDataset,
    indices: &[usize],
    batch_size: usize,
) -> Result<f64, TrainingError> {
    if indices.is_empty() {
        return Err(TrainingError::EmptyDataset);
    }
    let mut correct = 0usize;
    for batch in indices.chunks(batch_size.max(1)) {
        let (input, labels) = dataset.load_batch(batch)?;
        let logits = model.forward(&input)?;
        correct += (0..logits.rows)
            .filter(|&r| argmax(logits.row(r)) == labels[r])
            .count();
    }
    Ok(correct as f64 / indices.len() as f64)
}
