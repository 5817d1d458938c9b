//! Train the fault classifier on a `.npy` chunk corpus.
//!
//! Writes the safetensors weights and the class registry named in
//! `[model]`, and optionally the per-epoch history as JSON.
//!
//! Usage:
//!   rotorwatch-train --data secdatachunks --epochs 10 --seed 42
//!   rotorwatch-train --config site.toml --history runs/history.json

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use rotorwatch::training::{ChunkDataset, EpochReport};
use rotorwatch::{AppConfig, Trainer, TrainerOptions};

/// Fault classifier trainer.
#[derive(Parser, Debug)]
#[command(name = "rotorwatch-train")]
#[command(version)]
struct Args {
    /// Config file (otherwise ROTORWATCH_CONFIG, then ./rotorwatch.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Chunk corpus root (one subdirectory per class).
    #[arg(long)]
    data: Option<PathBuf>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    lr: Option<f64>,

    /// RNG seed for init, dropout and the split. Random when unset.
    #[arg(long, env = "ROTORWATCH_SEED")]
    seed: Option<u64>,

    /// Weights output path (default: `[model].weights_path`).
    #[arg(long)]
    weights: Option<PathBuf>,

    /// Registry output path (default: `[model].registry_path`).
    #[arg(long)]
    registry: Option<PathBuf>,

    /// Write the per-epoch metrics here as JSON.
    #[arg(long)]
    history: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    rotorwatch::init_tracing(args.log_json);

    let mut config = AppConfig::load_or_default_search(args.config.as_deref())
        .context("Failed to load config")?;
    let t = &mut config.training;
    if let Some(data) = args.data {
        t.data_root = data;
    }
    if let Some(epochs) = args.epochs {
        t.epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        t.batch_size = batch_size;
    }
    if let Some(lr) = args.lr {
        t.learning_rate = lr;
    }
    if args.seed.is_some() {
        t.seed = args.seed;
    }
    config.validate().context("Invalid training options")?;

    let weights_path = args.weights.unwrap_or_else(|| config.model.weights_path.clone());
    let registry_path = args.registry.unwrap_or_else(|| config.model.registry_path.clone());

    let dataset = ChunkDataset::scan(&config.training.data_root)
        .with_context(|| format!("Failed to index {}", config.training.data_root.display()))?;
    if dataset.chunk_len() != config.model.expected_samples {
        anyhow::bail!(
            "corpus chunks have {} samples but model.expected_samples is {}",
            dataset.chunk_len(),
            config.model.expected_samples
        );
    }

    let mut trainer = Trainer::new(TrainerOptions::from(&config.training))?;
    info!(seed = trainer.seed(), "Trainer ready");

    let trained = trainer
        .fit_with(&dataset, |report: &EpochReport| {
            info!(
                "Epoch {}/{}: loss {:.4}, train acc {:.2}%, val acc {:.2}%",
                report.epoch,
                report.epochs,
                report.train_loss,
                report.train_accuracy * 100.0,
                report.val_accuracy * 100.0
            );
        })
        .context("Training failed")?;

    trained
        .save(&weights_path, &registry_path)
        .context("Failed to save trained model")?;

    if let Some(path) = args.history {
        let json = serde_json::to_string_pretty(&trained.history)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(path = %path.display(), "Wrote training history");
    }

    Ok(())
}
