//! Raw CSV corpus to `.npy` chunk corpus.
//!
//! Reads `<input>/<class>/*.csv`, picks the voltage column of each file,
//! cuts it into non-overlapping chunks of `sample_rate_hz * chunk_seconds`
//! samples, normalizes every chunk and writes
//! `<output>/<class>/chunk_NNNNN.npy`.
//!
//! Usage:
//!   rotorwatch-preprocess --input data/raw --output secdatachunks

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use rotorwatch::signal::corpus::preprocess_corpus;
use rotorwatch::AppConfig;

/// Build the training chunk corpus from raw sensor CSV exports.
#[derive(Parser, Debug)]
#[command(name = "rotorwatch-preprocess")]
#[command(version)]
struct Args {
    /// Config file (otherwise ROTORWATCH_CONFIG, then ./rotorwatch.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Raw corpus root (one subdirectory per class).
    #[arg(long)]
    input: Option<PathBuf>,

    /// Chunk corpus root to write.
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    rotorwatch::init_tracing(args.log_json);

    let config = AppConfig::load_or_default_search(args.config.as_deref())
        .context("Failed to load config")?;
    let chunk_samples = config.preprocess.chunk_samples();
    let input = args.input.unwrap_or(config.preprocess.input_root);
    let output = args.output.unwrap_or(config.preprocess.output_root);

    let summary = preprocess_corpus(&input, &output, chunk_samples)
        .with_context(|| format!("Failed to preprocess {}", input.display()))?;

    for (class, chunks) in &summary.chunks_per_class {
        info!(class = %class, chunks, "Class summary");
    }
    if summary.files_failed > 0 {
        warn!(failed = summary.files_failed, "Some files were skipped");
    }
    info!(
        files = summary.files_processed,
        failed = summary.files_failed,
        chunks = summary.total_chunks(),
        output = %output.display(),
        "Chunk corpus ready"
    );
    Ok(())
}
