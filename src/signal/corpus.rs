//! Raw corpus → chunk corpus.
//!
//! ```text
//! <input_root>/<class>/*.csv  ──chunk──normalize──▶  <output_root>/<class>/chunk_NNNNN.npy
//! ```
//!
//! Chunk numbering restarts at zero for every class and runs across all of
//! that class's files in sorted order. Re-running over the same output root
//! overwrites chunks with the same number.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::chunk_store::{self, ChunkFileError};
use super::csv_source::{self, CsvSignalError};
use super::{chunk_count, chunks, normalize, ChunkStats};

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no class directories under {0}")]
    NoClasses(PathBuf),
    #[error("chunk length must be > 0")]
    ZeroChunkLength,
    #[error(transparent)]
    Csv(#[from] CsvSignalError),
    #[error(transparent)]
    ChunkFile(#[from] ChunkFileError),
}

/// Outcome of a preprocessing run.
#[derive(Debug, Clone, Default)]
pub struct PreprocessSummary {
    pub files_processed: usize,
    pub files_failed: usize,
    /// Chunks written per class directory name.
    pub chunks_per_class: BTreeMap<String, usize>,
}

impl PreprocessSummary {
    pub fn total_chunks(&self) -> usize {
        self.chunks_per_class.values().sum()
    }
}

/// Convert every CSV under `input_root`'s class directories into normalized
/// `.npy` chunks of `chunk_samples` samples.
///
/// Files that fail to parse or write are logged and skipped.
pub fn preprocess_corpus(
    input_root: &Path,
    output_root: &Path,
    chunk_samples: usize,
) -> Result<PreprocessSummary, CorpusError> {
    if chunk_samples == 0 {
        return Err(CorpusError::ZeroChunkLength);
    }

    let classes = subdirectories(input_root)?;
    if classes.is_empty() {
        return Err(CorpusError::NoClasses(input_root.to_path_buf()));
    }

    info!(
        input = %input_root.display(),
        output = %output_root.display(),
        chunk_samples,
        classes = classes.len(),
        "Starting corpus preprocessing"
    );

    let mut summary = PreprocessSummary::default();

    for (class_name, class_dir) in classes {
        let out_dir = output_root.join(&class_name);
        std::fs::create_dir_all(&out_dir).map_err(|source| CorpusError::Io {
            path: out_dir.clone(),
            source,
        })?;

        let files = csv_files(&class_dir)?;
        info!(class = %class_name, files = files.len(), "Processing class");

        let mut counter = 0usize;
        for file in &files {
            match process_file(file, &out_dir, chunk_samples, &mut counter) {
                Ok(written) => {
                    summary.files_processed += 1;
                    info!(file = %file.display(), chunks = written, "Extracted chunks");
                }
                Err(e) => {
                    summary.files_failed += 1;
                    warn!(file = %file.display(), error = %e, "Failed to process file, skipping");
                }
            }
        }
        summary.chunks_per_class.insert(class_name, counter);
    }

    info!(
        files_processed = summary.files_processed,
        files_failed = summary.files_failed,
        total_chunks = summary.total_chunks(),
        "Preprocessing complete"
    );
    Ok(summary)
}

/// Chunk one file into `out_dir`, advancing the class counter.
fn process_file(
    path: &Path,
    out_dir: &Path,
    chunk_samples: usize,
    counter: &mut usize,
) -> Result<usize, CorpusError> {
    let signal = csv_source::read_signal(path)?;
    if signal.skipped_rows > 0 {
        warn!(
            file = %path.display(),
            skipped = signal.skipped_rows,
            "Skipped rows without a numeric {} value",
            signal.column
        );
    }

    if !signal.samples.is_empty() {
        let stats = ChunkStats::of(&signal.samples);
        debug!(
            column = %signal.column,
            len = signal.samples.len(),
            mean = stats.mean,
            std = stats.std,
            min = stats.min,
            max = stats.max,
            "Signal stats"
        );
    }
    debug!(
        available = chunk_count(signal.samples.len(), chunk_samples),
        "Chunks available"
    );

    let mut written = 0;
    for window in chunks(&signal.samples, chunk_samples) {
        let normalized = normalize(window);
        let target = out_dir.join(chunk_store::chunk_file_name(*counter));
        chunk_store::write_chunk(&target, &normalized)?;
        *counter += 1;
        written += 1;
    }
    Ok(written)
}

/// Class directories under `root`, sorted by name.
fn subdirectories(root: &Path) -> Result<Vec<(String, PathBuf)>, CorpusError> {
    let io_err = |source| CorpusError::Io { path: root.to_path_buf(), source };
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(root).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if !path.is_dir() {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            dirs.push((name.to_string(), path.clone()));
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn csv_files(dir: &Path) -> Result<Vec<PathBuf>, CorpusError> {
    let io_err = |source| CorpusError::Io { path: dir.to_path_buf(), source };
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        let is_csv = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
        if path.is_file() && is_csv {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
