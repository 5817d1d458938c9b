//! Labeled chunk dataset backed by the `.npy` corpus.
//!
//! Only paths and labels are held in memory; chunks are read per batch.

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::info;

use super::TrainingError;
use crate::model::layers::FeatureMap;
use crate::registry::ClassRegistry;
use crate::signal::chunk_store;

/// One `(chunk file, class index)` pair.
#[derive(Debug, Clone)]
pub struct Sample {
    pub path: PathBuf,
    pub label: usize,
}

#[derive(Debug, Clone)]
pub struct ChunkDataset {
    samples: Vec<Sample>,
    registry: ClassRegistry,
    chunk_len: usize,
}

impl ChunkDataset {
    /// Index a chunk corpus: one subdirectory per class, labels from the
    /// sorted registry of those subdirectories.
    ///
    /// Fails when there are no classes or any class has no chunk files.
    pub fn scan(root: &Path) -> Result<Self, TrainingError> {
        let registry = ClassRegistry::scan_dir(root)?;
        if registry.is_empty() {
            return Err(TrainingError::NoClasses(root.to_path_buf()));
        }

        let mut samples = Vec::new();
        for (label, name) in registry.names().iter().enumerate() {
            let files = chunk_store::list_chunk_files(&root.join(name))?;
            if files.is_empty() {
                return Err(TrainingError::EmptyClass(name.clone()));
            }
            info!(class = %name, label, chunks = files.len(), "Indexed class");
            samples.extend(files.into_iter().map(|path| Sample { path, label }));
        }

        // Every chunk must share the first chunk's length.
        let chunk_len = chunk_store::read_chunk(&samples[0].path)?.len();
        if chunk_len == 0 {
            return Err(TrainingError::ChunkLength {
                path: samples[0].path.clone(),
                expected: 1,
                found: 0,
            });
        }

        Ok(Self { samples, registry, chunk_len })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub const fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    /// Samples per chunk.
    pub const fn chunk_len(&self) -> usize {
        self.chunk_len
    }

    /// Chunk count per class index.
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.registry.len()];
        for s in &self.samples {
            counts[s.label] += 1;
        }
        counts
    }

    /// Read the chunks at `indices` into a `(batch, 1, chunk_len)` input and
    /// their labels.
    pub fn load_batch(&self, indices: &[usize]) -> Result<(FeatureMap, Vec<usize>), TrainingError> {
        let chunks: Vec<Vec<f32>> = indices
            .par_iter()
            .map(|&i| -> Result<Vec<f32>, TrainingError> {
                let sample = &self.samples[i];
                let chunk = chunk_store::read_chunk(&sample.path)?;
                if chunk.len() != self.chunk_len {
                    return Err(TrainingError::ChunkLength {
                        path: sample.path.clone(),
                        expected: self.chunk_len,
                        found: chunk.len(),
                    });
                }
                Ok(chunk)
            })
            .collect::<Result<_, _>>()?;

        let labels = indices.iter().map(|&i| self.samples[i].label).collect();
        let data = chunks.concat();
        let input = FeatureMap { batch: indices.len(), channels: 1, len: self.chunk_len, data };
        Ok((input, labels))
    }
}
