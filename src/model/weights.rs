//! Safetensors weight store for [`FaultClassifier`].
//!
//! One little-endian F32 tensor per parameter, keyed by `state_dict` name.
//! Loading is strict: every expected tensor must be present with exactly the
//! expected shape, and the output width must equal the class count the
//! caller got from its registry. Unknown extra tensors (e.g. PyTorch's
//! `num_batches_tracked`) are ignored.

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use memmap2::MmapOptions;
use rand::{rngs::StdRng, SeedableRng};
use safetensors::tensor::{serialize_to_file, Dtype, SafeTensorError, View};
use safetensors::SafeTensors;
use thiserror::Error;
use tracing::info;

use super::FaultClassifier;

/// Tensor whose leading dimension is the class count.
const OUTPUT_BIAS: &str = "fc3.bias";

#[derive(Debug, Error)]
pub enum WeightError {
    #[error("weights file not found: {0}")]
    NotFound(PathBuf),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("safetensors error: {0}")]
    SafeTensors(#[from] SafeTensorError),
    #[error("weights are missing tensor {0}")]
    MissingTensor(String),
    #[error("unsupported dtype for {name}: {dtype:?}")]
    UnsupportedDtype { name: String, dtype: Dtype },
    #[error("shape mismatch for {name}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("weights were trained for {weights} classes but the registry has {registry}")]
    ClassCountMismatch { weights: usize, registry: usize },
    #[error("invalid model: {0}")]
    Model(#[from] super::ModelError),
}

/// Borrowed f32 tensor exposed to the safetensors serializer.
struct F32View<'a> {
    shape: Vec<usize>,
    data: &'a [f32],
}

impl View for F32View<'_> {
    fn dtype(&self) -> Dtype {
        Dtype::F32
    }

    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn data(&self) -> Cow<'_, [u8]> {
        Cow::Owned(self.data.iter().flat_map(|v| v.to_le_bytes()).collect())
    }

    fn data_len(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }
}

/// Write every tensor of `model` to `path` atomically (temp file, then rename).
pub fn save(model: &FaultClassifier, path: &Path) -> Result<(), WeightError> {
    let io_err = |source| WeightError::Io { path: path.to_path_buf(), source };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }

    let tensors: Vec<(String, F32View<'_>)> = model
        .named_tensors()
        .into_iter()
        .map(|t| (t.name, F32View { shape: t.shape, data: t.data }))
        .collect();
    let metadata = HashMap::from([
        ("architecture".to_string(), "fault-cnn-1d".to_string()),
        ("num_classes".to_string(), model.num_classes().to_string()),
    ]);

    let tmp_path = path.with_extension("safetensors.tmp");
    serialize_to_file(tensors, &Some(metadata), &tmp_path)?;
    std::fs::rename(&tmp_path, path).map_err(io_err)?;

    info!(
        path = %path.display(),
        parameters = model.parameter_count(),
        "Saved model weights"
    );
    Ok(())
}

/// Load weights for a model with `num_classes` outputs.
pub fn load(path: &Path, num_classes: usize) -> Result<FaultClassifier, WeightError> {
    let file = std::fs::File::open(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            WeightError::NotFound(path.to_path_buf())
        } else {
            WeightError::Io { path: path.to_path_buf(), source }
        }
    })?;
    // SAFETY: read-only mapping; the file is not modified while the model loads.
    #[allow(unsafe_code)]
    let mmap = unsafe { MmapOptions::new().map(&file) }
        .map_err(|source| WeightError::Io { path: path.to_path_buf(), source })?;
    let st = SafeTensors::deserialize(&mmap)?;

    let output = st
        .tensor(OUTPUT_BIAS)
        .map_err(|_| WeightError::MissingTensor(OUTPUT_BIAS.to_string()))?;
    let weights_classes = output.shape().first().copied().unwrap_or(0);
    if weights_classes != num_classes {
        return Err(WeightError::ClassCountMismatch {
            weights: weights_classes,
            registry: num_classes,
        });
    }

    // Every value is overwritten below; the seed only fixes the throwaway init.
    let mut model = FaultClassifier::new(num_classes, &mut StdRng::seed_from_u64(0))?;
    for (name, expected, target) in model.named_tensors_mut() {
        let view = st
            .tensor(&name)
            .map_err(|_| WeightError::MissingTensor(name.clone()))?;
        if view.shape() != expected.as_slice() {
            return Err(WeightError::ShapeMismatch {
                name,
                expected,
                found: view.shape().to_vec(),
            });
        }
        *target = decode_f32(&name, view.dtype(), view.data())?;
    }

    info!(
        path = %path.display(),
        classes = num_classes,
        parameters = model.parameter_count(),
        "Loaded model weights"
    );
    Ok(model)
}

fn decode_f32(name: &str, dtype: Dtype, raw: &[u8]) -> Result<Vec<f32>, WeightError> {
    match dtype {
        Dtype::F32 => Ok(raw
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()),
        Dtype::BF16 => Ok(raw
            .chunks_exact(2)
            .map(|c| f32::from_bits(u32::from(u16::from_le_bytes([c[0], c[1]])) << 16))
            .collect()),
        other => Err(WeightError::UnsupportedDtype { name: name.to_string(), dtype: other }),
    }
}
