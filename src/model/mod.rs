//! Fault Classifier - fixed 1-D CNN over a normalized chunk.
//!
//! ```text
//! (B, 1, L)
//!   conv1 1→32   k64 s2 p32 → bn1 → relu
//!   conv2 32→64  k32 s2 p16 → bn2 → relu
//!   conv3 64→128 k16 s2 p8  → bn3 → relu
//!   conv4 128→256 k8 s2 p4  → bn4 → relu
//!   adaptive avg pool → (B, 256, 64) → flatten (B, 16384)
//!   fc1 16384→512 → relu → dropout(0.3)
//!   fc2 512→128   → relu → dropout(0.3)
//!   fc3 128→num_classes            (logits)
//! ```
//!
//! Adaptive pooling makes the dense stage independent of `L`, so the same
//! weights accept any chunk length; the inference engine pins `L` to the
//! configured chunk size.
//!
//! Parameter names match a PyTorch `state_dict` of the same module, see
//! [`FaultClassifier::named_tensors`].

pub mod layers;
pub mod weights;

use rand::Rng;
use thiserror::Error;

use layers::{
    adaptive_avg_pool, adaptive_avg_pool_backward, apply_mask, dropout_mask, relu_backward,
    relu_in_place, BatchNorm1d, BnCache, Conv1d, FeatureMap, Linear, Matrix,
};

pub use weights::WeightError;

/// `(in_channels, out_channels, kernel)` of each conv block.
pub const CONV_BLOCKS: [(usize, usize, usize); 4] = [(1, 32, 64), (32, 64, 32), (64, 128, 16), (128, 256, 8)];

pub const CONV_STRIDE: usize = 2;

/// Temporal positions after adaptive pooling.
pub const POOL_LEN: usize = 64;

pub const FLAT_FEATURES: usize = 256 * POOL_LEN;
pub const FC1_FEATURES: usize = 512;
pub const FC2_FEATURES: usize = 128;
pub const DROPOUT_P: f32 = 0.3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("model input must have exactly 1 channel, got {0}")]
    Channels(usize),
    #[error("model input is empty (batch {batch}, length {len})")]
    Empty { batch: usize, len: usize },
    #[error("model input buffer holds {got} values, shape needs {expected}")]
    BufferSize { expected: usize, got: usize },
    #[error("model needs at least one output class")]
    NoClasses,
}

/// Activations saved by [`FaultClassifier::forward_train`] for backprop.
#[derive(Debug)]
pub struct ForwardCache {
    /// `acts[0]` is the input, `acts[i + 1]` the ReLU output of block `i`.
    acts: Vec<FeatureMap>,
    bn: Vec<BnCache>,
    flat: Matrix,
    a1: Matrix,
    mask1: Vec<f32>,
    d1: Matrix,
    a2: Matrix,
    mask2: Vec<f32>,
    d2: Matrix,
}

/// Gradients in [`FaultClassifier::trainable_mut`] order.
#[derive(Debug, Clone)]
pub struct Gradients {
    pub tensors: Vec<Vec<f32>>,
}

/// One persisted tensor.
#[derive(Debug)]
pub struct NamedTensor<'a> {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: &'a [f32],
}

#[derive(Debug, Clone)]
pub struct FaultClassifier {
    convs: Vec<Conv1d>,
    bns: Vec<BatchNorm1d>,
    fc1: Linear,
    fc2: Linear,
    fc3: Linear,
    num_classes: usize,
}

impl FaultClassifier {
    /// Freshly initialized network for `num_classes` outputs.
    pub fn new(num_classes: usize, rng: &mut impl Rng) -> Result<Self, ModelError> {
        if num_classes == 0 {
            return Err(ModelError::NoClasses);
        }
        let convs = CONV_BLOCKS
            .iter()
            .map(|&(i, o, k)| Conv1d::new(i, o, k, CONV_STRIDE, k / 2, rng))
            .collect();
        let bns = CONV_BLOCKS.iter().map(|&(_, o, _)| BatchNorm1d::new(o)).collect();
        Ok(Self {
            convs,
            bns,
            fc1: Linear::new(FLAT_FEATURES, FC1_FEATURES, rng),
            fc2: Linear::new(FC1_FEATURES, FC2_FEATURES, rng),
            fc3: Linear::new(FC2_FEATURES, num_classes, rng),
            num_classes,
        })
    }

    pub const fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn parameter_count(&self) -> usize {
        self.named_tensors().iter().map(|t| t.data.len()).sum()
    }

    fn check_input(input: &FeatureMap) -> Result<(), ModelError> {
        if input.channels != 1 {
            return Err(ModelError::Channels(input.channels));
        }
        if input.batch == 0 || input.len == 0 {
            return Err(ModelError::Empty { batch: input.batch, len: input.len });
        }
        let expected = input.batch * input.len;
        if input.data.len() != expected {
            return Err(ModelError::BufferSize { expected, got: input.data.len() });
        }
        Ok(())
    }

    /// Deterministic inference pass: running batch-norm statistics, no
    /// dropout. Returns `(batch, num_classes)` logits.
    pub fn forward(&self, input: &FeatureMap) -> Result<Matrix, ModelError> {
        Self::check_input(input)?;

        let mut x = input.clone();
        for (conv, bn) in self.convs.iter().zip(&self.bns) {
            let mut y = bn.forward_eval(&conv.forward(&x));
            relu_in_place(&mut y.data);
            x = y;
        }
        let pooled = adaptive_avg_pool(&x, POOL_LEN);
        let flat = Matrix { rows: pooled.batch, cols: FLAT_FEATURES, data: pooled.data };

        let mut h = self.fc1.forward(&flat);
        relu_in_place(&mut h.data);
        let mut h = self.fc2.forward(&h);
        relu_in_place(&mut h.data);
        Ok(self.fc3.forward(&h))
    }

    /// Training pass: batch statistics (running stats updated), dropout
    /// sampled from `rng`.
    pub fn forward_train(
        &mut self,
        input: &FeatureMap,
        rng: &mut impl Rng,
    ) -> Result<(Matrix, ForwardCache), ModelError> {
        Self::check_input(input)?;

        let mut acts = Vec::with_capacity(CONV_BLOCKS.len() + 1);
        let mut bn_caches = Vec::with_capacity(CONV_BLOCKS.len());
        acts.push(input.clone());
        for (conv, bn) in self.convs.iter().zip(self.bns.iter_mut()) {
            let z = conv.forward(&acts[acts.len() - 1]);
            let (mut y, cache) = bn.forward_train(&z);
            relu_in_place(&mut y.data);
            acts.push(y);
            bn_caches.push(cache);
        }

        let pooled = adaptive_avg_pool(&acts[acts.len() - 1], POOL_LEN);
        let flat = Matrix { rows: pooled.batch, cols: FLAT_FEATURES, data: pooled.data };

        let mut a1 = self.fc1.forward(&flat);
        relu_in_place(&mut a1.data);
        let mask1 = dropout_mask(a1.data.len(), DROPOUT_P, rng);
        let mut d1 = a1.clone();
        apply_mask(&mut d1.data, &mask1);

        let mut a2 = self.fc2.forward(&d1);
        relu_in_place(&mut a2.data);
        let mask2 = dropout_mask(a2.data.len(), DROPOUT_P, rng);
        let mut d2 = a2.clone();
        apply_mask(&mut d2.data, &mask2);

        let logits = self.fc3.forward(&d2);
        let cache = ForwardCache { acts, bn: bn_caches, flat, a1, mask1, d1, a2, mask2, d2 };
        Ok((logits, cache))
    }

    /// Backpropagate `grad_logits` (d loss / d logits) through a cached
    /// training pass.
    pub fn backward(&self, cache: &ForwardCache, grad_logits: &Matrix) -> Gradients {
        let g3 = self.fc3.backward(&cache.d2, grad_logits);
        let mut g = g3.input;
        apply_mask(&mut g.data, &cache.mask2);
        relu_backward(&mut g.data, &cache.a2.data);

        let g2 = self.fc2.backward(&cache.d1, &g);
        let mut g = g2.input;
        apply_mask(&mut g.data, &cache.mask1);
        relu_backward(&mut g.data, &cache.a1.data);

        let g1 = self.fc1.backward(&cache.flat, &g);
        let last = &cache.acts[CONV_BLOCKS.len()];
        let pooled_grad = FeatureMap {
            batch: last.batch,
            channels: last.channels,
            len: POOL_LEN,
            data: g1.input.data,
        };
        let mut g = adaptive_avg_pool_backward(&pooled_grad, last.len);

        // Filled back to front, emitted front to back.
        let mut block_grads: Vec<[Vec<f32>; 4]> = Vec::with_capacity(CONV_BLOCKS.len());
        for i in (0..CONV_BLOCKS.len()).rev() {
            relu_backward(&mut g.data, &cache.acts[i + 1].data);
            let bn = self.bns[i].backward(&cache.bn[i], &g);
            let conv = self.convs[i].backward(&cache.acts[i], &bn.input, i > 0);
            block_grads.push([conv.weight, conv.bias, bn.weight, bn.bias]);
            if let Some(dx) = conv.input {
                g = dx;
            }
        }

        let mut tensors: Vec<Vec<f32>> = block_grads.into_iter().rev().flatten().collect();
        tensors.extend([g1.weight, g1.bias, g2.weight, g2.bias, g3.weight, g3.bias]);
        Gradients { tensors }
    }

    /// Trainable tensors in a fixed order: per block conv weight, conv bias,
    /// bn weight, bn bias; then fc1..fc3 weight, bias. Running statistics are
    /// not trainable.
    pub fn trainable_mut(&mut self) -> Vec<&mut [f32]> {
        let mut out: Vec<&mut [f32]> = Vec::with_capacity(22);
        for (conv, bn) in self.convs.iter_mut().zip(self.bns.iter_mut()) {
            out.push(&mut conv.weight);
            out.push(&mut conv.bias);
            out.push(&mut bn.weight);
            out.push(&mut bn.bias);
        }
        for fc in [&mut self.fc1, &mut self.fc2, &mut self.fc3] {
            out.push(&mut fc.weight);
            out.push(&mut fc.bias);
        }
        out
    }

    /// Every persisted tensor, in `state_dict` order.
    pub fn named_tensors(&self) -> Vec<NamedTensor<'_>> {
        let mut out = Vec::with_capacity(30);
        for (i, (conv, bn)) in self.convs.iter().zip(&self.bns).enumerate() {
            let n = i + 1;
            let c = vec![bn.channels];
            out.push(NamedTensor { name: format!("conv{n}.weight"), shape: conv.weight_shape(), data: &conv.weight });
            out.push(NamedTensor { name: format!("conv{n}.bias"), shape: vec![conv.out_channels], data: &conv.bias });
            out.push(NamedTensor { name: format!("bn{n}.weight"), shape: c.clone(), data: &bn.weight });
            out.push(NamedTensor { name: format!("bn{n}.bias"), shape: c.clone(), data: &bn.bias });
            out.push(NamedTensor { name: format!("bn{n}.running_mean"), shape: c.clone(), data: &bn.running_mean });
            out.push(NamedTensor { name: format!("bn{n}.running_var"), shape: c, data: &bn.running_var });
        }
        for (n, fc) in [(1, &self.fc1), (2, &self.fc2), (3, &self.fc3)] {
            out.push(NamedTensor { name: format!("fc{n}.weight"), shape: fc.weight_shape(), data: &fc.weight });
            out.push(NamedTensor { name: format!("fc{n}.bias"), shape: vec![fc.out_features], data: &fc.bias });
        }
        out
    }

    /// Mutable view of every persisted tensor with its expected shape.
    pub(crate) fn named_tensors_mut(&mut self) -> Vec<(String, Vec<usize>, &mut Vec<f32>)> {
        let mut out = Vec::with_capacity(30);
        for (i, (conv, bn)) in self.convs.iter_mut().zip(self.bns.iter_mut()).enumerate() {
            let n = i + 1;
            let c = vec![bn.channels];
            out.push((format!("conv{n}.weight"), conv.weight_shape(), &mut conv.weight));
            out.push((format!("conv{n}.bias"), vec![conv.out_channels], &mut conv.bias));
            out.push((format!("bn{n}.weight"), c.clone(), &mut bn.weight));
            out.push((format!("bn{n}.bias"), c.clone(), &mut bn.bias));
            out.push((format!("bn{n}.running_mean"), c.clone(), &mut bn.running_mean));
            out.push((format!("bn{n}.running_var"), c, &mut bn.running_var));
        }
        for (n, fc) in [(1, &mut self.fc1), (2, &mut self.fc2), (3, &mut self.fc3)] {
            let shape = fc.weight_shape();
            out.push((format!("fc{n}.weight"), shape, &mut fc.weight));
            out.push((format!("fc{n}.bias"), vec![fc.out_features], &mut fc.bias));
        }
        out
    }
}
