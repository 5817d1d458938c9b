//! CPU layer kernels with hand-written backward passes.
//!
//! Layouts follow PyTorch so persisted tensors are interchangeable:
//! - activations `[batch, channels, len]`, row-major
//! - conv weight `[out_channels, in_channels, kernel]`
//! - linear weight `[out_features, in_features]`
//!
//! Kernels parallelize over output rows with rayon; every forward pass
//! allocates its own buffers so a shared model can serve concurrent callers.

use rand::Rng;
use rayon::prelude::*;
use std::ops::Range;

// ============================================================================
// Tensors
// ============================================================================

/// Activation tensor `[batch, channels, len]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMap {
    pub batch: usize,
    pub channels: usize,
    pub len: usize,
    pub data: Vec<f32>,
}

impl FeatureMap {
    pub fn zeros(batch: usize, channels: usize, len: usize) -> Self {
        Self { batch, channels, len, data: vec![0.0; batch * channels * len] }
    }

    /// Wrap `data`; `None` if its length is not `batch * channels * len`.
    pub fn from_vec(batch: usize, channels: usize, len: usize, data: Vec<f32>) -> Option<Self> {
        (data.len() == batch * channels * len).then_some(Self { batch, channels, len, data })
    }

    #[inline]
    pub fn row(&self, b: usize, c: usize) -> &[f32] {
        let start = (b * self.channels + c) * self.len;
        &self.data[start..start + self.len]
    }
}

/// Row-major `[rows, cols]` matrix; rows are batch items.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f32>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self { rows, cols, data: vec![0.0; rows * cols] }
    }

    #[inline]
    pub fn row(&self, r: usize) -> &[f32] {
        &self.data[r * self.cols..(r + 1) * self.cols]
    }
}

/// PyTorch's default init for conv/linear: U(-1/sqrt(fan_in), 1/sqrt(fan_in)).
fn uniform_init(len: usize, fan_in: usize, rng: &mut impl Rng) -> Vec<f32> {
    let bound = 1.0 / (fan_in as f32).sqrt();
    (0..len).map(|_| rng.gen_range(-bound..bound)).collect()
}

#[inline]
fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[inline]
fn axpy(alpha: f32, x: &[f32], y: &mut [f32]) {
    for (yi, xi) in y.iter_mut().zip(x) {
        *yi += alpha * xi;
    }
}

// ============================================================================
// Conv1d
// ============================================================================

#[derive(Debug, Clone)]
pub struct Conv1d {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel: usize,
    pub stride: usize,
    pub padding: usize,
    pub weight: Vec<f32>,
    pub bias: Vec<f32>,
}

/// Gradients of one convolution.
#[derive(Debug, Clone)]
pub struct ConvGrads {
    pub weight: Vec<f32>,
    pub bias: Vec<f32>,
    /// `None` when the caller did not need the input gradient.
    pub input: Option<FeatureMap>,
}

impl Conv1d {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
        padding: usize,
        rng: &mut impl Rng,
    ) -> Self {
        let fan_in = in_channels * kernel;
        Self {
            in_channels,
            out_channels,
            kernel,
            stride,
            padding,
            weight: uniform_init(out_channels * in_channels * kernel, fan_in, rng),
            bias: uniform_init(out_channels, fan_in, rng),
        }
    }

    pub fn weight_shape(&self) -> Vec<usize> {
        vec![self.out_channels, self.in_channels, self.kernel]
    }

    /// `floor((len + 2p - k) / s) + 1`.
    pub const fn output_len(&self, len: usize) -> usize {
        (len + 2 * self.padding).saturating_sub(self.kernel) / self.stride + 1
    }

    #[inline]
    fn kernel_row(&self, oc: usize, ic: usize) -> &[f32] {
        let start = (oc * self.in_channels + ic) * self.kernel;
        &self.weight[start..start + self.kernel]
    }

    /// Kernel taps of output position `t` that land inside the unpadded
    /// input. Tap `j` reads input index `t * stride + j - padding`.
    #[inline]
    fn taps(&self, t: usize, len: usize) -> Range<usize> {
        let base = t * self.stride;
        let lo = self.padding.saturating_sub(base);
        let hi = self.kernel.min((len + self.padding).saturating_sub(base));
        lo..hi.max(lo)
    }

    pub fn forward(&self, x: &FeatureMap) -> FeatureMap {
        let out_len = self.output_len(x.len);
        let mut out = FeatureMap::zeros(x.batch, self.out_channels, out_len);

        out.data.par_chunks_mut(out_len).enumerate().for_each(|(row, y)| {
            let (b, oc) = (row / self.out_channels, row % self.out_channels);
            y.fill(self.bias[oc]);
            for ic in 0..self.in_channels {
                let xr = x.row(b, ic);
                let wr = self.kernel_row(oc, ic);
                for (t, yt) in y.iter_mut().enumerate() {
                    let taps = self.taps(t, x.len);
                    let start = t * self.stride + taps.start - self.padding;
                    *yt += dot(&wr[taps.clone()], &xr[start..start + taps.len()]);
                }
            }
        });
        out
    }

    /// Gradients given the forward input `x` and upstream gradient `gy`.
    pub fn backward(&self, x: &FeatureMap, gy: &FeatureMap, need_input_grad: bool) -> ConvGrads {
        let k = self.kernel;

        let mut weight = vec![0.0_f32; self.weight.len()];
        weight
            .par_chunks_mut(self.in_channels * k)
            .enumerate()
            .for_each(|(oc, dw_row)| {
                for b in 0..x.batch {
                    let gyr = gy.row(b, oc);
                    for ic in 0..self.in_channels {
                        let xr = x.row(b, ic);
                        let dw = &mut dw_row[ic * k..(ic + 1) * k];
                        for (t, &g) in gyr.iter().enumerate() {
                            if g == 0.0 {
                                continue;
                            }
                            let taps = self.taps(t, x.len);
                            let start = t * self.stride + taps.start - self.padding;
                            axpy(g, &xr[start..start + taps.len()], &mut dw[taps]);
                        }
                    }
                }
            });

        let bias = (0..self.out_channels)
            .into_par_iter()
            .map(|oc| (0..gy.batch).map(|b| gy.row(b, oc).iter().sum::<f32>()).sum())
            .collect();

        let input = need_input_grad.then(|| {
            let mut dx = FeatureMap::zeros(x.batch, self.in_channels, x.len);
            dx.data.par_chunks_mut(x.len).enumerate().for_each(|(row, dxr)| {
                let (b, ic) = (row / self.in_channels, row % self.in_channels);
                for oc in 0..self.out_channels {
                    let wr = self.kernel_row(oc, ic);
                    for (t, &g) in gy.row(b, oc).iter().enumerate() {
                        if g == 0.0 {
                            continue;
                        }
                        let taps = self.taps(t, x.len);
                        let start = t * self.stride + taps.start - self.padding;
                        let n = taps.len();
                        axpy(g, &wr[taps], &mut dxr[start..start + n]);
                    }
                }
            });
            dx
        });

        ConvGrads { weight, bias, input }
    }
}

// ============================================================================
// BatchNorm1d
// ============================================================================

pub const BN_EPS: f32 = 1e-5;
pub const BN_MOMENTUM: f32 = 0.1;

#[derive(Debug, Clone)]
pub struct BatchNorm1d {
    pub channels: usize,
    /// gamma
    pub weight: Vec<f32>,
    /// beta
    pub bias: Vec<f32>,
    pub running_mean: Vec<f32>,
    pub running_var: Vec<f32>,
}

/// Saved activations for [`BatchNorm1d::backward`].
#[derive(Debug, Clone)]
pub struct BnCache {
    x_hat: FeatureMap,
    inv_std: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct BnGrads {
    pub weight: Vec<f32>,
    pub bias: Vec<f32>,
    pub input: FeatureMap,
}

impl BatchNorm1d {
    pub fn new(channels: usize) -> Self {
        Self {
            channels,
            weight: vec![1.0; channels],
            bias: vec![0.0; channels],
            running_mean: vec![0.0; channels],
            running_var: vec![1.0; channels],
        }
    }

    /// Normalize with the running statistics.
    pub fn forward_eval(&self, x: &FeatureMap) -> FeatureMap {
        let scale: Vec<f32> = self
            .running_var
            .iter()
            .zip(&self.weight)
            .map(|(v, g)| g / (v + BN_EPS).sqrt())
            .collect();
        let mut out = x.clone();
        out.data.par_chunks_mut(x.len).enumerate().for_each(|(row, y)| {
            let c = row % self.channels;
            let (mean, s, beta) = (self.running_mean[c], scale[c], self.bias[c]);
            for v in y.iter_mut() {
                *v = (*v - mean) * s + beta;
            }
        });
        out
    }

    /// Normalize with batch statistics and update the running ones.
    pub fn forward_train(&mut self, x: &FeatureMap) -> (FeatureMap, BnCache) {
        let n = x.batch * x.len;
        let stats: Vec<(f64, f64)> = (0..self.channels)
            .into_par_iter()
            .map(|c| {
                let values = || (0..x.batch).flat_map(move |b| x.row(b, c).iter().map(|&v| f64::from(v)));
                let mean = values().sum::<f64>() / n as f64;
                let var = values().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
                (mean, var)
            })
            .collect();

        // Running variance tracks the unbiased estimate.
        let unbias = if n > 1 { n as f64 / (n - 1) as f64 } else { 1.0 };
        let m = f64::from(BN_MOMENTUM);
        for (c, &(mean, var)) in stats.iter().enumerate() {
            self.running_mean[c] = ((1.0 - m) * f64::from(self.running_mean[c]) + m * mean) as f32;
            self.running_var[c] =
                ((1.0 - m) * f64::from(self.running_var[c]) + m * var * unbias) as f32;
        }

        let inv_std: Vec<f32> = stats
            .iter()
            .map(|&(_, var)| (1.0 / (var + f64::from(BN_EPS)).sqrt()) as f32)
            .collect();

        let mut x_hat = x.clone();
        let mut out = x.clone();
        x_hat
            .data
            .par_chunks_mut(x.len)
            .zip(out.data.par_chunks_mut(x.len))
            .enumerate()
            .for_each(|(row, (xh, y))| {
                let c = row % self.channels;
                let mean = stats[c].0 as f32;
                for (h, o) in xh.iter_mut().zip(y.iter_mut()) {
                    *h = (*h - mean) * inv_std[c];
                    *o = self.weight[c] * *h + self.bias[c];
                }
            });

        (out, BnCache { x_hat, inv_std })
    }

    pub fn backward(&self, cache: &BnCache, gy: &FeatureMap) -> BnGrads {
        let x_hat = &cache.x_hat;
        let n = (gy.batch * gy.len) as f32;

        // Per channel: (sum gy, sum gy * x_hat)
        let sums: Vec<(f32, f32)> = (0..self.channels)
            .into_par_iter()
            .map(|c| {
                let mut sg = 0.0_f64;
                let mut sgx = 0.0_f64;
                for b in 0..gy.batch {
                    for (g, h) in gy.row(b, c).iter().zip(x_hat.row(b, c)) {
                        sg += f64::from(*g);
                        sgx += f64::from(*g) * f64::from(*h);
                    }
                }
                (sg as f32, sgx as f32)
            })
            .collect();

        let mut input = FeatureMap::zeros(gy.batch, gy.channels, gy.len);
        input.data.par_chunks_mut(gy.len).enumerate().for_each(|(row, dx)| {
            let (b, c) = (row / self.channels, row % self.channels);
            let (sg, sgx) = sums[c];
            let k = self.weight[c] * cache.inv_std[c] / n;
            for ((d, g), h) in dx.iter_mut().zip(gy.row(b, c)).zip(x_hat.row(b, c)) {
                *d = k * (n * g - sg - h * sgx);
            }
        });

        BnGrads {
            weight: sums.iter().map(|s| s.1).collect(),
            bias: sums.iter().map(|s| s.0).collect(),
            input,
        }
    }
}

// ============================================================================
// Activations, pooling, dropout
// ============================================================================

pub fn relu_in_place(data: &mut [f32]) {
    data.par_iter_mut().for_each(|v| *v = v.max(0.0));
}

/// Zero gradient entries whose ReLU output was not positive.
pub fn relu_backward(grad: &mut [f32], output: &[f32]) {
    grad.par_iter_mut().zip(output).for_each(|(g, &o)| {
        if o <= 0.0 {
            *g = 0.0;
        }
    });
}

/// Window `[floor(i*L/n), ceil((i+1)*L/n))` of adaptive pooling bin `i`.
#[inline]
fn pool_window(i: usize, in_len: usize, out_len: usize) -> Range<usize> {
    let start = i * in_len / out_len;
    let end = ((i + 1) * in_len).div_ceil(out_len);
    start..end
}

/// Adaptive average pooling of every row to `out_len` positions.
pub fn adaptive_avg_pool(x: &FeatureMap, out_len: usize) -> FeatureMap {
    let mut out = FeatureMap::zeros(x.batch, x.channels, out_len);
    out.data.par_chunks_mut(out_len).enumerate().for_each(|(row, y)| {
        let xr = &x.data[row * x.len..(row + 1) * x.len];
        for (i, yi) in y.iter_mut().enumerate() {
            let w = pool_window(i, x.len, out_len);
            let count = w.len() as f32;
            *yi = xr[w].iter().sum::<f32>() / count;
        }
    });
    out
}

pub fn adaptive_avg_pool_backward(gy: &FeatureMap, in_len: usize) -> FeatureMap {
    let mut dx = FeatureMap::zeros(gy.batch, gy.channels, in_len);
    dx.data.par_chunks_mut(in_len).enumerate().for_each(|(row, dxr)| {
        let gr = &gy.data[row * gy.len..(row + 1) * gy.len];
        for (i, &g) in gr.iter().enumerate() {
            let w = pool_window(i, in_len, gy.len);
            let share = g / w.len() as f32;
            for d in &mut dxr[w] {
                *d += share;
            }
        }
    });
    dx
}

/// Inverted-dropout mask: each entry is 0 with probability `p`, else `1/(1-p)`.
pub fn dropout_mask(len: usize, p: f32, rng: &mut impl Rng) -> Vec<f32> {
    let keep = 1.0 / (1.0 - p);
    (0..len)
        .map(|_| if rng.gen::<f32>() < p { 0.0 } else { keep })
        .collect()
}

pub fn apply_mask(data: &mut [f32], mask: &[f32]) {
    for (v, m) in data.iter_mut().zip(mask) {
        *v *= m;
    }
}

// ============================================================================
// Linear
// ============================================================================

#[derive(Debug, Clone)]
pub struct Linear {
    pub in_features: usize,
    pub out_features: usize,
    pub weight: Vec<f32>,
    pub bias: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct LinearGrads {
    pub weight: Vec<f32>,
    pub bias: Vec<f32>,
    pub input: Matrix,
}

impl Linear {
    pub fn new(in_features: usize, out_features: usize, rng: &mut impl Rng) -> Self {
        Self {
            in_features,
            out_features,
            weight: uniform_init(out_features * in_features, in_features, rng),
            bias: uniform_init(out_features, in_features, rng),
        }
    }

    pub fn weight_shape(&self) -> Vec<usize> {
        vec![self.out_features, self.in_features]
    }

    #[inline]
    fn weight_row(&self, o: usize) -> &[f32] {
        &self.weight[o * self.in_features..(o + 1) * self.in_features]
    }

    pub fn forward(&self, x: &Matrix) -> Matrix {
        let mut out = Matrix::zeros(x.rows, self.out_features);
        out.data.par_iter_mut().enumerate().for_each(|(idx, y)| {
            let (b, o) = (idx / self.out_features, idx % self.out_features);
            *y = self.bias[o] + dot(self.weight_row(o), x.row(b));
        });
        out
    }

    pub fn backward(&self, x: &Matrix, gy: &Matrix) -> LinearGrads {
        let mut weight = vec![0.0_f32; self.weight.len()];
        weight
            .par_chunks_mut(self.in_features)
            .enumerate()
            .for_each(|(o, dw)| {
                for b in 0..x.rows {
                    let g = gy.row(b)[o];
                    if g != 0.0 {
                        axpy(g, x.row(b), dw);
                    }
                }
            });

        let bias = (0..self.out_features)
            .map(|o| (0..gy.rows).map(|b| gy.row(b)[o]).sum())
            .collect();

        let mut input = Matrix::zeros(x.rows, self.in_features);
        input
            .data
            .par_chunks_mut(self.in_features)
            .enumerate()
            .for_each(|(b, dx)| {
                for (o, &g) in gy.row(b).iter().enumerate() {
                    if g != 0.0 {
                        axpy(g, self.weight_row(o), dx);
                    }
                }
            });

        LinearGrads { weight, bias, input }
    }
}

// ============================================================================
// Loss and output heads
// ============================================================================

/// Numerically stable softmax of one logit row.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&z| (z - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Index of the largest value; the first one wins ties.
pub fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(bi, bv), (i, &v)| if v > bv { (i, v) } else { (bi, bv) })
        .0
}

/// Mean cross-entropy over the batch and its gradient w.r.t. the logits.
pub fn cross_entropy(logits: &Matrix, labels: &[usize]) -> (f32, Matrix) {
    let batch = logits.rows as f32;
    let mut grad = Matrix::zeros(logits.rows, logits.cols);
    let mut loss = 0.0_f64;

    for (b, &label) in labels.iter().enumerate() {
        let probs = softmax(logits.row(b));
        loss -= f64::from(probs[label].max(f32::MIN_POSITIVE).ln());
        let g = &mut grad.data[b * logits.cols..(b + 1) * logits.cols];
        for (gi, p) in g.iter_mut().zip(&probs) {
            *gi = p / batch;
        }
        g[label] -= 1.0 / batch;
    }

    ((loss / f64::from(batch)) as f32, grad)
}
