//! Per-chunk normalization: z-score, then max-abs scaling into [-1, 1].
//!
//! This is the one transform shared by offline preprocessing and online
//! inference. There are no learned statistics: every chunk is normalized
//! against itself, so the only way train and serve can drift is by calling
//! something other than [`normalize`].
//!
//! ```text
//! mu, sigma = mean(x), population_std(x)
//! sigma == 0          -> zeros
//! z = (x - mu) / sigma
//! m = max |z|
//! m > 0               -> z / m
//! m == 0              -> z
//! ```

use statrs::statistics::Statistics;

/// Normalize one chunk.
///
/// Statistics are accumulated in f64 and the result is emitted as f32, the
/// dtype of persisted chunks and of the model input. Accepts `f32` (live
/// requests) and `f64` (CSV ingestion) samples.
pub fn normalize<T>(chunk: &[T]) -> Vec<f32>
where
    T: Copy + Into<f64>,
{
    if chunk.is_empty() {
        return Vec::new();
    }

    let mean = widen(chunk).mean();
    let std = widen(chunk).population_std_dev();

    // Constant chunk: all zeros, not the centered original.
    if std.is_nan() || std <= 0.0 {
        return vec![0.0; chunk.len()];
    }

    let z: Vec<f64> = widen(chunk).map(|x| (x - mean) / std).collect();
    let max_abs = z.iter().abs_max();

    if max_abs > 0.0 {
        z.iter().map(|&v| (v / max_abs) as f32).collect()
    } else {
        z.iter().map(|&v| v as f32).collect()
    }
}

fn widen<T>(chunk: &[T]) -> impl Iterator<Item = f64> + '_
where
    T: Copy + Into<f64>,
{
    chunk.iter().map(|&x| x.into())
}

/// Summary statistics of a chunk, for logging.
#[derive(Debug, Clone, Copy)]
pub struct ChunkStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
}

impl ChunkStats {
    pub fn of<T>(chunk: &[T]) -> Self
    where
        T: Copy + Into<f64>,
    {
        Self {
            min: Statistics::min(widen(chunk)),
            max: Statistics::max(widen(chunk)),
            mean: widen(chunk).mean(),
            std: widen(chunk).population_std_dev(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(len: usize, period: f64, amplitude: f64, offset: f64) -> Vec<f32> {
        (0..len)
            .map(|i| {
                let phase = 2.0 * std::f64::consts::PI * i as f64 / period;
                (offset + amplitude * phase.sin()) as f32
            })
            .collect()
    }

    fn max_abs(v: &[f32]) -> f32 {
        v.iter().fold(0.0_f32, |m, x| m.max(x.abs()))
    }

    #[test]
    fn test_output_scaled_to_unit_max_abs() {
        let chunk = sine(4096, 97.0, 3.5, 12.0);
        let out = normalize(&chunk);

        assert_eq!(out.len(), chunk.len());
        assert!((max_abs(&out) - 1.0).abs() < 1e-6);
        let mean: f64 = out.iter().map(|&x| f64::from(x)).sum::<f64>() / out.len() as f64;
        assert!(mean.abs() < 1e-3, "normalized mean should be ~0, got {mean}");
    }

    #[test]
    fn test_constant_chunk_is_all_zeros() {
        let chunk = vec![2.75_f32; 1000];
        let out = normalize(&chunk);
        assert_eq!(out.len(), 1000);
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_constant_zero_chunk_is_all_zeros() {
        let out = normalize(&[0.0_f32; 64]);
        assert_eq!(out, vec![0.0; 64]);
    }

    #[test]
    fn test_idempotent_on_own_output() {
        let chunk = sine(2048, 33.0, 0.4, -1.0);
        let once = normalize(&chunk);
        let twice = normalize(&once);

        for (a, b) in once.iter().zip(&twice) {
            assert!((a - b).abs() < 1e-5, "{a} vs {b}");
        }
    }

    #[test]
    fn test_affine_invariance() {
        let chunk = sine(1024, 50.0, 1.0, 0.0);
        let shifted: Vec<f32> = chunk.iter().map(|&x| 7.0 * x + 100.0).collect();
        let a = normalize(&chunk);
        let b = normalize(&shifted);
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-4);
        }
    }

    #[test]
    fn test_f64_and_f32_inputs_agree() {
        let chunk32 = sine(512, 21.0, 2.0, 0.5);
        let chunk64: Vec<f64> = chunk32.iter().map(|&x| f64::from(x)).collect();
        assert_eq!(normalize(&chunk32), normalize(&chunk64));
    }

    #[test]
    fn test_single_spike_maps_to_one() {
        let mut chunk = vec![0.0_f32; 100];
        chunk[40] = 5.0;
        let out = normalize(&chunk);
        assert!((out[40] - 1.0).abs() < 1e-6);
        assert!(out.iter().enumerate().all(|(i, &v)| i == 40 || v < 0.0));
    }

    #[test]
    fn test_empty_chunk() {
        assert!(normalize::<f32>(&[]).is_empty());
    }

    #[test]
    fn test_chunk_stats() {
        let stats = ChunkStats::of(&[1.0_f32, 2.0, 3.0, 4.0]);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 4.0);
        assert!((stats.mean - 2.5).abs() < 1e-12);
        assert!((stats.std - 1.25_f64.sqrt()).abs() < 1e-12);
    }
}
