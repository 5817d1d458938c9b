//! Signal handling shared by the offline corpus builder and the live path.
//!
//! - [`normalize`]: the per-chunk transform used identically at training and
//!   inference time
//! - [`chunks`]: fixed-size, non-overlapping windows over a long recording
//! - [`chunk_store`]: `.npy` persistence of normalized chunks
//! - [`csv_source`]: column detection and parsing of raw sensor CSV exports
//! - [`corpus`]: raw corpus → chunk corpus conversion

pub mod chunk_store;
pub mod corpus;
pub mod csv_source;
mod normalizer;

pub use normalizer::{normalize, ChunkStats};

/// Split `signal` into `floor(len / chunk_len)` contiguous windows of exactly
/// `chunk_len` samples. Chunk `i` covers `[i * chunk_len, (i + 1) * chunk_len)`;
/// a trailing remainder shorter than `chunk_len` is dropped.
///
/// The iterator is lazy and single-pass: each window is meant to be
/// normalized and written before the next one is produced.
///
/// # Panics
///
/// Panics if `chunk_len` is 0.
pub fn chunks<T>(signal: &[T], chunk_len: usize) -> std::slice::ChunksExact<'_, T> {
    signal.chunks_exact(chunk_len)
}

/// Number of full chunks [`chunks`] yields for a signal of `signal_len` samples.
pub const fn chunk_count(signal_len: usize, chunk_len: usize) -> usize {
    signal_len / chunk_len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_boundaries_and_remainder() {
        let signal: Vec<u32> = (0..1000).collect();
        let windows: Vec<&[u32]> = chunks(&signal, 300).collect();

        assert_eq!(windows.len(), 3);
        assert_eq!(windows.len(), chunk_count(signal.len(), 300));
        for (i, w) in windows.iter().enumerate() {
            assert_eq!(w.len(), 300);
            assert_eq!(w[0], (i * 300) as u32);
            assert_eq!(w[299], (i * 300 + 299) as u32);
        }
        // Samples 900..1000 are discarded.
        assert!(windows.iter().all(|w| !w.contains(&950)));
    }

    #[test]
    fn test_signal_shorter_than_chunk() {
        let signal = vec![1.0_f32; 99];
        assert_eq!(chunks(&signal, 100).count(), 0);
        assert_eq!(chunk_count(99, 100), 0);
    }

    #[test]
    fn test_exact_multiple() {
        let signal = vec![0.5_f64; 38_400 * 2];
        let windows: Vec<_> = chunks(&signal, 38_400).collect();
        assert_eq!(windows.len(), 2);
        assert!(windows.iter().all(|w| w.len() == 38_400));
    }
}
