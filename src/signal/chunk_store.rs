//! `.npy` persistence for normalized chunks.
//!
//! Chunk files are NumPy format v1.0, dtype `<f4`, C order, 1-D shape
//! `(L,)`, which keeps the corpus readable by `numpy.load` and lets chunks
//! produced by older Python tooling feed the trainer unchanged. The reader
//! also accepts `f8` data and v2/v3 headers.

use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;

const MAGIC: &[u8; 6] = b"\x93NUMPY";

/// Header block (magic + version + length + dict) is padded to this size.
const HEADER_ALIGN: usize = 64;

#[derive(Debug, Error)]
pub enum ChunkFileError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("not an npy file (bad magic)")]
    BadMagic,
    #[error("unsupported npy version {major}.{minor}")]
    UnsupportedVersion { major: u8, minor: u8 },
    #[error("malformed npy header: {0}")]
    MalformedHeader(String),
    #[error("unsupported npy dtype {0:?} (expected <f4 or <f8)")]
    UnsupportedDtype(String),
    #[error("fortran-ordered arrays are not supported")]
    FortranOrder,
    #[error("expected a 1-D array, got shape {0:?}")]
    NotOneDimensional(Vec<usize>),
    #[error("truncated npy payload: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },
}

/// File name for the `counter`-th chunk of a class.
pub fn chunk_file_name(counter: usize) -> String {
    format!("chunk_{counter:05}.npy")
}

/// Encode a chunk as an npy v1.0 `<f4` byte buffer.
pub fn encode(samples: &[f32]) -> Vec<u8> {
    let dict = format!(
        "{{'descr': '<f4', 'fortran_order': False, 'shape': ({},), }}",
        samples.len()
    );
    // magic(6) + version(2) + header_len(2) + dict + padding + '\n'
    let unpadded = MAGIC.len() + 2 + 2 + dict.len() + 1;
    let padding = (HEADER_ALIGN - unpadded % HEADER_ALIGN) % HEADER_ALIGN;
    let header_len = dict.len() + padding + 1;

    let mut out = Vec::with_capacity(unpadded + padding + samples.len() * 4);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    // Bounded by the dict length (< 100 bytes) plus < 64 bytes of padding.
    out.extend_from_slice(&(header_len as u16).to_le_bytes());
    out.extend_from_slice(dict.as_bytes());
    out.extend(std::iter::repeat(b' ').take(padding));
    out.push(b'\n');
    for v in samples {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Decode an npy buffer holding a 1-D float array.
pub fn decode(bytes: &[u8]) -> Result<Vec<f32>, ChunkFileError> {
    if bytes.len() < 10 || &bytes[..6] != MAGIC {
        return Err(ChunkFileError::BadMagic);
    }
    let (major, minor) = (bytes[6], bytes[7]);
    let (header_len, header_start) = match major {
        1 => (usize::from(u16::from_le_bytes([bytes[8], bytes[9]])), 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(ChunkFileError::MalformedHeader("short v2 preamble".into()));
            }
            let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
            (len as usize, 12)
        }
        _ => return Err(ChunkFileError::UnsupportedVersion { major, minor }),
    };

    let data_start = header_start + header_len;
    let header = bytes
        .get(header_start..data_start)
        .ok_or_else(|| ChunkFileError::MalformedHeader("header extends past end of file".into()))?;
    let header = std::str::from_utf8(header)
        .map_err(|e| ChunkFileError::MalformedHeader(e.to_string()))?;

    let descr = header_value(header, "descr")?;
    let descr = descr.trim_matches(|c| c == '\'' || c == '"');
    if header_value(header, "fortran_order")? == "True" {
        return Err(ChunkFileError::FortranOrder);
    }
    let shape = parse_shape(header_value(header, "shape")?)?;
    let [len] = shape[..] else {
        return Err(ChunkFileError::NotOneDimensional(shape));
    };

    let payload = &bytes[data_start..];
    let elem_size = match descr {
        "<f4" | ">f4" => 4,
        "<f8" | ">f8" => 8,
        other => return Err(ChunkFileError::UnsupportedDtype(other.to_string())),
    };
    let expected = len
        .checked_mul(elem_size)
        .ok_or_else(|| ChunkFileError::MalformedHeader(format!("shape ({len},) is too large")))?;
    if payload.len() < expected {
        return Err(ChunkFileError::Truncated { expected, got: payload.len() });
    }
    let payload = &payload[..expected];

    let samples = match descr {
        "<f4" => payload
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        ">f4" => payload
            .chunks_exact(4)
            .map(|c| f32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        "<f8" => payload
            .chunks_exact(8)
            .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f32)
            .collect(),
        _ => payload
            .chunks_exact(8)
            .map(|c| f64::from_be_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f32)
            .collect(),
    };
    Ok(samples)
}

/// Raw text of a key's value in the header dict, e.g. `'<f4'` or `(38400,)`.
fn header_value<'a>(header: &'a str, key: &str) -> Result<&'a str, ChunkFileError> {
    let needle = format!("'{key}':");
    let start = header
        .find(&needle)
        .map(|i| i + needle.len())
        .ok_or_else(|| ChunkFileError::MalformedHeader(format!("missing key {key:?}")))?;
    let rest = header[start..].trim_start();

    let end = if rest.starts_with('(') {
        rest.find(')').map(|i| i + 1)
    } else {
        rest.find([',', '}'])
    }
    .ok_or_else(|| ChunkFileError::MalformedHeader(format!("unterminated value for {key:?}")))?;

    Ok(rest[..end].trim())
}

fn parse_shape(raw: &str) -> Result<Vec<usize>, ChunkFileError> {
    raw.trim_start_matches('(')
        .trim_end_matches(')')
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.trim_end_matches('L')
                .parse::<usize>()
                .map_err(|e| ChunkFileError::MalformedHeader(format!("shape {raw:?}: {e}")))
        })
        .collect()
}

/// Write one chunk file.
pub fn write_chunk(path: &Path, samples: &[f32]) -> Result<(), ChunkFileError> {
    let io_err = |source| ChunkFileError::Io { path: path.to_path_buf(), source };
    let file = std::fs::File::create(path).map_err(io_err)?;
    let mut writer = std::io::BufWriter::new(file);
    writer.write_all(&encode(samples)).map_err(io_err)?;
    writer.flush().map_err(io_err)
}

/// Read one chunk file.
pub fn read_chunk(path: &Path) -> Result<Vec<f32>, ChunkFileError> {
    let bytes = std::fs::read(path).map_err(|source| ChunkFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    decode(&bytes)
}

/// All `.npy` files directly inside `dir`, sorted by file name.
pub fn list_chunk_files(dir: &Path) -> Result<Vec<PathBuf>, ChunkFileError> {
    let io_err = |source| ChunkFileError::Io { path: dir.to_path_buf(), source };
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("npy") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_is_64_byte_aligned() {
        for len in [0, 1, 7, 38_400, 1_000_000] {
            let bytes = encode(&vec![0.0; len]);
            let header_len = usize::from(u16::from_le_bytes([bytes[8], bytes[9]]));
            assert_eq!((10 + header_len) % HEADER_ALIGN, 0, "len {len}");
            assert_eq!(bytes[10 + header_len - 1], b'\n');
            assert_eq!(bytes.len(), 10 + header_len + len * 4);
        }
    }

    #[test]
    fn test_encode_matches_numpy_header() {
        let bytes = encode(&[1.0, -2.0]);
        let header_len = usize::from(u16::from_le_bytes([bytes[8], bytes[9]]));
        let header = std::str::from_utf8(&bytes[10..10 + header_len]).unwrap();
        assert!(header.starts_with("{'descr': '<f4', 'fortran_order': False, 'shape': (2,), }"));
    }

    #[test]
    fn test_decode_f8_payload() {
        // Hand-built v1.0 file with float64 data, as `np.save` writes for f8 arrays.
        let dict = "{'descr': '<f8', 'fortran_order': False, 'shape': (3,), }";
        let mut header = dict.to_string();
        while (10 + header.len() + 1) % 64 != 0 {
            header.push(' ');
        }
        header.push('\n');
        let mut bytes = b"\x93NUMPY\x01\x00".to_vec();
        bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        for v in [0.5_f64, -0.25, 1.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }

        assert_eq!(decode(&bytes).unwrap(), vec![0.5, -0.25, 1.0]);
    }

    #[test]
    fn test_rejects_two_dimensional() {
        let dict = "{'descr': '<f4', 'fortran_order': False, 'shape': (2, 2), }\n";
        let mut bytes = b"\x93NUMPY\x01\x00".to_vec();
        bytes.extend_from_slice(&(dict.len() as u16).to_le_bytes());
        bytes.extend_from_slice(dict.as_bytes());
        bytes.extend_from_slice(&[0u8; 16]);

        assert!(matches!(
            decode(&bytes),
            Err(ChunkFileError::NotOneDimensional(shape)) if shape == vec![2, 2]
        ));
    }

    #[test]
    fn test_rejects_oversized_shape() {
        let dict = "{'descr': '<f4', 'fortran_order': False, 'shape': (4611686018427387905,), }\n";
        let mut bytes = b"\x93NUMPY\x01\x00".to_vec();
        bytes.extend_from_slice(&(dict.len() as u16).to_le_bytes());
        bytes.extend_from_slice(dict.as_bytes());
        bytes.extend_from_slice(&[0u8; 16]);

        assert!(matches!(decode(&bytes), Err(ChunkFileError::MalformedHeader(_))));
    }

    #[test]
    fn test_rejects_bad_magic_and_truncation() {
        assert!(matches!(decode(b"not numpy at all"), Err(ChunkFileError::BadMagic)));

        let mut bytes = encode(&[1.0, 2.0, 3.0]);
        bytes.truncate(bytes.len() - 4);
        assert!(matches!(
            decode(&bytes),
            Err(ChunkFileError::Truncated { expected: 12, got: 8 })
        ));
    }

    #[test]
    fn test_file_round_trip_and_listing() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let samples: Vec<f32> = (0..100).map(|i| (i as f32 / 50.0) - 1.0).collect();

        for counter in [2, 0, 1] {
            write_chunk(&dir.path().join(chunk_file_name(counter)), &samples).expect("write");
        }
        std::fs::write(dir.path().join("notes.txt"), "ignored").expect("write txt");

        let files = list_chunk_files(dir.path()).expect("list");
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["chunk_00000.npy", "chunk_00001.npy", "chunk_00002.npy"]);
        assert_eq!(read_chunk(&files[0]).expect("read"), samples);
    }
}
