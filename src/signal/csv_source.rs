//! Raw sensor CSV exports.
//!
//! The acquisition boards export one row per ADC sample, typically
//! `Sample,Time_ms,Voltage_V`. Only the voltage column is a signal; the
//! others are counters.
//!
//! Column choice:
//! 1. `Voltage_V`
//! 2. `voltage`
//! 3. the first numeric column whose lowercase name contains none of
//!    `sample`, `time`, `index`. A column is numeric when every non-blank
//!    cell in the file parses as a number and at least one is finite.

use std::io::BufRead;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Substrings that mark a column as a counter rather than a signal.
const NON_SIGNAL_MARKERS: [&str; 3] = ["sample", "time", "index"];

const PREFERRED_COLUMNS: [&str; 2] = ["Voltage_V", "voltage"];

#[derive(Debug, Error)]
pub enum CsvSignalError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("csv has no header row")]
    MissingHeader,
    #[error("no suitable signal column found in {columns:?}")]
    NoSignalColumn { columns: Vec<String> },
}

/// One signal column extracted from a CSV file.
#[derive(Debug, Clone)]
pub struct CsvSignal {
    /// Header name of the column the samples came from.
    pub column: String,
    pub samples: Vec<f64>,
    /// Data rows whose signal cell was missing or not a number.
    pub skipped_rows: usize,
}

/// Read the signal column of a CSV file.
pub fn read_signal(path: &Path) -> Result<CsvSignal, CsvSignalError> {
    let file = std::fs::File::open(path).map_err(|source| CsvSignalError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_signal(std::io::BufReader::new(file)).map_err(|e| match e {
        CsvSignalError::Io { source, .. } => CsvSignalError::Io {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    })
}

/// Parse CSV text from any buffered reader.
pub fn parse_signal<R: BufRead>(reader: R) -> Result<CsvSignal, CsvSignalError> {
    let io_err = |source| CsvSignalError::Io { path: PathBuf::new(), source };
    let mut lines = reader.lines();

    let header_line = loop {
        match lines.next() {
            Some(line) => {
                let line = line.map_err(io_err)?;
                if !line.trim().is_empty() {
                    break line;
                }
            }
            None => return Err(CsvSignalError::MissingHeader),
        }
    };
    let columns: Vec<String> = csv_split(header_line.trim_start_matches('\u{feff}'))
        .into_iter()
        .map(|c| c.trim().to_string())
        .collect();

    // A named voltage column is streamed directly.
    if let Some(idx) = preferred_column(&columns) {
        let mut samples = Vec::new();
        let mut skipped_rows = 0;
        for line in lines {
            let line = line.map_err(io_err)?;
            if line.trim().is_empty() {
                continue;
            }
            match csv_split(&line).get(idx).and_then(|v| parse_number(v)) {
                Some(v) => samples.push(v),
                None => skipped_rows += 1,
            }
        }
        return Ok(CsvSignal { column: columns[idx].clone(), samples, skipped_rows });
    }

    // Otherwise every non-counter column is a candidate until one of its
    // cells holds text. Blank cells are missing values, not text.
    let mut candidates: Vec<Candidate> = columns
        .iter()
        .enumerate()
        .filter(|(_, name)| is_signal_candidate(name))
        .map(|(idx, _)| Candidate { idx, values: Vec::new(), numeric: true })
        .collect();

    for line in lines {
        let line = line.map_err(io_err)?;
        if line.trim().is_empty() {
            continue;
        }
        let fields = csv_split(&line);
        for c in candidates.iter_mut().filter(|c| c.numeric) {
            match classify_cell(fields.get(c.idx).map_or("", String::as_str)) {
                Cell::Missing => c.values.push(None),
                Cell::Number(v) => c.values.push(v.is_finite().then_some(v)),
                Cell::Text => {
                    c.numeric = false;
                    c.values = Vec::new();
                }
            }
        }
    }

    let chosen = candidates
        .into_iter()
        .find(|c| c.numeric && c.values.iter().any(Option::is_some))
        .ok_or_else(|| CsvSignalError::NoSignalColumn { columns: columns.clone() })?;

    let skipped_rows = chosen.values.iter().filter(|v| v.is_none()).count();
    Ok(CsvSignal {
        column: columns[chosen.idx].clone(),
        samples: chosen.values.into_iter().flatten().collect(),
        skipped_rows,
    })
}

/// Fallback column being judged over the whole file.
struct Candidate {
    idx: usize,
    /// One entry per data row; `None` for blank or non-finite cells.
    values: Vec<Option<f64>>,
    numeric: bool,
}

enum Cell {
    Missing,
    Number(f64),
    Text,
}

fn classify_cell(cell: &str) -> Cell {
    let cell = cell.trim();
    if cell.is_empty() {
        Cell::Missing
    } else {
        cell.parse::<f64>().map_or(Cell::Text, Cell::Number)
    }
}

/// Index of `Voltage_V`, else `voltage`.
pub fn preferred_column(columns: &[String]) -> Option<usize> {
    PREFERRED_COLUMNS
        .iter()
        .find_map(|preferred| columns.iter().position(|c| c == preferred))
}

/// Whether a column name may hold the signal (not a sample/time/index counter).
pub fn is_signal_candidate(name: &str) -> bool {
    let lower = name.to_lowercase();
    !NON_SIGNAL_MARKERS.iter().any(|m| lower.contains(m))
}

fn parse_number(cell: &str) -> Option<f64> {
    let cell = cell.trim();
    if cell.is_empty() {
        return None;
    }
    cell.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Split a CSV line respecting double-quoted fields (`""` escapes a quote).
fn csv_split(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            '\r' => {}
            _ => current.push(ch),
        }
    }
    fields.push(current);
    fields
}
