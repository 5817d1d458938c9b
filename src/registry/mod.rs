//! Class Registry - the persisted bijection between class names and indices.
//!
//! Built once by the trainer from the chunk corpus' class directories,
//! written next to the weights, and loaded read-only by the inference
//! engine. The model's output width is always `registry.len()`.
//!
//! ## File format
//!
//! ```text
//! 0:bearing
//! 1:belt
//! 2:flywheel
//! 3:healthy
//! ```
//!
//! One `<index>:<name>` per line, written in index order. The loader accepts
//! any line order, ignores lines without a `:`, and splits at the first `:`
//! so names may themselves contain colons.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use crate::config::defaults;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("class registry file not found: {0}")]
    NotFound(PathBuf),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line}: invalid class index {raw:?}")]
    InvalidIndex { line: usize, raw: String },
    #[error("line {line}: empty class name")]
    EmptyName { line: usize },
    #[error("duplicate class index {0}")]
    DuplicateIndex(usize),
    #[error("duplicate class name {0:?}")]
    DuplicateName(String),
    #[error("class indices are not contiguous from 0: index {0} is missing")]
    MissingIndex(usize),
    #[error("class registry is empty")]
    Empty,
    #[error("class index {index} out of range for {len} classes")]
    OutOfRange { index: usize, len: usize },
}

/// Result of a tolerant lookup.
///
/// `Fallback` is returned for indices the registry does not know; it carries
/// the configured fallback label so callers can still answer, but must not
/// be mistaken for a genuine prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelLookup<'a> {
    Registered(&'a str),
    Fallback(&'a str),
}

impl<'a> LabelLookup<'a> {
    pub const fn label(&self) -> &'a str {
        match self {
            Self::Registered(name) | Self::Fallback(name) => name,
        }
    }

    pub const fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassRegistry {
    /// Names in index order.
    names: Vec<String>,
    by_name: HashMap<String, usize>,
    fallback: String,
}

impl ClassRegistry {
    /// Build from a set of class names: sorted lexically, indices from 0.
    /// Duplicates collapse to one entry.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let sorted: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        Self::from_ordered(sorted.into_iter().collect())
    }

    /// Build from the subdirectories of a corpus root. Plain files are ignored.
    pub fn scan_dir(root: &Path) -> Result<Self, RegistryError> {
        let io_err = |source| RegistryError::Io { path: root.to_path_buf(), source };
        let mut names = Vec::new();
        for entry in std::fs::read_dir(root).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            if entry.file_type().map_err(io_err)?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(Self::from_names(names))
    }

    fn from_ordered(names: Vec<String>) -> Self {
        let by_name = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();
        Self {
            names,
            by_name,
            fallback: defaults::FALLBACK_LABEL.to_string(),
        }
    }

    /// Replace the label reported for unknown indices.
    #[must_use]
    pub fn with_fallback(mut self, label: impl Into<String>) -> Self {
        self.fallback = label.into();
        self
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn fallback_label(&self) -> &str {
        &self.fallback
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Name for `index`, or the fallback label when out of range.
    pub fn lookup(&self, index: usize) -> LabelLookup<'_> {
        match self.names.get(index) {
            Some(name) => LabelLookup::Registered(name),
            None => {
                warn!(
                    index,
                    classes = self.names.len(),
                    fallback = %self.fallback,
                    "Class index not in registry, reporting fallback label"
                );
                LabelLookup::Fallback(&self.fallback)
            }
        }
    }

    /// Name for `index`, or an error when out of range.
    pub fn lookup_strict(&self, index: usize) -> Result<&str, RegistryError> {
        self.names
            .get(index)
            .map(String::as_str)
            .ok_or(RegistryError::OutOfRange { index, len: self.names.len() })
    }

    /// Serialized `<index>:<name>` lines in index order.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (i, name) in self.names.iter().enumerate() {
            // Writing to a String cannot fail.
            let _ = writeln!(out, "{i}:{name}");
        }
        out
    }

    /// Parse registry text. The fallback label is reset to the default.
    pub fn parse(text: &str) -> Result<Self, RegistryError> {
        let mut entries: Vec<(usize, String)> = Vec::new();

        for (line_no, line) in text.lines().enumerate() {
            let Some((raw_idx, name)) = line.split_once(':') else {
                continue;
            };
            let line = line_no + 1;
            let index = raw_idx
                .trim()
                .parse::<usize>()
                .map_err(|_| RegistryError::InvalidIndex { line, raw: raw_idx.to_string() })?;
            // Leading spaces belong to the name; trailing ones (and `\r`) do not.
            let name = name.trim_end();
            if name.trim_start().is_empty() {
                return Err(RegistryError::EmptyName { line });
            }
            entries.push((index, name.to_string()));
        }

        if entries.is_empty() {
            return Err(RegistryError::Empty);
        }

        entries.sort_by_key(|(i, _)| *i);
        let mut names = Vec::with_capacity(entries.len());
        let mut seen = BTreeSet::new();
        for (expected, (index, name)) in entries.into_iter().enumerate() {
            if index < expected {
                return Err(RegistryError::DuplicateIndex(index));
            }
            if index > expected {
                return Err(RegistryError::MissingIndex(expected));
            }
            if !seen.insert(name.clone()) {
                return Err(RegistryError::DuplicateName(name));
            }
            names.push(name);
        }

        Ok(Self::from_ordered(names))
    }

    /// Write the registry file, replacing any existing one.
    pub fn save(&self, path: &Path) -> Result<(), RegistryError> {
        let tmp = path.with_extension("txt.tmp");
        let io_err = |source| RegistryError::Io { path: path.to_path_buf(), source };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(&tmp, self.to_text()).map_err(io_err)?;
        std::fs::rename(&tmp, path).map_err(io_err)
    }

    /// Load a registry file. A missing or unparsable file is an error.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let text = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                RegistryError::NotFound(path.to_path_buf())
            } else {
                RegistryError::Io { path: path.to_path_buf(), source }
            }
        })?;
        Self::parse(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sorted_index_assignment() {
        let registry = ClassRegistry::from_names(["bearing", "belt", "healthy", "flywheel"]);
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.index_of("bearing"), Some(0));
        assert_eq!(registry.index_of("belt"), Some(1));
        assert_eq!(registry.index_of("flywheel"), Some(2));
        assert_eq!(registry.index_of("healthy"), Some(3));
        assert_eq!(registry.index_of("gear"), None);
    }

    #[test]
    fn test_duplicate_names_collapse() {
        let registry = ClassRegistry::from_names(["b", "a", "b"]);
        assert_eq!(registry.names(), ["a", "b"]);
    }

    #[test]
    fn test_lookup_fallback_is_distinguishable() {
        let registry = ClassRegistry::from_names(["belt", "healthy"]);
        assert_eq!(registry.lookup(1), LabelLookup::Registered("healthy"));

        let miss = registry.lookup(7);
        assert_eq!(miss, LabelLookup::Fallback("healthy"));
        assert_eq!(miss.label(), "healthy");
        assert!(miss.is_fallback());
        assert_ne!(miss, registry.lookup(1));
    }

    #[test]
    fn test_custom_fallback_label() {
        let registry = ClassRegistry::from_names(["belt"]).with_fallback("unknown");
        assert_eq!(registry.lookup(3), LabelLookup::Fallback("unknown"));
        assert!(matches!(
            registry.lookup_strict(3),
            Err(RegistryError::OutOfRange { index: 3, len: 1 })
        ));
        assert_eq!(registry.lookup_strict(0).unwrap(), "belt");
    }

    #[test]
    fn test_text_format() {
        let registry = ClassRegistry::from_names(["healthy", "bearing"]);
        assert_eq!(registry.to_text(), "0:bearing\n1:healthy\n");
    }

    #[test]
    fn test_parse_tolerates_order_and_junk_lines() {
        let text = "# generated\n3:healthy\n\n0:bearing\n2:flywheel\nno separator here\n1:belt\n";
        let registry = ClassRegistry::parse(text).unwrap();
        assert_eq!(registry.names(), ["bearing", "belt", "flywheel", "healthy"]);
    }

    #[test]
    fn test_parse_splits_at_first_colon() {
        let registry = ClassRegistry::parse("0:motor:left\n").unwrap();
        assert_eq!(registry.names(), ["motor:left"]);
    }

    #[test]
    fn test_parse_keeps_leading_space_in_name() {
        let registry = ClassRegistry::parse("0: belt\r\n1:healthy  \n").unwrap();
        assert_eq!(registry.names(), [" belt", "healthy"]);
        assert_eq!(registry.index_of(" belt"), Some(0));
        assert_eq!(registry.index_of("belt"), None);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            ClassRegistry::parse("x:belt\n"),
            Err(RegistryError::InvalidIndex { line: 1, .. })
        ));
        assert!(matches!(
            ClassRegistry::parse("0:a\n0:b\n"),
            Err(RegistryError::DuplicateIndex(0))
        ));
        assert!(matches!(
            ClassRegistry::parse("0:a\n2:b\n"),
            Err(RegistryError::MissingIndex(1))
        ));
        assert!(matches!(
            ClassRegistry::parse("0:a\n1:a\n"),
            Err(RegistryError::DuplicateName(_))
        ));
        assert!(matches!(ClassRegistry::parse("0:\n"), Err(RegistryError::EmptyName { line: 1 })));
        assert!(matches!(ClassRegistry::parse("0:   \n"), Err(RegistryError::EmptyName { line: 1 })));
        assert!(matches!(ClassRegistry::parse("nothing\n"), Err(RegistryError::Empty)));
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("class_mapping.txt");
        let registry = ClassRegistry::from_names(["bearing", "belt", "healthy", "flywheel"]);

        registry.save(&path).unwrap();
        let loaded = ClassRegistry::load(&path).unwrap();
        assert_eq!(loaded, registry);
        assert!(!dir.path().join("class_mapping.txt.tmp").exists());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ClassRegistry::load(&dir.path().join("absent.txt")).unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[test]
    fn test_scan_dir_ignores_files() {
        let dir = tempfile::tempdir().unwrap();
        for class in ["healthy", "belt", "bearing"] {
            std::fs::create_dir(dir.path().join(class)).unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let registry = ClassRegistry::scan_dir(dir.path()).unwrap();
        assert_eq!(registry.names(), ["bearing", "belt", "healthy"]);
    }
}
