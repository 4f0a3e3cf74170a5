//! Scan data types.
//!
//! Separated from the walker so the daemon, renderer and cache can share them
//! without pulling in traversal code.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default per-file size limit: 1 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024;

/// One discovered file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Absolute path on disk.
    pub path: PathBuf,
    /// Path relative to the project root, `/`-separated.
    pub relative_path: String,
    /// Size in bytes at scan time.
    pub size: u64,
    /// Lowercase extension without the dot, empty when the file has none.
    pub extension: String,
    pub binary: bool,
}

/// How the surviving file set is ordered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    /// Lexicographic on relative path.
    #[default]
    Path,
    /// Largest first, path as tiebreak.
    Size,
    /// Extension, then path.
    Extension,
}

impl std::str::FromStr for SortMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "path" => Ok(SortMode::Path),
            "size" => Ok(SortMode::Size),
            "extension" | "ext" => Ok(SortMode::Extension),
            other => Err(format!("unknown sort mode: {}", other)),
        }
    }
}

/// Fully resolved options for one scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOptions {
    /// Glob whitelist. Empty means everything.
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    /// Normalized extensions to keep. Empty means no filter.
    pub extensions: Vec<String>,
    pub max_file_size: u64,
    pub sort: SortMode,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            extensions: Vec::new(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            sort: SortMode::Path,
        }
    }
}

/// Normalize an extension: strip leading dots, lowercase.
pub fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// Normalized extension of a path, empty when there is none.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| normalize_extension(&e.to_string_lossy()))
        .unwrap_or_default()
}

/// The outcome of one scan. Never mutated after construction.
#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    root: PathBuf,
    files: Vec<FileRecord>,
    total_bytes: u64,
    extensions: BTreeMap<String, usize>,
}

impl ScanResult {
    /// Build a result from an already filtered and sorted file list.
    ///
    /// Totals are always derived from `files`, so `total_bytes` can never
    /// disagree with the records.
    pub fn new(root: PathBuf, files: Vec<FileRecord>) -> Self {
        let total_bytes = files.iter().map(|f| f.size).sum();
        let mut extensions = BTreeMap::new();
        for file in &files {
            *extensions.entry(file.extension.clone()).or_insert(0) += 1;
        }
        Self {
            root,
            files,
            total_bytes,
            extensions,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files(&self) -> &[FileRecord] {
        &self.files
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn extensions(&self) -> &BTreeMap<String, usize> {
        &self.extensions
    }

    pub fn relative_paths(&self) -> Vec<String> {
        self.files.iter().map(|f| f.relative_path.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(rel: &str, size: u64) -> FileRecord {
        FileRecord {
            path: PathBuf::from("/p").join(rel),
            relative_path: rel.to_string(),
            size,
            extension: extension_of(Path::new(rel)),
            binary: false,
        }
    }

    #[test]
    fn test_totals_follow_records() {
        let result = ScanResult::new(
            PathBuf::from("/p"),
            vec![record("a.rs", 10), record("b.rs", 5), record("README", 7)],
        );
        assert_eq!(result.total_bytes(), 22);
        assert_eq!(result.file_count(), 3);
        assert_eq!(result.extensions().get("rs"), Some(&2));
        assert_eq!(result.extensions().get(""), Some(&1));
    }

    #[test]
    fn test_extension_normalization() {
        assert_eq!(normalize_extension(".RS"), "rs");
        assert_eq!(normalize_extension("md"), "md");
        assert_eq!(extension_of(Path::new("src/Main.TSX")), "tsx");
        assert_eq!(extension_of(Path::new("Makefile")), "");
    }

    #[test]
    fn test_sort_mode_parsing() {
        assert_eq!("size".parse::<SortMode>(), Ok(SortMode::Size));
        assert_eq!("EXT".parse::<SortMode>(), Ok(SortMode::Extension));
        assert!("random".parse::<SortMode>().is_err());
    }
}
