//! Scan module - deterministic file discovery.
//!
//! Respects a built-in deny-list plus the root `.gitignore`, filters by size
//! and extension, drops binary files and returns a sorted, byte-accounted set.

pub mod binary;
pub mod engine;
pub mod types;

pub use binary::{is_binary_file, is_binary_sample};
pub use engine::{canonical_root, scan, scan_async, sort_files, BUILTIN_IGNORES};
pub use types::{
    extension_of, normalize_extension, FileRecord, ScanOptions, ScanResult, SortMode,
    DEFAULT_MAX_FILE_SIZE,
};
