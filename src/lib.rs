//! # ctxpack
//!
//! Pack a project's source files into one document an LLM can read.
//!
//! ctxpack walks a project (gitignore-aware, binaries and oversized files
//! skipped), renders what it found as markdown, JSON, YAML or plain text, and
//! estimates how many tokens the result costs. A background daemon keeps
//! recent scans in memory so repeated requests skip the walk.
//!
//! ## Key Features
//!
//! - **Deterministic**: same tree and options, same file list and order
//! - **Warm**: daemon cache keyed by canonical project root
//! - **Layered config**: user file, project `ctxpack.toml`, presets, flags
//! - **History**: every generated bundle is logged with its metrics
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ctxpack::{render, scan, BundleOptions};
//! use std::path::Path;
//!
//! let options = BundleOptions::default();
//! let result = scan(Path::new("."), &options.scan)?;
//! let bundle = render(&result, &options)?;
//! println!("{} files, ~{} tokens", result.file_count(), ctxpack::estimate_tokens(&bundle));
//! # Ok::<(), ctxpack::PackError>(())
//! ```

pub mod config;
pub mod daemon;
pub mod error;
pub mod history;
pub mod render;
pub mod scan;
pub mod schema;
pub mod tokens;

// Re-exports for convenience
pub use config::{resolve_options, BundleOptions, ConfigFile, DaemonConfig, PartialOptions};
pub use error::{PackError, Result};
pub use history::{HistoryEntry, HistoryStore};
pub use render::{render, OutputFormat};
pub use scan::{scan, FileRecord, ScanOptions, ScanResult, SortMode};
pub use tokens::{estimate_tokens, provider_estimates};

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_scan_render_estimate_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/lib.rs"), "pub fn answer() -> u32 {\n    42\n}\n").unwrap();
        fs::write(root.join("notes.txt"), "remember the milk\n").unwrap();
        fs::write(root.join(".gitignore"), "notes.txt\n").unwrap();
        fs::write(root.join("logo.png"), [0x89, b'P', b'N', b'G', 0, 0, 0, 1]).unwrap();

        let options = BundleOptions::default();
        let result = scan(root, &options.scan).unwrap();
        let paths = result.relative_paths();
        assert_eq!(paths, vec![".gitignore".to_string(), "src/lib.rs".to_string()]);

        let bundle = render(&result, &options).unwrap();
        assert!(bundle.contains("pub fn answer()"));
        assert!(!bundle.contains("remember the milk"));
        assert!(estimate_tokens(&bundle) > 0);
    }
}
