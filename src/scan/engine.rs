//! Scan engine - walks a project root and produces a `ScanResult`.
//!
//! Walks the tree with the `ignore` crate (standard filters off, our own rule
//! set on), then stats and sniffs every candidate in parallel and sorts the
//! survivors deterministically.

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::overrides::{Override, OverrideBuilder};
use ignore::WalkBuilder;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::binary::is_binary_file;
use super::types::{extension_of, normalize_extension, FileRecord, ScanOptions, ScanResult, SortMode};
use crate::error::{PackError, Result};

/// Built-in deny-list, gitignore syntax. Applied before the project's own
/// `.gitignore`, so a project can re-include something with `!pattern`.
pub const BUILTIN_IGNORES: &[&str] = &[
    // Version control
    ".git/",
    ".svn/",
    ".hg/",
    // Dependencies
    "node_modules/",
    "bower_components/",
    ".venv/",
    "venv/",
    ".tox/",
    // Build output and caches
    "target/",
    "dist/",
    "build/",
    "out/",
    ".next/",
    ".nuxt/",
    ".cache/",
    "coverage/",
    ".gradle/",
    "__pycache__/",
    ".mypy_cache/",
    ".pytest_cache/",
    "*.pyc",
    "*.pyo",
    "*.class",
    "*.o",
    "*.so",
    "*.dylib",
    "*.dll",
    "*.exe",
    "*.min.js",
    "*.min.css",
    "*.map",
    // Lock files
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "Cargo.lock",
    "poetry.lock",
    "Gemfile.lock",
    "composer.lock",
    // Logs
    "*.log",
    "logs/",
    // OS and editor metadata
    ".DS_Store",
    "Thumbs.db",
    "desktop.ini",
    ".idea/",
    ".vscode/",
    "*.swp",
    "*.swo",
    "*~",
];

/// Directories never descended into, checked by name before any rule matching.
const HEAVY_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "dist",
    "build",
    ".venv",
    "venv",
    "__pycache__",
    ".next",
    ".cache",
];

/// Validate and canonicalize a project root.
pub fn canonical_root(root: &Path) -> Result<PathBuf> {
    let meta = match fs::metadata(root) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PackError::RootNotFound(root.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };
    if !meta.is_dir() {
        return Err(PackError::NotADirectory(root.to_path_buf()));
    }
    Ok(root.canonicalize()?)
}

/// Scan a directory.
///
/// Unreadable entries are skipped; only an invalid root is an error.
pub fn scan(root: &Path, options: &ScanOptions) -> Result<ScanResult> {
    let started = Instant::now();
    let root = canonical_root(root)?;

    let ignores = Arc::new(build_ignore_rules(&root));
    let overrides = build_overrides(&root, options)?;

    // Phase 1: enumerate candidates
    let candidates = enumerate(&root, overrides, Arc::clone(&ignores));

    // Phase 2: stat, filter and sniff in parallel
    let wanted: Vec<String> = options
        .extensions
        .iter()
        .map(|e| normalize_extension(e))
        .filter(|e| !e.is_empty())
        .collect();

    let mut files: Vec<FileRecord> = candidates
        .par_iter()
        .filter_map(|path| inspect(&root, path, options.max_file_size, &wanted))
        .collect();

    // Phase 3: order
    sort_files(&mut files, options.sort);

    let result = ScanResult::new(root, files);
    info!(
        root = %result.root().display(),
        candidates = candidates.len(),
        files = result.file_count(),
        bytes = result.total_bytes(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "scan complete"
    );
    Ok(result)
}

/// Run `scan` on the blocking pool.
pub async fn scan_async(root: PathBuf, options: ScanOptions) -> Result<ScanResult> {
    tokio::task::spawn_blocking(move || scan(&root, &options)).await?
}

/// Merge the built-in deny-list with the root `.gitignore`.
fn build_ignore_rules(root: &Path) -> Gitignore {
    let mut builder = GitignoreBuilder::new(root);
    for line in BUILTIN_IGNORES {
        if let Err(e) = builder.add_line(None, line) {
            warn!(pattern = line, error = %e, "bad built-in ignore pattern");
        }
    }

    let gitignore = root.join(".gitignore");
    if gitignore.is_file() {
        // Partial errors still leave the valid lines in place.
        if let Some(e) = builder.add(&gitignore) {
            warn!(file = %gitignore.display(), error = %e, "problem reading .gitignore");
        }
    }

    match builder.build() {
        Ok(gi) => gi,
        Err(e) => {
            warn!(error = %e, "failed to build ignore rules, using none");
            Gitignore::empty()
        }
    }
}

/// Include globs become whitelist overrides, excludes become negations.
fn build_overrides(root: &Path, options: &ScanOptions) -> Result<Override> {
    let mut builder = OverrideBuilder::new(root);
    for pattern in &options.include {
        builder
            .add(pattern)
            .map_err(|e| invalid_pattern(pattern, e))?;
    }
    for pattern in &options.exclude {
        let negated = format!("!{}", pattern.trim_start_matches('!'));
        builder
            .add(&negated)
            .map_err(|e| invalid_pattern(pattern, e))?;
    }
    builder.build().map_err(|e| PackError::InvalidPattern {
        pattern: String::new(),
        reason: e.to_string(),
    })
}

fn invalid_pattern(pattern: &str, e: ignore::Error) -> PackError {
    PackError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    }
}

fn enumerate(root: &Path, overrides: Override, ignores: Arc<Gitignore>) -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .hidden(false)
        .follow_links(false)
        .overrides(overrides)
        .filter_entry(move |entry| {
            if entry.depth() == 0 {
                return true;
            }
            let is_dir = entry.file_type().map_or(false, |ft| ft.is_dir());
            if is_dir {
                let name = entry.file_name().to_string_lossy();
                if HEAVY_DIRS.contains(&name.as_ref()) {
                    return false;
                }
            }
            !ignores.matched(entry.path(), is_dir).is_ignore()
        })
        .build();

    for entry in walker {
        match entry {
            Ok(entry) => {
                if entry.file_type().map_or(false, |ft| ft.is_file()) {
                    candidates.push(entry.into_path());
                }
            }
            Err(e) => {
                debug!(error = %e, "skipping unreadable entry");
            }
        }
    }

    candidates
}

/// Stat and classify one candidate. `None` means it is dropped.
fn inspect(root: &Path, path: &Path, max_size: u64, wanted: &[String]) -> Option<FileRecord> {
    let meta = fs::metadata(path).ok()?;
    let size = meta.len();
    if size > max_size {
        return None;
    }

    let extension = extension_of(path);
    if !wanted.is_empty() && !wanted.contains(&extension) {
        return None;
    }

    if is_binary_file(path) {
        return None;
    }

    let relative = path.strip_prefix(root).ok()?;
    let relative_path = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");

    Some(FileRecord {
        path: path.to_path_buf(),
        relative_path,
        size,
        extension,
        binary: false,
    })
}

/// Order files in place.
pub fn sort_files(files: &mut [FileRecord], mode: SortMode) {
    match mode {
        SortMode::Path => files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path)),
        SortMode::Size => files.sort_by(|a, b| match b.size.cmp(&a.size) {
            Ordering::Equal => a.relative_path.cmp(&b.relative_path),
            other => other,
        }),
        SortMode::Extension => files.sort_by(|a, b| {
            a.extension
                .cmp(&b.extension)
                .then_with(|| a.relative_path.cmp(&b.relative_path))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn rel_paths(result: &ScanResult) -> Vec<&str> {
        result.files().iter().map(|f| f.relative_path.as_str()).collect()
    }

    #[test]
    fn test_builtin_and_gitignore_rules() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "src/main.rs", b"fn main() {}\n");
        write(root, "node_modules/pkg/index.js", b"module.exports = 1;\n");
        write(root, "target/debug/out.txt", b"artifact\n");
        write(root, "Cargo.lock", b"# lock\n");
        write(root, "app.log", b"log line\n");
        write(root, "secret/key.txt", b"hidden\n");
        write(root, ".gitignore", b"secret/\n");

        let result = scan(root, &ScanOptions::default()).unwrap();
        assert_eq!(rel_paths(&result), vec![".gitignore", "src/main.rs"]);
    }

    #[test]
    fn test_gitignore_can_reinclude_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "Cargo.lock", b"# lock\n");
        write(root, ".gitignore", b"!Cargo.lock\n");

        let result = scan(root, &ScanOptions::default()).unwrap();
        assert!(rel_paths(&result).contains(&"Cargo.lock"));
    }

    #[test]
    fn test_size_extension_and_binary_filters() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "a.rs", b"0123456789");
        write(root, "big.rs", &vec![b'x'; 200]);
        write(root, "notes.md", b"# notes\n");
        write(root, "blob.rs", b"\0\0\0\0");

        let options = ScanOptions {
            extensions: vec![".RS".to_string()],
            max_file_size: 100,
            ..ScanOptions::default()
        };
        let result = scan(root, &options).unwrap();
        assert_eq!(rel_paths(&result), vec!["a.rs"]);
        assert_eq!(result.total_bytes(), 10);
        assert_eq!(result.extensions().get("rs"), Some(&1));
    }

    #[test]
    fn test_include_and_exclude_globs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "src/lib.rs", b"pub fn a() {}\n");
        write(root, "src/gen/out.rs", b"// generated\n");
        write(root, "docs/guide.md", b"guide\n");

        let options = ScanOptions {
            include: vec!["src/**".to_string()],
            exclude: vec!["src/gen/**".to_string()],
            ..ScanOptions::default()
        };
        let result = scan(root, &options).unwrap();
        assert_eq!(rel_paths(&result), vec!["src/lib.rs"]);
    }

    #[test]
    fn test_sort_modes() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "b.txt", b"12345");
        write(root, "a.rs", b"1");
        write(root, "c.md", b"123");

        let by_size = scan(root, &ScanOptions { sort: SortMode::Size, ..Default::default() }).unwrap();
        assert_eq!(rel_paths(&by_size), vec!["b.txt", "c.md", "a.rs"]);

        let by_ext =
            scan(root, &ScanOptions { sort: SortMode::Extension, ..Default::default() }).unwrap();
        assert_eq!(rel_paths(&by_ext), vec!["c.md", "a.rs", "b.txt"]);

        let by_path = scan(root, &ScanOptions::default()).unwrap();
        assert_eq!(rel_paths(&by_path), vec!["a.rs", "b.txt", "c.md"]);
    }

    #[test]
    fn test_invalid_roots() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            scan(&missing, &ScanOptions::default()),
            Err(PackError::RootNotFound(_))
        ));

        let file = dir.path().join("file.txt");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(
            scan(&file, &ScanOptions::default()),
            Err(PackError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_bad_glob_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let options = ScanOptions {
            include: vec!["src/[".to_string()],
            ..ScanOptions::default()
        };
        assert!(matches!(
            scan(dir.path(), &options),
            Err(PackError::InvalidPattern { .. })
        ));
    }
}
