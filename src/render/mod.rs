//! Render module - turns a scan into one document.
//!
//! Four formats: markdown (default), json, yaml and plain text. Each can carry
//! a directory tree and line-numbered file bodies.

pub mod tree;

use serde::{Deserialize, Serialize};
use std::fs;
use std::sync::Arc;
use tracing::warn;

use crate::config::BundleOptions;
use crate::error::Result;
use crate::scan::{FileRecord, ScanResult};

pub use tree::render_tree;

/// Output document format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    #[serde(alias = "md")]
    Markdown,
    Json,
    #[serde(alias = "yml")]
    Yaml,
    #[serde(alias = "text", alias = "txt")]
    Plain,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Markdown => "markdown",
            OutputFormat::Json => "json",
            OutputFormat::Yaml => "yaml",
            OutputFormat::Plain => "plain",
        }
    }

    /// Conventional file extension for an output file.
    pub fn file_extension(&self) -> &'static str {
        match self {
            OutputFormat::Markdown => "md",
            OutputFormat::Json => "json",
            OutputFormat::Yaml => "yaml",
            OutputFormat::Plain => "txt",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            "json" => Ok(OutputFormat::Json),
            "yaml" | "yml" => Ok(OutputFormat::Yaml),
            "plain" | "text" | "txt" => Ok(OutputFormat::Plain),
            other => Err(format!("unknown format: {}", other)),
        }
    }
}

/// Structured document used by the json and yaml formats.
#[derive(Debug, Serialize)]
struct BundleDoc<'a> {
    project: String,
    root: String,
    file_count: usize,
    total_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    tree: Option<String>,
    files: Vec<DocFile<'a>>,
}

#[derive(Debug, Serialize)]
struct DocFile<'a> {
    path: &'a str,
    size: u64,
    extension: &'a str,
    content: String,
}

/// Render a scan. Reads every file's content from disk.
pub fn render(scan: &ScanResult, options: &BundleOptions) -> Result<String> {
    let bodies = load_bodies(scan, options.line_numbers);
    let tree = options.tree.then(|| render_tree(&project_name(scan), scan));

    match options.format {
        OutputFormat::Markdown => Ok(render_markdown(scan, tree.as_deref(), &bodies)),
        OutputFormat::Plain => Ok(render_plain(scan, tree.as_deref(), &bodies)),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&to_doc(scan, tree, bodies))?),
        OutputFormat::Yaml => Ok(serde_yaml::to_string(&to_doc(scan, tree, bodies))?),
    }
}

/// Run `render` on the blocking pool.
pub async fn render_async(scan: Arc<ScanResult>, options: BundleOptions) -> Result<String> {
    tokio::task::spawn_blocking(move || render(&scan, &options)).await?
}

fn project_name(scan: &ScanResult) -> String {
    scan.root()
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| scan.root().display().to_string())
}

/// Read each file. A file that vanished or became unreadable since the scan
/// is skipped.
fn load_bodies(scan: &ScanResult, line_numbers: bool) -> Vec<(&FileRecord, String)> {
    scan.files()
        .iter()
        .filter_map(|file| match fs::read(&file.path) {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                let text = if line_numbers { number_lines(&text) } else { text };
                Some((file, text))
            }
            Err(e) => {
                warn!(file = %file.path.display(), error = %e, "skipping unreadable file");
                None
            }
        })
        .collect()
}

fn number_lines(text: &str) -> String {
    let width = text.lines().count().max(1).to_string().len();
    let mut out = String::with_capacity(text.len() + text.len() / 8);
    for (i, line) in text.lines().enumerate() {
        out.push_str(&format!("{:>width$} | {}\n", i + 1, line, width = width));
    }
    out
}

fn to_doc<'a>(
    scan: &'a ScanResult,
    tree: Option<String>,
    bodies: Vec<(&'a FileRecord, String)>,
) -> BundleDoc<'a> {
    BundleDoc {
        project: project_name(scan),
        root: scan.root().display().to_string(),
        file_count: scan.file_count(),
        total_bytes: scan.total_bytes(),
        tree,
        files: bodies
            .into_iter()
            .map(|(file, content)| DocFile {
                path: &file.relative_path,
                size: file.size,
                extension: &file.extension,
                content,
            })
            .collect(),
    }
}

fn render_markdown(scan: &ScanResult, tree: Option<&str>, bodies: &[(&FileRecord, String)]) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Project: {}\n\n", project_name(scan)));
    out.push_str(&format!(
        "Files: {} | Size: {} bytes\n\n",
        scan.file_count(),
        scan.total_bytes()
    ));

    if let Some(tree) = tree {
        out.push_str("## Directory structure\n\n```text\n");
        out.push_str(tree);
        out.push_str("```\n\n");
    }

    out.push_str("## Files\n");
    for (file, body) in bodies {
        let fence = fence_for(body);
        out.push_str(&format!("\n### `{}`\n\n", file.relative_path));
        out.push_str(&format!("{}{}\n", fence, language_hint(&file.extension)));
        out.push_str(body);
        if !body.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&fence);
        out.push('\n');
    }
    out
}

fn render_plain(scan: &ScanResult, tree: Option<&str>, bodies: &[(&FileRecord, String)]) -> String {
    let rule = "=".repeat(48);
    let mut out = String::new();
    out.push_str(&format!("Project: {}\n", project_name(scan)));
    out.push_str(&format!(
        "Files: {} ({} bytes)\n\n",
        scan.file_count(),
        scan.total_bytes()
    ));
    if let Some(tree) = tree {
        out.push_str(tree);
        out.push('\n');
    }
    for (file, body) in bodies {
        out.push_str(&format!("{}\nFile: {}\n{}\n", rule, file.relative_path, rule));
        out.push_str(body);
        if !body.ends_with('\n') {
            out.push('\n');
        }
        out.push('\n');
    }
    out
}

/// A backtick fence longer than any backtick run inside `body`.
fn fence_for(body: &str) -> String {
    let mut longest = 0;
    let mut run = 0;
    for c in body.chars() {
        if c == '`' {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    "`".repeat((longest + 1).max(3))
}

fn language_hint(extension: &str) -> &str {
    match extension {
        "rs" => "rust",
        "py" => "python",
        "js" | "mjs" | "cjs" => "javascript",
        "ts" => "typescript",
        "tsx" => "tsx",
        "jsx" => "jsx",
        "go" => "go",
        "java" => "java",
        "kt" => "kotlin",
        "rb" => "ruby",
        "c" | "h" => "c",
        "cc" | "cpp" | "hpp" | "cxx" => "cpp",
        "cs" => "csharp",
        "swift" => "swift",
        "sh" | "bash" => "bash",
        "yml" => "yaml",
        "md" => "markdown",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::{scan, ScanOptions};

    fn project() -> (tempfile::TempDir, ScanResult) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/lib.rs"), "pub fn one() -> u8 {\n    1\n}\n").unwrap();
        fs::write(root.join("README.md"), "Use ```code``` blocks.\n").unwrap();
        let result = scan(root, &ScanOptions::default()).unwrap();
        (dir, result)
    }

    #[test]
    fn test_markdown_has_tree_and_fenced_files() {
        let (_dir, result) = project();
        let out = render(&result, &BundleOptions::default()).unwrap();
        assert!(out.starts_with("# Project: "));
        assert!(out.contains("## Directory structure"));
        assert!(out.contains("### `src/lib.rs`"));
        assert!(out.contains("```rust\npub fn one()"));
        // README contains a triple backtick run, so its fence is longer.
        assert!(out.contains("````markdown\nUse ```code``` blocks."));
    }

    #[test]
    fn test_json_document_shape() {
        let (_dir, result) = project();
        let options = BundleOptions {
            format: OutputFormat::Json,
            tree: false,
            ..BundleOptions::default()
        };
        let out = render(&result, &options).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(doc["file_count"], 2);
        assert!(doc.get("tree").is_none());
        assert_eq!(doc["files"][1]["path"], "src/lib.rs");
        assert!(doc["files"][1]["content"].as_str().unwrap().contains("pub fn one"));
    }

    #[test]
    fn test_yaml_and_plain_line_numbers() {
        let (_dir, result) = project();
        let yaml = render(
            &result,
            &BundleOptions { format: OutputFormat::Yaml, ..BundleOptions::default() },
        )
        .unwrap();
        assert!(yaml.contains("file_count: 2"));

        let plain = render(
            &result,
            &BundleOptions {
                format: OutputFormat::Plain,
                line_numbers: true,
                ..BundleOptions::default()
            },
        )
        .unwrap();
        assert!(plain.contains("File: src/lib.rs"));
        assert!(plain.contains("1 | pub fn one() -> u8 {"));
        assert!(plain.contains("3 | }"));
    }

    #[test]
    fn test_vanished_file_is_skipped() {
        let (dir, result) = project();
        fs::remove_file(dir.path().join("README.md")).unwrap();
        let out = render(&result, &BundleOptions::default()).unwrap();
        assert!(!out.contains("### `README.md`"));
        assert!(out.contains("### `src/lib.rs`"));
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("md".parse::<OutputFormat>(), Ok(OutputFormat::Markdown));
        assert_eq!("YML".parse::<OutputFormat>(), Ok(OutputFormat::Yaml));
        assert_eq!("txt".parse::<OutputFormat>(), Ok(OutputFormat::Plain));
        assert!("html".parse::<OutputFormat>().is_err());
        let parsed: OutputFormat = serde_json::from_str("\"md\"").unwrap();
        assert_eq!(parsed, OutputFormat::Markdown);
    }
}
