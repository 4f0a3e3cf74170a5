//! Bundle history - an append-only JSON-lines log of generated bundles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{PackError, Result};

/// One generated bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub root: PathBuf,
    pub format: String,
    pub files: usize,
    pub total_bytes: u64,
    pub tokens: u64,
    pub output_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_file: Option<PathBuf>,
}

/// Metrics of a bundle about to be recorded.
#[derive(Debug, Clone)]
pub struct BundleMetrics {
    pub root: PathBuf,
    pub format: String,
    pub files: usize,
    pub total_bytes: u64,
    pub tokens: u64,
    pub output_bytes: u64,
    pub out_file: Option<PathBuf>,
}

/// Aggregate numbers over the whole log.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStats {
    pub entries: usize,
    pub total_tokens: u64,
    pub total_output_bytes: u64,
    pub formats: BTreeMap<String, usize>,
    pub projects: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<DateTime<Utc>>,
}

/// File-backed history log.
pub struct HistoryStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an entry and return it.
    pub fn record(&self, metrics: BundleMetrics) -> Result<HistoryEntry> {
        let entry = HistoryEntry {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            root: metrics.root,
            format: metrics.format,
            files: metrics.files,
            total_bytes: metrics.total_bytes,
            tokens: metrics.tokens,
            output_bytes: metrics.output_bytes,
            out_file: metrics.out_file,
        };

        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| PackError::Task(format!("history lock poisoned: {}", e)))?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;

        debug!(id = %entry.id, "history entry recorded");
        Ok(entry)
    }

    /// All entries, oldest first. Malformed lines are skipped.
    pub fn load(&self) -> Result<Vec<HistoryEntry>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for (n, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<HistoryEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(line = n + 1, error = %e, "skipping malformed history line"),
            }
        }
        Ok(entries)
    }

    /// Newest first, optionally restricted to one project root.
    pub fn list(&self, limit: Option<usize>, project: Option<&Path>) -> Result<Vec<HistoryEntry>> {
        let mut entries = self.load()?;
        entries.reverse();
        let iter = entries
            .into_iter()
            .filter(|e| project.map_or(true, |p| e.root == p));
        Ok(match limit {
            Some(n) => iter.take(n).collect(),
            None => iter.collect(),
        })
    }

    pub fn get(&self, id: &str) -> Result<HistoryEntry> {
        self.load()?
            .into_iter()
            .find(|e| e.id == id)
            .ok_or_else(|| PackError::HistoryNotFound(id.to_string()))
    }

    pub fn stats(&self) -> Result<HistoryStats> {
        let entries = self.load()?;
        let mut stats = HistoryStats {
            entries: entries.len(),
            ..HistoryStats::default()
        };
        let mut projects = std::collections::HashSet::new();
        for entry in &entries {
            stats.total_tokens += entry.tokens;
            stats.total_output_bytes += entry.output_bytes;
            *stats.formats.entry(entry.format.clone()).or_insert(0) += 1;
            projects.insert(entry.root.clone());
            stats.first = Some(stats.first.map_or(entry.timestamp, |f| f.min(entry.timestamp)));
            stats.last = Some(stats.last.map_or(entry.timestamp, |l| l.max(entry.timestamp)));
        }
        stats.projects = projects.len();
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(root: &str, format: &str, tokens: u64) -> BundleMetrics {
        BundleMetrics {
            root: PathBuf::from(root),
            format: format.to_string(),
            files: 3,
            total_bytes: 300,
            tokens,
            output_bytes: tokens * 4,
            out_file: None,
        }
    }

    #[test]
    fn test_record_list_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("nested/history.jsonl"));

        let first = store.record(metrics("/a", "markdown", 10)).unwrap();
        let second = store.record(metrics("/b", "json", 20)).unwrap();

        let all = store.list(None, None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, second.id, "newest first");

        let only_a = store.list(None, Some(Path::new("/a"))).unwrap();
        assert_eq!(only_a, vec![first.clone()]);

        assert_eq!(store.list(Some(1), None).unwrap().len(), 1);
        assert_eq!(store.get(&first.id).unwrap(), first);
        assert!(matches!(store.get("missing"), Err(PackError::HistoryNotFound(_))));
    }

    #[test]
    fn test_stats_and_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("history.jsonl"));
        store.record(metrics("/a", "markdown", 10)).unwrap();
        store.record(metrics("/a", "markdown", 5)).unwrap();
        store.record(metrics("/b", "yaml", 1)).unwrap();

        let mut file = OpenOptions::new().append(true).open(store.path()).unwrap();
        writeln!(file, "{{not json").unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.entries, 3);
        assert_eq!(stats.total_tokens, 16);
        assert_eq!(stats.projects, 2);
        assert_eq!(stats.formats.get("markdown"), Some(&2));
        assert!(stats.first <= stats.last);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("none.jsonl"));
        assert!(store.list(None, None).unwrap().is_empty());
        assert_eq!(store.stats().unwrap().entries, 0);
    }
}
