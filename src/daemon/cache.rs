//! Project cache - recent scan results keyed by canonical root.
//!
//! Entries expire after a TTL and the cache holds a bounded number of
//! projects. When full, the entry created longest ago is evicted; reads do
//! not refresh an entry's age.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::scan::{ScanOptions, ScanResult};

/// One cached scan.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub result: Arc<ScanResult>,
    /// Options the scan ran with; a request with other options misses.
    pub options: ScanOptions,
    pub created_at: Instant,
    pub created_wall: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(result: Arc<ScanResult>, options: ScanOptions) -> Self {
        Self {
            result,
            options,
            created_at: Instant::now(),
            created_wall: Utc::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Per-entry line of `cache.stats`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntryStats {
    pub root: PathBuf,
    pub age_ms: u64,
    pub fresh: bool,
    pub files: usize,
    pub total_bytes: u64,
    pub scanned_at: DateTime<Utc>,
}

/// `cache.stats` result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    pub max_entries: usize,
    pub ttl_secs: u64,
    pub entries: Vec<CacheEntryStats>,
}

/// Bounded TTL map from project root to scan result.
#[derive(Debug)]
pub struct ProjectCache {
    entries: HashMap<PathBuf, CacheEntry>,
    ttl: Duration,
    max_entries: usize,
}

impl ProjectCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    fn is_fresh(&self, entry: &CacheEntry) -> bool {
        entry.age() < self.ttl
    }

    /// A fresh entry, or `None` if absent or expired.
    pub fn get(&self, root: &Path) -> Option<&CacheEntry> {
        self.entries.get(root).filter(|e| self.is_fresh(e))
    }

    /// An entry regardless of age.
    pub fn peek(&self, root: &Path) -> Option<&CacheEntry> {
        self.entries.get(root)
    }

    /// Insert or replace the entry for `root`, then evict if over capacity.
    pub fn put(&mut self, root: PathBuf, entry: CacheEntry) {
        self.entries.insert(root, entry);
        if self.entries.len() > self.max_entries {
            self.evict_oldest();
        }
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.created_at)
            .map(|(k, _)| k.clone());
        if let Some(root) = oldest {
            debug!(root = %root.display(), "evicting oldest cache entry");
            self.entries.remove(&root);
        }
    }

    pub fn remove(&mut self, root: &Path) -> bool {
        self.entries.remove(root).is_some()
    }

    /// Drop everything; returns how many entries were held.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cached roots, sorted.
    pub fn keys(&self) -> Vec<PathBuf> {
        let mut keys: Vec<PathBuf> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn stats(&self) -> CacheStats {
        let mut entries: Vec<CacheEntryStats> = self
            .entries
            .iter()
            .map(|(root, e)| CacheEntryStats {
                root: root.clone(),
                age_ms: e.age().as_millis() as u64,
                fresh: self.is_fresh(e),
                files: e.result.file_count(),
                total_bytes: e.result.total_bytes(),
                scanned_at: e.created_wall,
            })
            .collect();
        entries.sort_by(|a, b| a.root.cmp(&b.root));
        CacheStats {
            size: self.entries.len(),
            max_entries: self.max_entries,
            ttl_secs: self.ttl.as_secs(),
            entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(root: &str) -> CacheEntry {
        CacheEntry::new(
            Arc::new(ScanResult::new(PathBuf::from(root), Vec::new())),
            ScanOptions::default(),
        )
    }

    #[test]
    fn test_put_replaces_existing_key() {
        let mut cache = ProjectCache::new(Duration::from_secs(60), 10);
        cache.put(PathBuf::from("/a"), entry("/a"));
        cache.put(PathBuf::from("/a"), entry("/a"));
        assert_eq!(cache.len(), 1);
        assert!(cache.get(Path::new("/a")).is_some());
    }

    #[test]
    fn test_stale_entries_are_hidden_from_get() {
        let mut cache = ProjectCache::new(Duration::from_millis(0), 10);
        cache.put(PathBuf::from("/a"), entry("/a"));
        assert!(cache.get(Path::new("/a")).is_none());
        assert!(cache.peek(Path::new("/a")).is_some());
        let stats = cache.stats();
        assert_eq!(stats.size, 1);
        assert!(!stats.entries[0].fresh);
    }

    #[test]
    fn test_evicts_oldest_created_entry() {
        let mut cache = ProjectCache::new(Duration::from_secs(60), 2);
        cache.put(PathBuf::from("/a"), entry("/a"));
        std::thread::sleep(Duration::from_millis(2));
        cache.put(PathBuf::from("/b"), entry("/b"));
        std::thread::sleep(Duration::from_millis(2));

        // Reading /a does not make it younger.
        assert!(cache.get(Path::new("/a")).is_some());
        cache.put(PathBuf::from("/c"), entry("/c"));

        assert_eq!(cache.keys(), vec![PathBuf::from("/b"), PathBuf::from("/c")]);
    }

    #[test]
    fn test_remove_and_clear() {
        let mut cache = ProjectCache::new(Duration::from_secs(60), 10);
        cache.put(PathBuf::from("/a"), entry("/a"));
        cache.put(PathBuf::from("/b"), entry("/b"));
        assert!(cache.remove(Path::new("/a")));
        assert!(!cache.remove(Path::new("/a")));
        assert_eq!(cache.clear(), 1);
        assert!(cache.is_empty());
    }
}
