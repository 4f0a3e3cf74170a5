//! Daemon session - the state every handler works against.
//!
//! One `Session` exists per running daemon and is shared as `Arc<Session>`
//! between the accept loop, every connection task and every handler.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::{watch, OwnedMutexGuard};
use tracing::{debug, info};

use crate::config::DaemonConfig;
use crate::history::HistoryStore;
use crate::scan::ScanOptions;

use super::cache::{CacheEntry, ProjectCache};

type Gate = Arc<tokio::sync::Mutex<()>>;

pub struct Session {
    pub started: Instant,
    pub started_wall: DateTime<Utc>,
    connections: AtomicUsize,
    requests: AtomicU64,
    cache: Mutex<ProjectCache>,
    /// Per-root gates that serialize scans of the same project.
    inflight: Mutex<HashMap<PathBuf, Gate>>,
    pub history: HistoryStore,
    pub config: DaemonConfig,
    shutdown: watch::Sender<bool>,
}

/// Lock a std mutex, recovering the data if a holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Session {
    pub fn new(config: DaemonConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            started: Instant::now(),
            started_wall: Utc::now(),
            connections: AtomicUsize::new(0),
            requests: AtomicU64::new(0),
            cache: Mutex::new(ProjectCache::new(config.cache_ttl, config.cache_max_entries)),
            inflight: Mutex::new(HashMap::new()),
            history: HistoryStore::new(config.history_file.clone()),
            config,
            shutdown,
        }
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub(crate) fn count_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Track one open connection until the guard drops.
    pub fn connection_guard(self: &Arc<Self>) -> ConnectionGuard {
        let open = self.connections.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(open, "connection opened");
        ConnectionGuard {
            session: Arc::clone(self),
        }
    }

    /// Run `f` with the cache locked. Never call across an await.
    pub fn with_cache<R>(&self, f: impl FnOnce(&mut ProjectCache) -> R) -> R {
        f(&mut lock(&self.cache))
    }

    /// A fresh cache entry for `root` scanned with exactly `options`.
    pub fn lookup(&self, root: &Path, options: &ScanOptions) -> Option<CacheEntry> {
        self.with_cache(|cache| {
            cache
                .get(root)
                .filter(|entry| entry.options == *options)
                .cloned()
        })
    }

    /// Wait for exclusive right to scan `root`.
    ///
    /// Callers that find the cache cold take a slot, then look the cache up
    /// again: whoever held the slot before may have filled it.
    pub async fn scan_slot(self: &Arc<Self>, root: &Path) -> ScanSlot {
        let gate = {
            let mut table = lock(&self.inflight);
            Arc::clone(table.entry(root.to_path_buf()).or_default())
        };
        let guard = gate.lock_owned().await;
        ScanSlot {
            session: Arc::clone(self),
            root: root.to_path_buf(),
            guard: Some(guard),
        }
    }

    /// Roots with a scan in progress or queued.
    pub fn inflight_roots(&self) -> usize {
        lock(&self.inflight).len()
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn request_shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            info!("shutdown requested");
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// Decrements the connection count on drop, whichever way the connection ends.
pub struct ConnectionGuard {
    session: Arc<Session>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let open = self.session.connections.fetch_sub(1, Ordering::Relaxed) - 1;
        debug!(open, "connection closed");
    }
}

/// Exclusive right to scan one root. Releasing it wakes the next waiter and
/// forgets the gate once nobody else wants it.
pub struct ScanSlot {
    session: Arc<Session>,
    root: PathBuf,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ScanSlot {
    fn drop(&mut self) {
        self.guard.take();
        let mut table = lock(&self.session.inflight);
        let unused = table
            .get(&self.root)
            .map_or(false, |gate| Arc::strong_count(gate) == 1);
        if unused {
            table.remove(&self.root);
        }
    }
}
