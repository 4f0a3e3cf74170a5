//! Method registry - decodes requests and runs their handlers.
//!
//! Every failure is turned into a `Response.error` here; nothing a request
//! does reaches the connection loop as an error.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{resolve_options, BundleOptions, PartialOptions};
use crate::error::{PackError, Result};
use crate::history::BundleMetrics;
use crate::render::render_async;
use crate::scan::{canonical_root, scan_async, ScanOptions, ScanResult};
use crate::schema;
use crate::tokens::{estimate_tokens, estimate_tokens_from_bytes, provider_estimates};

use super::cache::CacheEntry;
use super::protocol::{
    codes, BundleParams, CacheClearParams, HistoryGetParams, HistoryListParams, MethodCall,
    Request, Response, RootParams, RpcError, ScanParams, UNKNOWN_ID,
};
use super::session::Session;

/// Delay between answering `daemon.shutdown` and stopping.
pub const SHUTDOWN_DELAY: Duration = Duration::from_millis(100);

/// Decode one framed line and dispatch it.
pub async fn handle_line(session: &Arc<Session>, line: &[u8]) -> Response {
    let value: Value = match serde_json::from_slice(line) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "unparseable line");
            return Response::error(UNKNOWN_ID, RpcError::parse_error(e));
        }
    };

    let id = value
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or(UNKNOWN_ID)
        .to_string();

    match serde_json::from_value::<Request>(value) {
        Ok(request) => dispatch(session, request).await,
        Err(e) => Response::error(
            id,
            RpcError::new(codes::INVALID_REQUEST, format!("invalid request: {}", e)),
        ),
    }
}

/// Run one well-formed request.
pub async fn dispatch(session: &Arc<Session>, request: Request) -> Response {
    session.count_request();
    let Request { id, method, params } = request;

    let call = match MethodCall::decode(&method, params) {
        Ok(call) => call,
        Err(e) => {
            debug!(id = %id, method = %method, code = e.code, "request rejected");
            return Response::error(id, e);
        }
    };
    debug!(id = %id, method = call.name(), "dispatching");

    match execute(session, call).await {
        Ok(result) => Response::ok(id, result),
        Err(err) => Response::error(id, to_rpc_error(&err, session.config.verbose)),
    }
}

fn to_rpc_error(err: &PackError, verbose: bool) -> RpcError {
    let code = err.code();
    let mut rpc = RpcError::new(code, err.to_string());
    if let Some(data) = err.data() {
        rpc = rpc.with_data(data);
    } else if code == codes::INTERNAL_ERROR {
        warn!(error = %err, "request failed");
        if verbose {
            rpc = rpc.with_data(json!({ "debug": format!("{:?}", err) }));
        }
    }
    rpc
}

async fn execute(session: &Arc<Session>, call: MethodCall) -> Result<Value> {
    match call {
        MethodCall::DaemonStatus => Ok(daemon_status(session)),
        MethodCall::DaemonPing => Ok(json!({
            "pong": true,
            "timestamp": Utc::now().timestamp_millis(),
        })),
        MethodCall::DaemonShutdown => Ok(daemon_shutdown(session)),
        MethodCall::ProjectScan(params) => project_scan(session, params).await,
        MethodCall::BundleGenerate(params) => bundle_generate(session, params).await,
        MethodCall::TokensEstimate(params) => tokens_estimate(session, params).await,
        MethodCall::HistoryList(params) => history_list(session, params).await,
        MethodCall::HistoryGet(HistoryGetParams { id }) => {
            let session = Arc::clone(session);
            let entry = blocking(move || session.history.get(&id)).await?;
            Ok(serde_json::to_value(entry)?)
        }
        MethodCall::HistoryStats => {
            let session = Arc::clone(session);
            let stats = blocking(move || session.history.stats()).await?;
            Ok(serde_json::to_value(stats)?)
        }
        MethodCall::SchemaCli => Ok(schema::cli_schema()),
        MethodCall::SchemaLlm => Ok(schema::llm_schema()),
        MethodCall::CacheClear(params) => cache_clear(session, params).await,
        MethodCall::CacheStats => Ok(serde_json::to_value(
            session.with_cache(|cache| cache.stats()),
        )?),
    }
}

// ─── daemon.* ──────────────────────────────────────────────────────

fn daemon_status(session: &Session) -> Value {
    let (cache_size, projects) = session.with_cache(|cache| (cache.len(), cache.keys()));
    json!({
        "pid": std::process::id(),
        "version": env!("CARGO_PKG_VERSION"),
        "startedAt": session.started_wall,
        "uptimeMs": session.started.elapsed().as_millis() as u64,
        "connections": session.connections(),
        "requests": session.requests(),
        "cacheSize": cache_size,
        "inflightScans": session.inflight_roots(),
        "projects": projects,
    })
}

fn daemon_shutdown(session: &Arc<Session>) -> Value {
    let session = Arc::clone(session);
    tokio::spawn(async move {
        tokio::time::sleep(SHUTDOWN_DELAY).await;
        session.request_shutdown();
    });
    json!({ "shuttingDown": true })
}

// ─── Scanning ──────────────────────────────────────────────────────

/// Run filesystem work on the blocking pool so the runtime thread keeps
/// serving other connections.
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await?
}

/// Canonicalize the root and layer its options. Reads `ctxpack.toml`.
async fn prepare(
    session: &Arc<Session>,
    root: PathBuf,
    preset: Option<String>,
    params: PartialOptions,
) -> Result<(PathBuf, BundleOptions)> {
    let session = Arc::clone(session);
    blocking(move || {
        let root = canonical_root(&root)?;
        let options = resolve_options(&root, preset.as_deref(), &params, &session.config.user)?;
        Ok((root, options))
    })
    .await
}

/// A scan result and where it came from.
struct Scanned {
    result: Arc<ScanResult>,
    cached: bool,
    scanned_at: DateTime<Utc>,
}

impl Scanned {
    fn from_entry(entry: CacheEntry, cached: bool) -> Self {
        Self {
            result: entry.result,
            cached,
            scanned_at: entry.created_wall,
        }
    }
}

/// Serve from the cache when a fresh entry matches `options`, else scan.
///
/// Misses for the same root are serialized: a caller that waited for another
/// scan of its root reuses that scan's result when the options agree.
async fn cached_or_scan(
    session: &Arc<Session>,
    root: &Path,
    options: &ScanOptions,
    force: bool,
) -> Result<Scanned> {
    if !force {
        if let Some(entry) = session.lookup(root, options) {
            debug!(root = %root.display(), "cache hit");
            return Ok(Scanned::from_entry(entry, true));
        }
    }

    let _slot = session.scan_slot(root).await;
    if !force {
        if let Some(entry) = session.lookup(root, options) {
            debug!(root = %root.display(), "filled by concurrent scan");
            return Ok(Scanned::from_entry(entry, true));
        }
    }

    let result = Arc::new(scan_async(root.to_path_buf(), options.clone()).await?);
    let entry = CacheEntry::new(Arc::clone(&result), options.clone());
    let scanned_at = entry.created_wall;
    session.with_cache(|cache| cache.put(root.to_path_buf(), entry));

    Ok(Scanned {
        result,
        cached: false,
        scanned_at,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScanSummary<'a> {
    root: &'a Path,
    cached: bool,
    files: usize,
    total_bytes: u64,
    extensions: &'a BTreeMap<String, usize>,
    scanned_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_paths: Option<Vec<String>>,
}

async fn project_scan(session: &Arc<Session>, params: ScanParams) -> Result<Value> {
    let ScanParams {
        root,
        force,
        preset,
        include_files,
        options,
    } = params;
    let (root, options) = prepare(session, root, preset, options).await?;

    let scanned = cached_or_scan(session, &root, &options.scan, force).await?;
    let result = &scanned.result;
    let summary = ScanSummary {
        root: result.root(),
        cached: scanned.cached,
        files: result.file_count(),
        total_bytes: result.total_bytes(),
        extensions: result.extensions(),
        scanned_at: scanned.scanned_at,
        file_paths: include_files.then(|| result.relative_paths()),
    };
    Ok(serde_json::to_value(summary)?)
}

// ─── bundle.generate ───────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BundleSummary<'a> {
    root: &'a Path,
    cached: bool,
    format: &'static str,
    files: usize,
    total_bytes: u64,
    output_bytes: u64,
    tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    out_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    history_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

async fn bundle_generate(session: &Arc<Session>, params: BundleParams) -> Result<Value> {
    let BundleParams {
        root,
        force,
        preset,
        out_file,
        include_content,
        options,
    } = params;
    let (root, options) = prepare(session, root, preset, options).await?;

    let scanned = cached_or_scan(session, &root, &options.scan, force).await?;
    let content = render_async(Arc::clone(&scanned.result), options.clone()).await?;
    let tokens = estimate_tokens(&content);
    let output_bytes = content.len() as u64;

    let out_file = match out_file {
        Some(path) => {
            let path = if path.is_absolute() { path } else { root.join(path) };
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, content.as_bytes()).await?;
            info!(path = %path.display(), bytes = output_bytes, "bundle written");
            Some(path)
        }
        None => None,
    };

    let result = &scanned.result;
    let metrics = BundleMetrics {
        root: root.clone(),
        format: options.format.as_str().to_string(),
        files: result.file_count(),
        total_bytes: result.total_bytes(),
        tokens,
        output_bytes,
        out_file: out_file.clone(),
    };
    let recorder = Arc::clone(session);
    let history_id = match blocking(move || recorder.history.record(metrics)).await {
        Ok(entry) => Some(entry.id),
        Err(e) => {
            warn!(error = %e, "failed to record bundle history");
            None
        }
    };

    let summary = BundleSummary {
        root: result.root(),
        cached: scanned.cached,
        format: options.format.as_str(),
        files: result.file_count(),
        total_bytes: result.total_bytes(),
        output_bytes,
        tokens,
        out_file,
        history_id,
        content: include_content.then_some(content),
    };
    Ok(serde_json::to_value(summary)?)
}

// ─── Cache-only methods ────────────────────────────────────────────

/// Cache key for a path that may no longer exist. Canonical when possible,
/// otherwise absolutized without touching the filesystem further.
fn lookup_key(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

async fn lookup_key_async(path: PathBuf) -> Result<PathBuf> {
    blocking(move || Ok(lookup_key(&path))).await
}

async fn tokens_estimate(session: &Session, params: RootParams) -> Result<Value> {
    let root = lookup_key_async(params.root).await?;
    let entry = session.with_cache(|cache| {
        let fresh = cache.get(&root).cloned();
        if fresh.is_none() {
            debug!(
                root = %root.display(),
                expired = cache.peek(&root).is_some(),
                "no fresh scan for estimate"
            );
        }
        fresh
    });
    let entry = entry.ok_or_else(|| PackError::NoCachedScan(root.clone()))?;

    let total_bytes = entry.result.total_bytes();
    let tokens = estimate_tokens_from_bytes(total_bytes);
    Ok(json!({
        "root": root,
        "tokens": tokens,
        "files": entry.result.file_count(),
        "totalBytes": total_bytes,
        "ageMs": entry.age().as_millis() as u64,
        "providers": provider_estimates(tokens),
    }))
}

async fn cache_clear(session: &Session, params: CacheClearParams) -> Result<Value> {
    let cleared = match params.project {
        Some(project) => {
            let root = lookup_key_async(project).await?;
            let removed = session.with_cache(|cache| cache.remove(&root));
            info!(root = %root.display(), removed, "cache entry cleared");
            json!({ "cleared": root, "removed": removed })
        }
        None => {
            let count = session.with_cache(|cache| cache.clear());
            info!(count, "cache cleared");
            json!({ "cleared": "all", "count": count })
        }
    };
    Ok(cleared)
}

async fn history_list(session: &Arc<Session>, params: HistoryListParams) -> Result<Value> {
    let session = Arc::clone(session);
    let entries = blocking(move || {
        let project = params.project.as_deref().map(lookup_key);
        session.history.list(params.limit, project.as_deref())
    })
    .await?;
    Ok(json!({
        "total": entries.len(),
        "entries": entries,
    }))
}
