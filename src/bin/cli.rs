//! ctxpack CLI - pack a project into one LLM-ready document.
//!
//! Usage:
//!   ctxpack bundle [-o FILE]          # Generate a bundle (stdout by default)
//!   ctxpack scan [--files]            # Scan and summarise
//!   ctxpack tokens                    # Token estimate per model
//!   ctxpack daemon start|stop|status|ping
//!   ctxpack cache stats|clear
//!   ctxpack history list|show|stats
//!   ctxpack schema [--llm]
//!
//! Commands go through the daemon when one answers on the socket and run
//! in-process otherwise.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ctxpack::daemon::{
    codes, is_daemon_running, new_request_id, pid_is_alive, read_pid, send_request_with_timeout,
    start_daemon, ClientError, Request,
};
use ctxpack::history::HistoryStore;
use ctxpack::scan::canonical_root;
use ctxpack::{
    estimate_tokens, provider_estimates, render, resolve_options, scan, schema, ConfigFile,
    DaemonConfig, OutputFormat, PartialOptions, SortMode,
};

#[derive(Parser)]
#[command(name = "ctxpack", version)]
#[command(about = "ctxpack - pack a project's source files into one LLM-ready document", long_about = None)]
struct Cli {
    /// Project root directory (default: current directory)
    #[arg(short, long, default_value = ".", global = true)]
    root: PathBuf,

    /// Daemon socket path (default: <cache dir>/ctxpack/daemon.sock)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// Work in-process even if a daemon is running
    #[arg(long, global = true)]
    no_daemon: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a bundle of the project
    Bundle {
        #[command(flatten)]
        filters: Filters,

        /// Output format: markdown, json, yaml, plain
        #[arg(short, long)]
        format: Option<OutputFormat>,

        /// Leave out the directory tree
        #[arg(long)]
        no_tree: bool,

        /// Prefix every line with its number
        #[arg(long)]
        line_numbers: bool,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Scan the project and print a summary
    Scan {
        #[command(flatten)]
        filters: Filters,

        /// List every file
        #[arg(long)]
        files: bool,
    },

    /// Token estimate and per-model fit for a scanned project
    Tokens,

    /// Manage the background daemon
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },

    /// Inspect or clear the daemon cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Bundle history
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Describe the CLI (or, with --llm, the daemon's method table)
    Schema {
        #[arg(long)]
        llm: bool,
    },
}

#[derive(Args, Clone, Default)]
struct Filters {
    /// Only files matching this glob (repeatable)
    #[arg(long)]
    include: Vec<String>,

    /// Leave out files matching this glob (repeatable)
    #[arg(long)]
    exclude: Vec<String>,

    /// Only these extensions (repeatable, without the dot)
    #[arg(long = "ext")]
    extensions: Vec<String>,

    /// Skip files larger than this many bytes
    #[arg(long)]
    max_file_size: Option<u64>,

    /// Order: path, size, extension
    #[arg(long)]
    sort: Option<SortMode>,

    /// Named option preset
    #[arg(long)]
    preset: Option<String>,

    /// Rescan even if the daemon has a fresh scan
    #[arg(long)]
    force: bool,
}

impl Filters {
    fn partial(&self) -> PartialOptions {
        let non_empty = |v: &Vec<String>| (!v.is_empty()).then(|| v.clone());
        PartialOptions {
            include: non_empty(&self.include),
            exclude: non_empty(&self.exclude),
            extensions: non_empty(&self.extensions),
            max_file_size: self.max_file_size,
            sort: self.sort,
            ..PartialOptions::default()
        }
    }
}

#[derive(Subcommand)]
enum DaemonAction {
    /// Start the daemon
    Start {
        /// Stay attached to the terminal
        #[arg(long)]
        foreground: bool,
    },
    /// Ask a running daemon to stop
    Stop,
    /// Report whether the daemon is running (reads the pid file)
    Status,
    /// Round-trip a ping
    Ping,
}

#[derive(Subcommand)]
enum CacheAction {
    Stats,
    /// Drop one project's scan, or everything
    Clear { project: Option<PathBuf> },
}

#[derive(Subcommand)]
enum HistoryAction {
    List {
        #[arg(short, long)]
        limit: Option<usize>,
        /// Only bundles of the --root project
        #[arg(long)]
        this_project: bool,
    },
    Show { id: String },
    Stats,
}

fn init_tracing() {
    let filter = std::env::var("CTXPACK_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "ctxpack=info".into());
    tracing_subscriber::registry()
        .with(EnvFilter::new(filter))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    if let Err(e) = run(cli) {
        match e.downcast_ref::<ClientError>() {
            Some(ClientError::Server { code, .. }) if *code == codes::NO_CACHED_SCAN => {
                eprintln!("Error: {}", e);
                eprintln!("hint: run `ctxpack scan` first");
            }
            Some(ClientError::Server { .. }) => eprintln!("Error: daemon returned error: {}", e),
            Some(ClientError::ConnectionFailed(_)) => eprintln!("Error: daemon not running ({})", e),
            _ => eprintln!("Error: {:#}", e),
        }
        std::process::exit(1);
    }
}

/// Connection details for the daemon.
struct Daemon {
    config: DaemonConfig,
    runtime: tokio::runtime::Runtime,
}

impl Daemon {
    fn new(config: DaemonConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to build runtime")?;
        Ok(Self { config, runtime })
    }

    fn running(&self) -> bool {
        self.runtime.block_on(is_daemon_running(&self.config.socket_path))
    }

    /// Call a method; a daemon-side error becomes `ClientError::Server`.
    fn call(&self, method: &str, params: Value) -> Result<Value> {
        let params = if params.is_null() { None } else { Some(params) };
        let request = Request::new(new_request_id(), method, params);
        let response = self.runtime.block_on(send_request_with_timeout(
            &self.config.socket_path,
            &request,
            self.config.client_timeout,
        ))?;
        Ok(response.into_result()?)
    }

    /// Like `call`, with no timeout worth worrying about for slow scans.
    fn call_slow(&self, method: &str, params: Value) -> Result<Value> {
        let request = Request::new(new_request_id(), method, Some(params));
        let response = self.runtime.block_on(send_request_with_timeout(
            &self.config.socket_path,
            &request,
            self.config.client_timeout.max(Duration::from_secs(300)),
        ))?;
        Ok(response.into_result()?)
    }
}

fn run(cli: Cli) -> Result<()> {
    let user = ConfigFile::load_user()?;
    let mut config = DaemonConfig::from_config(user);
    if let Some(socket) = &cli.socket {
        config.pid_file = socket.with_extension("pid");
        config.socket_path = socket.clone();
    }

    match cli.command {
        Commands::Daemon { action } => return daemon_command(action, config),
        Commands::Schema { llm } => {
            let out = if llm { schema::llm_schema() } else { schema::cli_schema() };
            println!("{}", serde_json::to_string_pretty(&out)?);
            return Ok(());
        }
        _ => {}
    }

    let daemon = Daemon::new(config)?;
    let use_daemon = !cli.no_daemon && daemon.running();
    let root = &cli.root;

    match cli.command {
        Commands::Bundle {
            filters,
            format,
            no_tree,
            line_numbers,
            out,
        } => {
            let mut partial = filters.partial();
            partial.format = format;
            partial.tree = no_tree.then_some(false);
            partial.line_numbers = line_numbers.then_some(true);
            if use_daemon {
                bundle_via_daemon(&daemon, root, &filters, partial, out)
            } else {
                bundle_local(&daemon.config, root, &filters, partial, out)
            }
        }

        Commands::Scan { filters, files } => {
            let summary = if use_daemon {
                let mut params = params_with(root, &filters, filters.partial())?;
                params["includeFiles"] = json!(files);
                daemon.call_slow("project.scan", params)?
            } else {
                let root = canonical_root(root)?;
                let options = resolve_options(
                    &root,
                    filters.preset.as_deref(),
                    &filters.partial(),
                    &daemon.config.user,
                )?;
                let result = scan(&root, &options.scan)?;
                let mut summary = json!({
                    "root": result.root(),
                    "cached": false,
                    "files": result.file_count(),
                    "totalBytes": result.total_bytes(),
                    "extensions": result.extensions(),
                });
                if files {
                    summary["filePaths"] = json!(result.relative_paths());
                }
                summary
            };
            print_scan_summary(&summary);
            Ok(())
        }

        Commands::Tokens => {
            let estimate = if use_daemon {
                daemon.call("tokens.estimate", json!({ "root": absolute(root)? }))?
            } else {
                let root = canonical_root(root)?;
                let options = resolve_options(&root, None, &PartialOptions::default(), &daemon.config.user)?;
                let result = scan(&root, &options.scan)?;
                let bundle = render(&result, &options)?;
                let tokens = estimate_tokens(&bundle);
                json!({
                    "root": result.root(),
                    "tokens": tokens,
                    "files": result.file_count(),
                    "totalBytes": result.total_bytes(),
                    "providers": provider_estimates(tokens),
                })
            };
            print_tokens(&estimate);
            Ok(())
        }

        Commands::Cache { action } => {
            if !use_daemon {
                bail!("daemon not running; the cache only lives inside the daemon");
            }
            let out = match action {
                CacheAction::Stats => daemon.call("cache.stats", Value::Null)?,
                CacheAction::Clear { project } => {
                    let params = match project {
                        Some(p) => json!({ "project": absolute(&p)? }),
                        None => Value::Null,
                    };
                    daemon.call("cache.clear", params)?
                }
            };
            println!("{}", serde_json::to_string_pretty(&out)?);
            Ok(())
        }

        Commands::History { action } => {
            let out = if use_daemon {
                match action {
                    HistoryAction::List { limit, this_project } => {
                        let project = if this_project { Some(absolute(root)?) } else { None };
                        daemon.call("history.list", json!({ "limit": limit, "project": project }))?
                    }
                    HistoryAction::Show { id } => daemon.call("history.get", json!({ "id": id }))?,
                    HistoryAction::Stats => daemon.call("history.stats", Value::Null)?,
                }
            } else {
                let store = HistoryStore::new(daemon.config.history_file.clone());
                match action {
                    HistoryAction::List { limit, this_project } => {
                        let project = if this_project { Some(canonical_root(root)?) } else { None };
                        let entries = store.list(limit, project.as_deref())?;
                        json!({ "total": entries.len(), "entries": entries })
                    }
                    HistoryAction::Show { id } => serde_json::to_value(store.get(&id)?)?,
                    HistoryAction::Stats => serde_json::to_value(store.stats()?)?,
                }
            };
            println!("{}", serde_json::to_string_pretty(&out)?);
            Ok(())
        }

        Commands::Daemon { .. } | Commands::Schema { .. } => Ok(()),
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    Ok(path.canonicalize().or_else(|_| {
        std::env::current_dir().map(|cwd| cwd.join(path))
    })?)
}

/// Request params for a scanning method.
fn params_with(root: &Path, filters: &Filters, partial: PartialOptions) -> Result<Value> {
    let mut params = serde_json::to_value(&partial)?;
    if let Value::Object(map) = &mut params {
        map.retain(|_, v| !v.is_null());
    }
    params["root"] = json!(absolute(root)?);
    params["force"] = json!(filters.force);
    if let Some(preset) = &filters.preset {
        params["preset"] = json!(preset);
    }
    Ok(params)
}

fn bundle_via_daemon(
    daemon: &Daemon,
    root: &Path,
    filters: &Filters,
    partial: PartialOptions,
    out: Option<PathBuf>,
) -> Result<()> {
    let mut params = params_with(root, filters, partial)?;
    match &out {
        Some(path) => params["outFile"] = json!(absolute_out(path)?),
        None => params["includeContent"] = json!(true),
    }
    let result = daemon.call_slow("bundle.generate", params)?;
    match result.get("content").and_then(Value::as_str) {
        Some(content) => print!("{}", content),
        None => eprintln!(
            "wrote {} ({} files, ~{} tokens{})",
            result["outFile"].as_str().unwrap_or("?"),
            result["files"],
            result["tokens"],
            if result["cached"] == true { ", cached scan" } else { "" }
        ),
    }
    Ok(())
}

/// Output paths are relative to where the CLI runs, not to the project.
fn absolute_out(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(path))
}

fn bundle_local(
    config: &DaemonConfig,
    root: &Path,
    filters: &Filters,
    partial: PartialOptions,
    out: Option<PathBuf>,
) -> Result<()> {
    let root = canonical_root(root)?;
    let options = resolve_options(&root, filters.preset.as_deref(), &partial, &config.user)?;
    let result = scan(&root, &options.scan)?;
    let content = render(&result, &options)?;
    let tokens = estimate_tokens(&content);

    match out {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, &content)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!(
                "wrote {} ({} files, ~{} tokens)",
                path.display(),
                result.file_count(),
                tokens
            );
            let store = HistoryStore::new(config.history_file.clone());
            if let Err(e) = store.record(ctxpack::history::BundleMetrics {
                root: root.clone(),
                format: options.format.as_str().to_string(),
                files: result.file_count(),
                total_bytes: result.total_bytes(),
                tokens,
                output_bytes: content.len() as u64,
                out_file: Some(absolute_out(&path)?),
            }) {
                tracing::warn!(error = %e, "failed to record bundle history");
            }
        }
        None => print!("{}", content),
    }
    Ok(())
}

fn print_scan_summary(summary: &Value) {
    println!("ctxpack - Scan");
    println!("══════════════");
    println!("Root:   {}", summary["root"].as_str().unwrap_or("?"));
    println!("Files:  {}", summary["files"]);
    println!("Bytes:  {}", summary["totalBytes"]);
    if summary["cached"] == true {
        println!("Cached: yes");
    }
    if let Some(exts) = summary["extensions"].as_object() {
        let mut exts: Vec<_> = exts.iter().collect();
        exts.sort_by(|a, b| b.1.as_u64().cmp(&a.1.as_u64()).then(a.0.cmp(b.0)));
        println!();
        println!("Extensions:");
        for (ext, count) in exts.iter().take(15) {
            let name = if ext.is_empty() { "(none)" } else { ext.as_str() };
            println!("  {:<12} {}", name, count);
        }
    }
    if let Some(paths) = summary["filePaths"].as_array() {
        println!();
        for path in paths.iter().filter_map(Value::as_str) {
            println!("  {}", path);
        }
    }
}

fn print_tokens(estimate: &Value) {
    println!("~{} tokens ({} files, {} bytes)", estimate["tokens"], estimate["files"], estimate["totalBytes"]);
    println!();
    if let Some(providers) = estimate["providers"].as_array() {
        for p in providers {
            println!(
                "  {:<16} {:>9} ctx  ${:<8}  {}",
                p["model"].as_str().unwrap_or("?"),
                p["contextWindow"],
                p["estimatedCost"],
                if p["fits"] == true { "fits" } else { "too large" }
            );
        }
    }
}

// ─── daemon subcommands ───────────────────────────────────────────

fn daemon_command(action: DaemonAction, config: DaemonConfig) -> Result<()> {
    match action {
        DaemonAction::Start { foreground: true } => start_daemon(config),
        DaemonAction::Start { foreground: false } => spawn_detached(config),

        DaemonAction::Stop => {
            let daemon = Daemon::new(config)?;
            if daemon.running() {
                daemon.call("daemon.shutdown", Value::Null)?;
                wait_for(|| !daemon.config.socket_path.exists(), Duration::from_secs(5));
                println!("daemon stopped");
                return Ok(());
            }
            match read_pid(&daemon.config.pid_file) {
                Some(pid) if pid_is_alive(pid) => {
                    // SAFETY: plain signal delivery to a pid we recorded.
                    unsafe {
                        libc::kill(pid, libc::SIGTERM);
                    }
                    println!("sent SIGTERM to unresponsive daemon (pid {})", pid);
                }
                _ => println!("daemon not running"),
            }
            Ok(())
        }

        DaemonAction::Status => {
            match read_pid(&config.pid_file) {
                Some(pid) if pid_is_alive(pid) => {
                    println!("daemon running (pid {})", pid);
                    println!("socket: {}", config.socket_path.display());
                }
                Some(pid) => println!("daemon not running (stale pid file, pid {})", pid),
                None => println!("daemon not running"),
            }
            Ok(())
        }

        DaemonAction::Ping => {
            let daemon = Daemon::new(config)?;
            let started = std::time::Instant::now();
            daemon.call("daemon.ping", Value::Null)?;
            println!("pong ({} ms)", started.elapsed().as_millis());
            Ok(())
        }
    }
}

/// Re-run ourselves with `--foreground` in a new process group and wait
/// until the socket answers.
fn spawn_detached(config: DaemonConfig) -> Result<()> {
    use std::os::unix::process::CommandExt;

    let daemon = Daemon::new(config)?;
    if daemon.running() {
        println!("daemon already running");
        return Ok(());
    }

    let exe = std::env::current_exe().context("cannot locate own executable")?;
    let log_path = daemon.config.socket_path.with_extension("log");
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log = std::fs::File::create(&log_path)
        .with_context(|| format!("failed to create {}", log_path.display()))?;

    std::process::Command::new(exe)
        .arg("--socket")
        .arg(&daemon.config.socket_path)
        .args(["daemon", "start", "--foreground"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::from(log))
        .process_group(0)
        .spawn()
        .context("failed to spawn daemon")?;

    if wait_for(|| daemon.running(), Duration::from_secs(5)) {
        println!("daemon started ({})", daemon.config.socket_path.display());
        Ok(())
    } else {
        bail!("daemon did not come up; see {}", log_path.display())
    }
}

fn wait_for(mut ready: impl FnMut() -> bool, limit: Duration) -> bool {
    let started = std::time::Instant::now();
    while started.elapsed() < limit {
        if ready() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    ready()
}
