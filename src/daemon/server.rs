//! Daemon server - Unix socket listener and per-connection loops.

use anyhow::{bail, Context, Result};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

use crate::config::DaemonConfig;

use super::client::{pid_is_alive, read_pid};
use super::framing::{Frame, LineFramer, MAX_FRAME_BYTES};
use super::methods::handle_line;
use super::protocol::{Response, RpcError, UNKNOWN_ID};
use super::session::Session;

const READ_CHUNK: usize = 64 * 1024;

/// A bound, not yet serving, daemon.
pub struct DaemonServer {
    listener: UnixListener,
    session: Arc<Session>,
    socket_path: PathBuf,
    pid_file: PathBuf,
}

impl DaemonServer {
    /// Prepare the state directory, bind the socket and write the pid file.
    ///
    /// Refuses to start if the pid file names another live process.
    pub fn bind(session: Arc<Session>) -> Result<Self> {
        let socket_path = session.config.socket_path.clone();
        let pid_file = session.config.pid_file.clone();

        if let Some(pid) = read_pid(&pid_file) {
            if pid != std::process::id() as i32 && pid_is_alive(pid) {
                bail!("daemon already running (pid {})", pid);
            }
        }

        for path in [&socket_path, &pid_file] {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }

        if socket_path.exists() {
            debug!(socket = %socket_path.display(), "removing stale socket");
            std::fs::remove_file(&socket_path)
                .with_context(|| format!("failed to remove {}", socket_path.display()))?;
        }

        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("failed to bind {}", socket_path.display()))?;
        std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o600))
            .context("failed to restrict socket permissions")?;
        std::fs::write(&pid_file, format!("{}\n", std::process::id()))
            .with_context(|| format!("failed to write {}", pid_file.display()))?;

        Ok(Self {
            listener,
            session,
            socket_path,
            pid_file,
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections until shutdown, then remove the socket and pid file.
    pub async fn serve(self) -> Result<()> {
        let mut shutdown = self.session.shutdown_signal();
        info!(socket = %self.socket_path.display(), pid = std::process::id(), "daemon listening");

        while !*shutdown.borrow_and_update() {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let session = Arc::clone(&self.session);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(session, stream).await {
                                debug!(error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "accept error");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(
            requests = self.session.requests(),
            "daemon shutting down"
        );
        drop(self.listener);
        for path in [&self.socket_path, &self.pid_file] {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "cleanup failed");
                }
            }
        }
        Ok(())
    }
}

/// Read framed requests and answer each in order until EOF or shutdown.
async fn handle_connection(session: Arc<Session>, stream: UnixStream) -> std::io::Result<()> {
    let _guard = session.connection_guard();
    let mut shutdown = session.shutdown_signal();
    let (mut reader, mut writer) = stream.into_split();
    let mut framer = LineFramer::new();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        let n = tokio::select! {
            read = reader.read(&mut buf) => read?,
            _ = shutdown.changed() => break,
        };
        if n == 0 {
            if framer.pending() > 0 {
                debug!(bytes = framer.pending(), "connection closed mid-request");
            }
            break;
        }
        framer.push(&buf[..n]);

        while let Some(frame) = framer.next_frame() {
            let response = match frame {
                Frame::Line(line) => handle_line(&session, &line).await,
                Frame::Oversized(len) => {
                    warn!(bytes = len, "dropping oversized frame");
                    Response::error(
                        UNKNOWN_ID,
                        RpcError::parse_error(format!(
                            "frame of {} bytes exceeds the {} byte limit",
                            len, MAX_FRAME_BYTES
                        )),
                    )
                }
            };
            let mut out = serde_json::to_vec(&response)?;
            out.push(b'\n');
            writer.write_all(&out).await?;
        }
    }
    Ok(())
}

/// Serve with `config` until the daemon is told to stop.
pub async fn run_daemon(config: DaemonConfig) -> Result<()> {
    let session = Arc::new(Session::new(config));
    let server = DaemonServer::bind(Arc::clone(&session))?;
    tokio::spawn(watch_signals(session));
    server.serve().await
}

/// Entry point for `ctxpack daemon start`: a current-thread runtime with
/// SIGINT and SIGTERM wired to shutdown.
pub fn start_daemon(config: DaemonConfig) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build runtime")?;
    runtime.block_on(run_daemon(config))
}

async fn watch_signals(session: Arc<Session>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGTERM");
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
        _ = term.recv() => info!("received SIGTERM"),
    }
    session.request_shutdown();
}
