//! Client stub - one request, one response, bounded by a timeout.
//!
//! ```ignore
//! let req = Request::new(new_request_id(), "daemon.ping", None);
//! let pong = send_request(&socket, &req).await?.into_result()?;
//! ```

use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::timeout;
use tracing::debug;
use uuid::Uuid;

use crate::config::DEFAULT_CLIENT_TIMEOUT;

/// How long `is_daemon_running` waits for a pong. Shorter than
/// `DEFAULT_CLIENT_TIMEOUT`: a ping does no work, so a slow answer means the
/// daemon is wedged.
pub const LIVENESS_TIMEOUT: Duration = Duration::from_secs(1);

use super::framing::{Frame, LineFramer};
use super::protocol::{Request, Response};

/// Errors talking to the daemon.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No daemon listening on the socket.
    #[error("connection failed: {0}")]
    ConnectionFailed(#[source] std::io::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The daemon answered with something that is not a response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The daemon answered with an error response.
    #[error("daemon error {code}: {message}")]
    Server {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused => {
                ClientError::ConnectionFailed(err)
            }
            _ => ClientError::Io(err),
        }
    }
}

impl ClientError {
    /// Daemon-side error code, if the daemon answered at all.
    pub fn code(&self) -> Option<i64> {
        match self {
            ClientError::Server { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl Response {
    /// The result, or the daemon's error as `ClientError::Server`.
    pub fn into_result(self) -> Result<Value, ClientError> {
        match (self.error, self.result) {
            (Some(err), _) => Err(ClientError::Server {
                code: err.code,
                message: err.message,
                data: err.data,
            }),
            (None, Some(result)) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}

/// `<millis>-<uuid>`; unique enough to correlate logs.
pub fn new_request_id() -> String {
    format!(
        "{}-{}",
        chrono::Utc::now().timestamp_millis(),
        Uuid::new_v4().simple()
    )
}

/// Send one request with the default timeout.
pub async fn send_request(socket: &Path, request: &Request) -> Result<Response, ClientError> {
    send_request_with_timeout(socket, request, DEFAULT_CLIENT_TIMEOUT).await
}

/// Send one request and wait at most `limit` for its response.
pub async fn send_request_with_timeout(
    socket: &Path,
    request: &Request,
    limit: Duration,
) -> Result<Response, ClientError> {
    match timeout(limit, round_trip(socket, request)).await {
        Ok(result) => result,
        Err(_) => Err(ClientError::Timeout(limit)),
    }
}

async fn round_trip(socket: &Path, request: &Request) -> Result<Response, ClientError> {
    let mut stream = UnixStream::connect(socket)
        .await
        .map_err(ClientError::ConnectionFailed)?;

    let mut line = serde_json::to_vec(request).map_err(|e| ClientError::Protocol(e.to_string()))?;
    line.push(b'\n');
    stream.write_all(&line).await?;
    debug!(id = %request.id, method = %request.method, "request sent");

    // Responses carry whole bundles; only requests are size-capped.
    let mut framer = LineFramer::with_limit(usize::MAX);
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        while let Some(frame) = framer.next_frame() {
            match frame {
                Frame::Line(bytes) => {
                    return serde_json::from_slice(&bytes)
                        .map_err(|e| ClientError::Protocol(format!("bad response: {}", e)));
                }
                Frame::Oversized(len) => {
                    return Err(ClientError::Protocol(format!("response of {} bytes too large", len)))
                }
            }
        }
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(ClientError::Protocol(
                "connection closed before a response arrived".to_string(),
            ));
        }
        framer.push(&buf[..n]);
    }
}

/// True if a daemon answers a ping on `socket` within `LIVENESS_TIMEOUT`.
pub async fn is_daemon_running(socket: &Path) -> bool {
    let ping = Request::new(new_request_id(), "daemon.ping", None);
    match send_request_with_timeout(socket, &ping, LIVENESS_TIMEOUT).await {
        Ok(resp) => !resp.is_error(),
        Err(_) => false,
    }
}

/// Pid recorded in the pid file, if any.
pub fn read_pid(pid_file: &Path) -> Option<i32> {
    std::fs::read_to_string(pid_file).ok()?.trim().parse().ok()
}

/// Whether a process with this pid exists (signal 0 probe).
pub fn pid_is_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs only the existence and permission check.
    unsafe { libc::kill(pid, 0) == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::protocol::{codes, RpcError};

    #[test]
    fn test_request_ids_are_unique() {
        let a = new_request_id();
        let b = new_request_id();
        assert_ne!(a, b);
        let (millis, uuid) = a.split_once('-').unwrap();
        assert!(millis.parse::<i64>().is_ok());
        assert_eq!(uuid.len(), 32);
    }

    #[test]
    fn test_into_result() {
        let ok = Response::ok("1", serde_json::json!({"a": 1}));
        assert_eq!(ok.into_result().unwrap()["a"], 1);

        let err = Response::error("2", RpcError::new(codes::NO_CACHED_SCAN, "no cached scan"));
        let err = err.into_result().unwrap_err();
        assert_eq!(err.code(), Some(codes::NO_CACHED_SCAN));
    }

    #[tokio::test]
    async fn test_missing_socket_is_connection_failure() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("none.sock");
        let req = Request::new("1", "daemon.ping", None);
        let err = send_request(&socket, &req).await.unwrap_err();
        assert!(matches!(err, ClientError::ConnectionFailed(_)));
        assert!(!is_daemon_running(&socket).await);
    }

    #[tokio::test]
    async fn test_silent_daemon_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("silent.sock");
        let listener = tokio::net::UnixListener::bind(&socket).unwrap();
        // Accept and hold connections without ever answering.
        let holder = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let req = Request::new("1", "daemon.ping", None);
        let limit = Duration::from_millis(100);
        let err = send_request_with_timeout(&socket, &req, limit)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout(d) if d == limit));
        assert!(!is_daemon_running(&socket).await);

        holder.abort();
    }

    #[tokio::test]
    async fn test_response_larger_than_request_cap() {
        use tokio::io::AsyncBufReadExt;

        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("big.sock");
        let listener = tokio::net::UnixListener::bind(&socket).unwrap();
        let big = "x".repeat(crate::daemon::MAX_FRAME_BYTES + 1024);
        let body = big.clone();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut line = String::new();
            tokio::io::BufReader::new(read).read_line(&mut line).await.unwrap();
            let resp = Response::ok("1", serde_json::json!({ "content": body }));
            let mut out = serde_json::to_vec(&resp).unwrap();
            out.push(b'\n');
            write.write_all(&out).await.unwrap();
        });

        let req = Request::new("1", "bundle.generate", None);
        let resp = send_request_with_timeout(&socket, &req, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(resp.into_result().unwrap()["content"].as_str().unwrap().len(), big.len());
    }

    #[test]
    fn test_pid_probe() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("daemon.pid");
        assert_eq!(read_pid(&pid_file), None);
        std::fs::write(&pid_file, format!("{}\n", std::process::id())).unwrap();
        let pid = read_pid(&pid_file).unwrap();
        assert!(pid_is_alive(pid));
        assert!(!pid_is_alive(0));
    }
}
