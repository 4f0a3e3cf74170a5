//! Daemon module - a background process that keeps project scans warm.
//!
//! The daemon holds recent scan results in memory and serves requests over a
//! Unix socket, so repeated queries against the same project skip the walk.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           ctxpack daemon                │
//! │  - project cache (TTL, bounded)         │
//! │  - scans on the blocking pool           │
//! │  - Unix socket server                   │
//! └─────────────────────────────────────────┘
//!           ▲
//!           │ <cache dir>/ctxpack/daemon.sock
//!           ▼
//! ┌─────────────────────────────────────────┐
//! │           ctxpack CLI                   │
//! │  - connects to daemon                   │
//! │  - one JSON line per request            │
//! │  - one JSON line per response           │
//! └─────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod client;
pub mod framing;
pub mod methods;
pub mod protocol;
pub mod server;
pub mod session;

pub use cache::{CacheEntry, CacheStats, ProjectCache};
pub use client::{
    is_daemon_running, new_request_id, pid_is_alive, read_pid, send_request,
    send_request_with_timeout, ClientError, LIVENESS_TIMEOUT,
};
pub use framing::{Frame, LineFramer, MAX_FRAME_BYTES};
pub use methods::{dispatch, handle_line};
pub use protocol::{codes, MethodCall, Request, Response, RpcError, METHODS};
pub use server::{run_daemon, start_daemon, DaemonServer};
pub use session::Session;
