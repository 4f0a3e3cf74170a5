//! Error types for ctxpack.

use std::path::PathBuf;

use thiserror::Error;

use crate::daemon::protocol::codes;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PackError>;

/// Everything that can go wrong inside the library.
///
/// Each variant knows which RPC error code it maps to, so the daemon can turn
/// a failed handler into a structured response without matching on strings.
#[derive(Debug, Error)]
pub enum PackError {
    #[error("project root does not exist: {0}")]
    RootNotFound(PathBuf),

    #[error("project root is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("no cached scan for {0}")]
    NoCachedScan(PathBuf),

    #[error("history entry not found: {0}")]
    HistoryNotFound(String),

    #[error("unknown preset: {0}")]
    UnknownPreset(String),

    #[error("invalid glob pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("config error in {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("background task failed: {0}")]
    Task(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PackError {
    /// RPC error code for this failure.
    pub fn code(&self) -> i64 {
        match self {
            PackError::NoCachedScan(_) => codes::NO_CACHED_SCAN,
            PackError::RootNotFound(_) | PackError::NotADirectory(_) => codes::INVALID_ROOT,
            PackError::HistoryNotFound(_) => codes::HISTORY_NOT_FOUND,
            PackError::UnknownPreset(_) | PackError::InvalidPattern { .. } => codes::INVALID_PARAMS,
            _ => codes::INTERNAL_ERROR,
        }
    }

    /// Structured detail attached to domain errors, if any.
    pub fn data(&self) -> Option<serde_json::Value> {
        match self {
            PackError::NoCachedScan(root) => Some(serde_json::json!({
                "root": root,
                "hint": "run project.scan first",
            })),
            PackError::RootNotFound(root) | PackError::NotADirectory(root) => {
                Some(serde_json::json!({ "root": root }))
            }
            _ => None,
        }
    }
}

impl From<serde_json::Error> for PackError {
    fn from(e: serde_json::Error) -> Self {
        PackError::Serialize(e.to_string())
    }
}

impl From<serde_yaml::Error> for PackError {
    fn from(e: serde_yaml::Error) -> Self {
        PackError::Serialize(e.to_string())
    }
}

impl From<tokio::task::JoinError> for PackError {
    fn from(e: tokio::task::JoinError) -> Self {
        PackError::Task(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_errors_have_their_own_codes() {
        let err = PackError::NoCachedScan(PathBuf::from("/tmp/proj"));
        assert_eq!(err.code(), codes::NO_CACHED_SCAN);
        let data = err.data().unwrap();
        assert_eq!(data["root"], "/tmp/proj");

        assert_eq!(PackError::RootNotFound(PathBuf::from("/x")).code(), codes::INVALID_ROOT);
        assert_eq!(PackError::UnknownPreset("nope".into()).code(), codes::INVALID_PARAMS);
    }

    #[test]
    fn test_io_errors_are_internal() {
        let err: PackError = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert_eq!(err.code(), codes::INTERNAL_ERROR);
        assert!(err.data().is_none());
        assert_eq!(err.to_string(), "I/O error: boom");
    }
}
