//! Error types for live connections.

use prview_git::GitError;
use prview_watcher::WatcherError;
use thiserror::Error;

/// Errors from serving a live connection or answering a diff request.
#[derive(Debug, Error)]
pub enum LiveError {
    /// The directory could not be watched.
    #[error("watch failed: {0}")]
    Watch(#[from] WatcherError),

    /// A git query failed.
    #[error(transparent)]
    Git(#[from] GitError),

    /// The requested repository name is unsafe or not a repository.
    #[error("invalid repo: {0}")]
    InvalidRepo(String),

    /// Reading from or writing to the connection failed.
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    /// A message could not be encoded.
    #[error("encode error: {0}")]
    Json(#[from] serde_json::Error),

    /// The connection was already closed.
    #[error("connection closed")]
    Closed,
}

/// Result type for live operations.
pub type Result<T> = std::result::Result<T, LiveError>;
