//! Server-to-client messages.
//!
//! There are no client messages: anything the client sends, or the client
//! going away, means "stop".

use serde::{Deserialize, Serialize};

/// Sent when the watch for a connection could not be set up.
pub const WATCHER_FAILED: &str = "watcher failed";

/// Sent when the requested repository cannot be resolved.
pub const INVALID_REPO: &str = "invalid repo";

/// A message written to a live connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Something changed; re-fetch the diff.
    Refresh,

    /// Setup failed. The server closes the connection right after.
    Error { message: String },
}

impl ServerMessage {
    /// An error message with `message` as its text.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}
