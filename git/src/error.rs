//! Error types for git operations.

use thiserror::Error;

/// Result type alias for git operations.
pub type Result<T> = std::result::Result<T, GitError>;

/// Errors that can occur while talking to git.
#[derive(Error, Debug)]
pub enum GitError {
    /// The git binary could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// git ran but exited with a status we treat as failure.
    #[error("git {command} failed ({}): {stderr}", exit_label(.code))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// Not a git repository.
    #[error("not a git repository: {0}")]
    NotARepository(String),

    /// The blocking task running git was cancelled or panicked.
    #[error("git task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

// thiserror hands fields over by reference.
#[allow(clippy::trivially_copy_pass_by_ref)]
fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit {code}"),
        None => "killed by signal".to_string(),
    }
}
