//! # Git
//!
//! Everything prview needs from the revision-control side:
//!
//! - **Command runner**: run `git` against a repository path, get text and an exit status
//! - **Diff parser**: turn unified diff text into files, hunks and lines
//! - **Diff requests**: build `git diff` invocations for the supported comparison modes
//!
//! ```text
//! DiffTarget ──► GitRepository ──► CommandRunner ──► raw text ──► parse() ──► DiffResult
//! ```

pub mod diff;
pub mod error;
pub mod repo;
pub mod runner;

pub use diff::{
    DiffResult, FileDiff, FileStatus, Hunk, HunkRange, Line, LineKind, NO_FILE, parse,
    parse_hunk_header,
};
pub use error::{GitError, Result};
pub use repo::{DiffTarget, GitRepository, diff_args, is_git_repo};
pub use runner::{CommandOutput, CommandRunner, GitCli, is_ignored};
