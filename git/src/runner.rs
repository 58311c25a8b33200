//! Running git commands against a repository.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::error::{GitError, Result};

/// Output of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Captured standard output.
    pub stdout: String,

    /// Captured standard error.
    pub stderr: String,

    /// Exit code, `None` when the process was terminated by a signal.
    pub status: Option<i32>,
}

impl CommandOutput {
    /// Create an output with the given exit code and stdout.
    pub fn new(status: i32, stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            status: Some(status),
        }
    }

    /// Attach stderr.
    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }

    /// Whether the command exited with status 0.
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// The exit code, if any.
    pub fn code(&self) -> Option<i32> {
        self.status
    }

    /// Turn this output into a [`GitError::CommandFailed`].
    pub fn into_error(self, args: &[String]) -> GitError {
        GitError::CommandFailed {
            command: args.join(" "),
            code: self.status,
            stderr: self.stderr.trim().to_string(),
        }
    }
}

/// Executes revision-control commands against a repository.
///
/// Implementations are synchronous; async callers should move calls onto the
/// blocking pool. A non-zero exit is not an error at this level, the caller
/// decides what each status means.
pub trait CommandRunner: Send + Sync {
    /// Run `args` against the repository at `repo`.
    fn run(&self, repo: &Path, args: &[String]) -> Result<CommandOutput>;
}

/// Runs the real `git` binary.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
}

impl GitCli {
    /// Use `git` from `PATH`.
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("git"),
        }
    }

    /// Use a specific git executable.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// The executable this runner spawns.
    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner for GitCli {
    fn run(&self, repo: &Path, args: &[String]) -> Result<CommandOutput> {
        debug!("git -C {} {}", repo.display(), args.join(" "));

        let output = Command::new(&self.program)
            .arg("-C")
            .arg(repo)
            .args(args)
            .output()
            .map_err(|source| GitError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            status: output.status.code(),
        })
    }
}

/// Ask git whether `path` is ignored in the repository at `repo`.
///
/// `check-ignore` exits 0 for ignored paths and 1 for paths that are not
/// ignored; anything else (outside a repository, bad path) is an error.
pub fn is_ignored(runner: &dyn CommandRunner, repo: &Path, path: &Path) -> Result<bool> {
    let args = vec![
        "check-ignore".to_string(),
        "-q".to_string(),
        "--".to_string(),
        path.to_string_lossy().into_owned(),
    ];
    let output = runner.run(repo, &args)?;
    match output.code() {
        Some(0) => Ok(true),
        Some(1) => Ok(false),
        _ => Err(output.into_error(&args)),
    }
}
