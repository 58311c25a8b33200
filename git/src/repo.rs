//! Diff requests against a repository.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::diff::{DiffResult, parse};
use crate::error::{GitError, Result};
use crate::runner::CommandRunner;

const MAIN: &str = "main";
const MASTER: &str = "master";

/// What a diff compares.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum DiffTarget {
    /// Unstaged changes against the index.
    #[default]
    WorkingTree,

    /// Staged changes against HEAD.
    Staged,

    /// Staged and unstaged changes against HEAD.
    Head,

    /// The working tree against an arbitrary revision.
    Ref { name: String },

    /// Everything on HEAD since it forked from `base`.
    ///
    /// Without a base the repository's default branch is used.
    Branch { base: Option<String> },

    /// Extra arguments passed to `git diff` verbatim.
    Args { args: Vec<String> },
}

impl DiffTarget {
    fn needs_default_branch(&self) -> bool {
        matches!(self, Self::Branch { base: None })
    }
}

/// Build the full `git diff` argument list for `target`.
pub fn diff_args(target: &DiffTarget, default_branch: &str) -> Vec<String> {
    let mut args = vec![
        "diff".to_string(),
        "--unified=3".to_string(),
        "--no-color".to_string(),
    ];

    match target {
        DiffTarget::WorkingTree => {}
        DiffTarget::Staged => args.push("--cached".to_string()),
        DiffTarget::Head => args.push("HEAD".to_string()),
        DiffTarget::Ref { name } => args.push(name.clone()),
        DiffTarget::Branch { base } => {
            let base = base.as_deref().unwrap_or(default_branch);
            args.push(format!("{base}...HEAD"));
        }
        DiffTarget::Args { args: extra } => args.extend(extra.iter().cloned()),
    }

    args
}

/// Whether `dir` is a git repository.
///
/// `.git` may be a directory (regular checkout) or a file (worktree, submodule).
pub fn is_git_repo(dir: &Path) -> bool {
    dir.join(".git").exists()
}

/// A repository on disk plus the runner used to query it.
#[derive(Clone)]
pub struct GitRepository {
    path: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl std::fmt::Debug for GitRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitRepository")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl GitRepository {
    /// Create a handle for the repository at `path`.
    pub fn new(path: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            path: path.into(),
            runner,
        }
    }

    /// Like [`GitRepository::new`], but fails unless `path` is a repository.
    pub fn open(path: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Result<Self> {
        let path = path.into();
        if !is_git_repo(&path) {
            return Err(GitError::NotARepository(path.display().to_string()));
        }
        Ok(Self::new(path, runner))
    }

    /// Repository path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `git diff` for `target` and parse the output.
    ///
    /// Exit status 1 means "differences exist" and is not an error.
    pub fn diff_blocking(&self, target: &DiffTarget) -> Result<DiffResult> {
        let default_branch = if target.needs_default_branch() {
            self.default_branch()
        } else {
            MAIN.to_string()
        };
        let args = diff_args(target, &default_branch);

        let output = self.runner.run(&self.path, &args)?;
        match output.code() {
            Some(0) | Some(1) => {}
            _ => return Err(output.into_error(&args)),
        }

        let result = parse(&output.stdout);
        debug!(
            "diff {}: {} files, +{} -{}",
            self.path.display(),
            result.files.len(),
            result.additions,
            result.deletions
        );
        Ok(result)
    }

    /// Async form of [`GitRepository::diff_blocking`], run on the blocking pool.
    pub async fn diff(&self, target: DiffTarget) -> Result<DiffResult> {
        let repo = self.clone();
        tokio::task::spawn_blocking(move || repo.diff_blocking(&target)).await?
    }

    /// Local branch names.
    pub fn list_branches(&self) -> Result<Vec<String>> {
        let args = vec![
            "for-each-ref".to_string(),
            "--format=%(refname:short)".to_string(),
            "refs/heads/".to_string(),
        ];
        let output = self.runner.run(&self.path, &args)?;
        if !output.success() {
            return Err(output.into_error(&args));
        }

        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect())
    }

    /// `main` if it exists, then `master`, then the first branch, else `main`.
    pub fn default_branch(&self) -> String {
        let branches = match self.list_branches() {
            Ok(branches) => branches,
            Err(e) => {
                debug!("listing branches failed, assuming {MAIN}: {e}");
                return MAIN.to_string();
            }
        };

        [MAIN, MASTER]
            .into_iter()
            .find(|name| branches.iter().any(|b| b == name))
            .map(String::from)
            .or_else(|| branches.into_iter().next())
            .unwrap_or_else(|| MAIN.to_string())
    }
}
