//! Deciding which paths are not worth watching.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::{Component, Path};
use std::sync::Arc;

use prview_git::{CommandRunner, is_ignored};
use tracing::debug;

use crate::config::WatchConfig;

/// Decides whether a path is excluded from watching.
///
/// The cheap, offline checks run first; only paths that survive them are
/// handed to `git check-ignore`, which spawns a process.
pub struct IgnorePolicy {
    runner: Arc<dyn CommandRunner>,
    excluded_dirs: HashSet<String>,
    vcs_dir: String,
}

impl IgnorePolicy {
    /// Build a policy from config, asking `runner` for repository ignore rules.
    pub fn new(config: &WatchConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            excluded_dirs: config.excluded_dirs.iter().cloned().collect(),
            vcs_dir: config.vcs_dir.clone(),
        }
    }

    /// Whether any component of `path` is the metadata directory.
    pub fn is_vcs_path(&self, path: &Path) -> bool {
        let vcs_dir = OsStr::new(&self.vcs_dir);
        path.components()
            .any(|c| matches!(c, Component::Normal(name) if name == vcs_dir))
    }

    /// Whether the directory at `path` (and its whole subtree) should be left unwatched.
    ///
    /// `repo_root` is the watch root; it is only ever skipped for living inside
    /// a metadata directory.
    pub fn should_skip(&self, path: &Path, repo_root: &Path) -> bool {
        if self.is_vcs_path(path) {
            return true;
        }
        if path == repo_root {
            return false;
        }

        if let Some(name) = path.file_name() {
            let name = name.to_string_lossy();
            if name.starts_with('.') || self.excluded_dirs.contains(&*name) {
                return true;
            }
        }

        self.repo_ignores(path, repo_root)
    }

    /// Whether an event reported for `path` (file or directory) should be dropped.
    pub fn is_ignored_event(&self, path: &Path, repo_root: &Path) -> bool {
        self.is_vcs_path(path) || (path != repo_root && self.repo_ignores(path, repo_root))
    }

    /// Ask the repository. Failures count as "not ignored".
    // TODO: decide whether a path outside any repository should fail closed instead.
    fn repo_ignores(&self, path: &Path, repo_root: &Path) -> bool {
        match is_ignored(self.runner.as_ref(), repo_root, path) {
            Ok(ignored) => ignored,
            Err(e) => {
                debug!("ignore check failed for {}, watching it: {e}", path.display());
                false
            }
        }
    }
}

impl std::fmt::Debug for IgnorePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IgnorePolicy")
            .field("excluded_dirs", &self.excluded_dirs)
            .field("vcs_dir", &self.vcs_dir)
            .finish_non_exhaustive()
    }
}
