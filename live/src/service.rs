//! The API transports call into: diffs on request, refresh notices on change.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use prview_git::{CommandRunner, DiffResult, DiffTarget, GitRepository, is_git_repo};
use prview_watcher::{WatchConfig, WatchManager};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::connection::{MessageSink, MessageSource};
use crate::error::{LiveError, Result};
use crate::hub::{HubExit, NotificationHub, RefreshHook};
use crate::protocol::{INVALID_REPO, ServerMessage};

/// Diff and live-refresh service rooted at a work directory.
///
/// With no repository name, the work directory itself is the repository.
/// A name selects a nested repository below it (`"meta/web"`).
#[derive(Clone)]
pub struct LiveDiffService {
    work_dir: PathBuf,
    runner: Arc<dyn CommandRunner>,
    hub: NotificationHub,
}

impl LiveDiffService {
    pub fn new(work_dir: impl Into<PathBuf>, config: WatchConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let manager = WatchManager::new(config, runner.clone());
        Self {
            work_dir: work_dir.into(),
            runner,
            hub: NotificationHub::new(manager),
        }
    }

    /// Run `hook` before every refresh notice sent by [`LiveDiffService::serve`].
    pub fn with_on_refresh(mut self, hook: Arc<dyn RefreshHook>) -> Self {
        self.hub = self.hub.with_on_refresh(hook);
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn hub(&self) -> &NotificationHub {
        &self.hub
    }

    pub fn manager(&self) -> &WatchManager {
        self.hub.manager()
    }

    /// Directory of the repository `repo` names, or the work directory.
    pub fn resolve(&self, repo: Option<&str>) -> Result<PathBuf> {
        let Some(name) = repo.filter(|name| !name.is_empty()) else {
            return Ok(self.work_dir.clone());
        };
        let dir = nested_repo_path(&self.work_dir, name)
            .ok_or_else(|| LiveError::InvalidRepo(name.to_string()))?;
        if !is_git_repo(&dir) {
            return Err(LiveError::InvalidRepo(name.to_string()));
        }
        Ok(dir)
    }

    pub fn repository(&self, repo: Option<&str>) -> Result<GitRepository> {
        Ok(GitRepository::new(self.resolve(repo)?, self.runner.clone()))
    }

    pub async fn diff(&self, repo: Option<&str>, target: DiffTarget) -> Result<DiffResult> {
        Ok(self.repository(repo)?.diff(target).await?)
    }

    /// Serve a live connection for `repo`.
    ///
    /// An unresolvable repository gets an error message and a closed connection.
    pub async fn serve<S, R>(
        &self,
        repo: Option<&str>,
        mut sink: S,
        source: R,
        cancel: CancellationToken,
    ) -> Result<HubExit>
    where
        S: MessageSink,
        R: MessageSource,
    {
        let directory = match self.resolve(repo) {
            Ok(directory) => directory,
            Err(e) => {
                warn!("refusing live connection: {e}");
                if let Err(send_err) = sink.send(&ServerMessage::error(INVALID_REPO)).await {
                    warn!("could not report invalid repo: {send_err}");
                }
                sink.close().await;
                return Err(e);
            }
        };
        self.hub.serve(&directory, sink, source, cancel).await
    }
}

impl std::fmt::Debug for LiveDiffService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveDiffService")
            .field("work_dir", &self.work_dir)
            .field("hub", &self.hub)
            .finish_non_exhaustive()
    }
}

/// `work_dir/name`, provided every `/`-separated part of `name` is a plain
/// path segment. Rejects empty parts, `.`, `..` and absolute names.
fn nested_repo_path(work_dir: &Path, name: &str) -> Option<PathBuf> {
    let mut dir = work_dir.to_path_buf();
    for part in name.split('/') {
        let mut components = Path::new(part).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(segment)), None) if segment == part => dir.push(segment),
            _ => return None,
        }
    }
    Some(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use prview_git::CommandOutput;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeGit {
        calls: Mutex<Vec<(PathBuf, Vec<String>)>>,
    }

    const DIFF: &str = "\
diff --git a/a.txt b/a.txt
--- a/a.txt
+++ b/a.txt
@@ -1 +1,2 @@
 one
+two
";

    impl CommandRunner for FakeGit {
        fn run(&self, repo: &Path, args: &[String]) -> prview_git::Result<CommandOutput> {
            self.calls.lock().unwrap().push((repo.to_path_buf(), args.to_vec()));
            if args.first().is_some_and(|a| a == "diff") {
                Ok(CommandOutput::new(1, DIFF))
            } else {
                Ok(CommandOutput::new(1, ""))
            }
        }
    }

    #[test]
    fn test_nested_repo_path_rejects_traversal() {
        let work = Path::new("/work");
        assert_eq!(nested_repo_path(work, "web"), Some(PathBuf::from("/work/web")));
        assert_eq!(nested_repo_path(work, "meta/web"), Some(PathBuf::from("/work/meta/web")));

        for bad in ["", "..", "../etc", "meta/../..", "meta//web", "./web", "meta/", "/etc"] {
            assert_eq!(nested_repo_path(work, bad), None, "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_resolve_requires_a_repository() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(temp.path().join("meta/web/.git")).unwrap();
        std::fs::create_dir_all(temp.path().join("plain")).unwrap();
        let service = LiveDiffService::new(temp.path(), WatchConfig::default(), Arc::new(FakeGit::default()));

        assert_eq!(service.resolve(None).unwrap(), temp.path());
        assert_eq!(service.resolve(Some("")).unwrap(), temp.path());
        assert_eq!(service.resolve(Some("meta/web")).unwrap(), temp.path().join("meta/web"));
        assert!(matches!(service.resolve(Some("plain")), Err(LiveError::InvalidRepo(_))));
        assert!(matches!(service.resolve(Some("../x")), Err(LiveError::InvalidRepo(_))));
    }

    #[tokio::test]
    async fn test_diff_runs_in_resolved_repository() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(temp.path().join("web/.git")).unwrap();
        let git = Arc::new(FakeGit::default());
        let service = LiveDiffService::new(temp.path(), WatchConfig::default(), git.clone());

        let result = service.diff(Some("web"), DiffTarget::Staged).await.unwrap();

        assert_eq!(result.files.len(), 1);
        assert_eq!(result.additions, 1);
        let calls = git.calls.lock().unwrap();
        assert_eq!(calls[0].0, temp.path().join("web"));
        assert_eq!(calls[0].1, vec!["diff", "--unified=3", "--no-color", "--cached"]);
    }
}
