//! One OS-level watch over a directory tree.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::Result;
use crate::event::FileEventKind;
use crate::ignore::IgnorePolicy;

/// Watches a directory tree through a single notify watcher.
///
/// Every directory is registered non-recursively, so subtrees pruned by the
/// [`IgnorePolicy`] really stay unwatched. Directories created later are
/// registered by [`DirectoryWatcher::process`] as their events arrive.
pub struct DirectoryWatcher {
    /// Watch root, also the repository root for ignore checks.
    root: PathBuf,

    policy: Arc<IgnorePolicy>,

    /// `None` once closed.
    inner: Mutex<Option<Inner>>,
}

struct Inner {
    watcher: RecommendedWatcher,
    registered: HashSet<PathBuf>,
}

impl DirectoryWatcher {
    /// Allocate the OS watch. Events are delivered to `handler`.
    ///
    /// Nothing is registered yet; call [`DirectoryWatcher::add_recursive`].
    pub fn new<F>(root: impl Into<PathBuf>, policy: Arc<IgnorePolicy>, handler: F) -> Result<Self>
    where
        F: notify::EventHandler,
    {
        let watcher = notify::recommended_watcher(handler)?;
        Ok(Self {
            root: root.into(),
            policy,
            inner: Mutex::new(Some(Inner {
                watcher,
                registered: HashSet::new(),
            })),
        })
    }

    /// The watch root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Register `dir` and every non-skipped directory below it.
    ///
    /// Skipped directories prune their whole subtree. A directory that cannot
    /// be registered is logged and skipped; the walk carries on with its
    /// siblings. Returns how many directories were newly registered.
    pub fn add_recursive(&self, dir: &Path) -> usize {
        let walker = WalkDir::new(dir)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                entry.file_type().is_dir() && !self.policy.should_skip(entry.path(), &self.root)
            });

        let mut added = 0;
        for entry in walker {
            match entry {
                Ok(entry) => {
                    if self.register(entry.path()) {
                        added += 1;
                    }
                }
                Err(e) => warn!("skipping unreadable path under {}: {e}", dir.display()),
            }
        }

        debug!("registered {added} directories under {}", dir.display());
        added
    }

    /// Handle one raw event: drop ignored paths, track created and removed
    /// directories, and report whether anything left counts as a change.
    pub fn process(&self, event: &notify::Event) -> bool {
        let kind = FileEventKind::from(event.kind);
        if !kind.is_change() {
            return false;
        }

        let mut changed = false;
        for (index, path) in event.paths.iter().enumerate() {
            if self.policy.is_ignored_event(path, &self.root) {
                continue;
            }
            changed = true;

            match kind {
                FileEventKind::Created | FileEventKind::RenamedTo => {
                    self.handle_created(path);
                }
                FileEventKind::Deleted | FileEventKind::RenamedFrom => self.handle_removed(path),
                FileEventKind::Renamed if index == 0 => self.handle_removed(path),
                FileEventKind::Renamed => {
                    self.handle_created(path);
                }
                _ => {}
            }
        }

        changed
    }

    /// Start watching a newly created path if it resolves to a directory.
    ///
    /// Symlinks are resolved first. Directories that are already registered
    /// are left alone, so a link back into the tree cannot loop.
    pub fn handle_created(&self, path: &Path) -> usize {
        let target = match dunce::canonicalize(path) {
            Ok(target) => target,
            // Already gone again.
            Err(_) => return 0,
        };
        if !target.is_dir() || self.is_registered(&target) {
            return 0;
        }
        if self.policy.should_skip(&target, &self.root) {
            debug!("not watching new directory {}", target.display());
            return 0;
        }
        self.add_recursive(&target)
    }

    /// Forget a removed directory and everything registered below it.
    pub fn handle_removed(&self, path: &Path) {
        let mut guard = self.lock();
        let Some(inner) = guard.as_mut() else {
            return;
        };

        let gone: Vec<PathBuf> = inner
            .registered
            .iter()
            .filter(|dir| dir.starts_with(path))
            .cloned()
            .collect();
        for dir in gone {
            // The OS usually dropped the watch along with the directory.
            let _ = inner.watcher.unwatch(&dir);
            inner.registered.remove(&dir);
        }
    }

    /// Number of directories currently registered.
    pub fn watched_count(&self) -> usize {
        self.lock().as_ref().map_or(0, |inner| inner.registered.len())
    }

    /// Whether `dir` is registered.
    pub fn is_registered(&self, dir: &Path) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|inner| inner.registered.contains(dir))
    }

    /// Release the OS watch. Returns `false` if it was already released.
    pub fn close(&self) -> bool {
        let closed = self.lock().take();
        match closed {
            Some(inner) => {
                info!(
                    "released watch on {} ({} directories)",
                    self.root.display(),
                    inner.registered.len()
                );
                true
            }
            None => false,
        }
    }

    /// Whether the OS watch has been released.
    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }

    fn register(&self, dir: &Path) -> bool {
        let mut guard = self.lock();
        let Some(inner) = guard.as_mut() else {
            return false;
        };
        if inner.registered.contains(dir) {
            return false;
        }

        match inner.watcher.watch(dir, RecursiveMode::NonRecursive) {
            Ok(()) => {
                inner.registered.insert(dir.to_path_buf());
                true
            }
            Err(e) => {
                warn!("failed to watch {}: {e}", dir.display());
                false
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Inner>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for DirectoryWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryWatcher")
            .field("root", &self.root)
            .field("watched", &self.watched_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WatchConfig;
    use prview_git::{CommandOutput, CommandRunner};
    use std::fs;
    use tempfile::TempDir;

    /// Ignores any path whose last component is `generated`.
    struct FakeGit;

    impl CommandRunner for FakeGit {
        fn run(&self, _repo: &Path, args: &[String]) -> prview_git::Result<CommandOutput> {
            let ignored = args.last().is_some_and(|p| Path::new(p).ends_with("generated"));
            Ok(CommandOutput::new(if ignored { 0 } else { 1 }, ""))
        }
    }

    fn tree() -> (TempDir, PathBuf) {
        let temp = TempDir::new().unwrap();
        let root = dunce::canonicalize(temp.path()).unwrap();
        for dir in [
            "src/nested",
            "docs",
            ".git/objects",
            ".cache/deep",
            "web/node_modules/pkg",
            "generated/out",
        ] {
            fs::create_dir_all(root.join(dir)).unwrap();
        }
        fs::write(root.join("src/main.rs"), "fn main() {}\n").unwrap();
        (temp, root)
    }

    fn watcher(root: &Path) -> DirectoryWatcher {
        let policy = Arc::new(IgnorePolicy::new(&WatchConfig::default(), Arc::new(FakeGit)));
        DirectoryWatcher::new(root, policy, |_event: notify::Result<notify::Event>| {}).unwrap()
    }

    #[test]
    fn test_add_recursive_prunes_skipped_subtrees() {
        let (_temp, root) = tree();
        let watcher = watcher(&root);

        let added = watcher.add_recursive(&root);

        // root, src, src/nested, docs, web
        assert_eq!(added, 5);
        assert_eq!(watcher.watched_count(), 5);
        assert!(watcher.is_registered(&root.join("src/nested")));
        assert!(watcher.is_registered(&root.join("web")));
        for pruned in [".git", ".git/objects", ".cache/deep", "web/node_modules/pkg", "generated/out"] {
            assert!(!watcher.is_registered(&root.join(pruned)), "{pruned} should be pruned");
        }
    }

    #[test]
    fn test_handle_created_registers_once() {
        let (_temp, root) = tree();
        let watcher = watcher(&root);
        watcher.add_recursive(&root);

        fs::create_dir_all(root.join("lib/inner")).unwrap();
        assert_eq!(watcher.handle_created(&root.join("lib")), 2);
        assert_eq!(watcher.handle_created(&root.join("lib")), 0);

        // Files and vanished paths are not directories to watch.
        assert_eq!(watcher.handle_created(&root.join("src/main.rs")), 0);
        assert_eq!(watcher.handle_created(&root.join("never-existed")), 0);

        // New hidden directories are skipped like during the initial walk.
        fs::create_dir(root.join(".idea")).unwrap();
        assert_eq!(watcher.handle_created(&root.join(".idea")), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_back_into_tree_does_not_loop() {
        let (_temp, root) = tree();
        let watcher = watcher(&root);
        watcher.add_recursive(&root);
        let before = watcher.watched_count();

        std::os::unix::fs::symlink(&root, root.join("src/loop")).unwrap();
        assert_eq!(watcher.handle_created(&root.join("src/loop")), 0);
        assert_eq!(watcher.watched_count(), before);
    }

    #[test]
    fn test_removed_directory_can_be_watched_again() {
        let (_temp, root) = tree();
        let watcher = watcher(&root);
        watcher.add_recursive(&root);

        fs::remove_dir_all(root.join("src")).unwrap();
        watcher.handle_removed(&root.join("src"));
        assert!(!watcher.is_registered(&root.join("src")));
        assert!(!watcher.is_registered(&root.join("src/nested")));

        fs::create_dir(root.join("src")).unwrap();
        assert_eq!(watcher.handle_created(&root.join("src")), 1);
    }

    #[test]
    fn test_close_releases_once() {
        let (_temp, root) = tree();
        let watcher = watcher(&root);
        watcher.add_recursive(&root);

        assert!(watcher.close());
        assert!(!watcher.close());
        assert!(watcher.is_closed());
        assert_eq!(watcher.watched_count(), 0);
        assert_eq!(watcher.add_recursive(&root), 0);
    }

    #[test]
    fn test_process_filters_events() {
        let (_temp, root) = tree();
        let watcher = watcher(&root);
        watcher.add_recursive(&root);

        let event = |kind, path: PathBuf| notify::Event::new(kind).add_path(path);
        let modify = notify::EventKind::Modify(notify::event::ModifyKind::Any);
        let access = notify::EventKind::Access(notify::event::AccessKind::Any);

        assert!(watcher.process(&event(modify, root.join("src/main.rs"))));
        assert!(!watcher.process(&event(access, root.join("src/main.rs"))));
        assert!(!watcher.process(&event(modify, root.join(".git/index"))));
        assert!(!watcher.process(&event(modify, root.join("generated"))));

        fs::create_dir(root.join("fresh")).unwrap();
        let create = notify::EventKind::Create(notify::event::CreateKind::Folder);
        assert!(watcher.process(&event(create, root.join("fresh"))));
        assert!(watcher.is_registered(&root.join("fresh")));
    }
}
