//! Shared watch sessions with debounced fan-out.
//!
//! Each watched directory has exactly one [`WatchEntry`] owning one
//! [`DirectoryWatcher`] and one reaction loop. Subscribers get a capacity-one
//! signal channel; a signal that finds the slot full is dropped, because one
//! pending "something changed" is all a subscriber ever needs.
//!
//! Entry lifecycle:
//!
//! ```text
//! absent ──subscribe──► active ──last release──► draining ──grace elapsed──► absent
//!                         ▲                          │
//!                         └────────subscribe─────────┘
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use prview_git::CommandRunner;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::WatchConfig;
use crate::directory::DirectoryWatcher;
use crate::error::{Result, WatcherError};
use crate::ignore::IgnorePolicy;

type RawEvent = notify::Result<notify::Event>;

/// Counters describing the manager's activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchManagerStats {
    /// Entries currently in the directory map (active or draining).
    pub live_entries: usize,

    /// Subscribers across all entries.
    pub subscribers: usize,

    /// OS watches allocated since the manager was created.
    pub watches_allocated: usize,

    /// OS watches released since the manager was created.
    pub watches_released: usize,

    /// Times a debounce timer fired.
    pub flushes: usize,

    /// Signals placed into subscriber slots.
    pub signals_delivered: usize,
}

impl WatchManagerStats {
    /// OS watches currently alive.
    pub fn active_watches(&self) -> usize {
        self.watches_allocated - self.watches_released
    }
}

#[derive(Debug, Default)]
struct Counters {
    watches_allocated: AtomicUsize,
    watches_released: AtomicUsize,
    flushes: AtomicUsize,
    signals_delivered: AtomicUsize,
}

/// Multiplexes subscribers onto one shared watch per directory.
///
/// Cloning is cheap; clones share the same entries. Must be used from
/// inside a tokio runtime.
#[derive(Clone)]
pub struct WatchManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: WatchConfig,
    policy: Arc<IgnorePolicy>,
    entries: Mutex<HashMap<PathBuf, Arc<WatchEntry>>>,
    /// Per-directory locks held while a new entry is set up, so one directory
    /// never gets two OS watches and other directories never wait on its walk.
    creating: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
    counters: Arc<Counters>,
}

/// One shared watch session for a directory.
struct WatchEntry {
    directory: PathBuf,
    debounce: Duration,
    watcher: Arc<DirectoryWatcher>,
    state: Mutex<EntryState>,
    shutdown: CancellationToken,
    runtime: Handle,
    counters: Arc<Counters>,
}

#[derive(Default)]
struct EntryState {
    next_id: u64,
    subscribers: HashMap<u64, mpsc::Sender<()>>,
    pending_teardown: Option<PendingTeardown>,
    teardown_generation: u64,
    closed: bool,
}

struct PendingTeardown {
    generation: u64,
    task: AbortHandle,
}

impl WatchManager {
    /// Create a manager. `runner` answers repository ignore queries.
    pub fn new(config: WatchConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let policy = Arc::new(IgnorePolicy::new(&config, runner));
        Self {
            inner: Arc::new(ManagerInner {
                config,
                policy,
                entries: Mutex::new(HashMap::new()),
                creating: Mutex::new(HashMap::new()),
                counters: Arc::new(Counters::default()),
            }),
        }
    }

    /// The configuration every entry is created with.
    pub fn config(&self) -> &WatchConfig {
        &self.inner.config
    }

    /// Subscribe to debounced changes under `directory`.
    ///
    /// Reuses the directory's live entry if there is one (cancelling a pending
    /// teardown), otherwise allocates the OS watch and walks the tree.
    /// Only failing to allocate the watch itself is an error; directories
    /// that cannot be registered are skipped.
    pub async fn subscribe(&self, directory: impl AsRef<Path>) -> Result<Subscription> {
        let directory = canonical_dir(directory.as_ref())?;
        let inner = &self.inner;

        if let Some(subscription) = inner.attach_existing(&directory) {
            return Ok(subscription);
        }

        let lock = inner.creation_lock(&directory);
        let result = {
            let _creating = lock.lock().await;
            // Someone may have created it while we waited.
            match inner.attach_existing(&directory) {
                Some(subscription) => Ok(subscription),
                None => inner.create_and_attach(directory.clone()).await,
            }
        };
        inner.forget_creation_lock(&directory, lock);
        result
    }

    /// Snapshot of the manager's counters.
    pub fn stats(&self) -> WatchManagerStats {
        let counters = &self.inner.counters;
        let entries = self.inner.lock_entries();
        WatchManagerStats {
            live_entries: entries.len(),
            subscribers: entries.values().map(|e| e.lock_state().subscribers.len()).sum(),
            watches_allocated: counters.watches_allocated.load(Ordering::SeqCst),
            watches_released: counters.watches_released.load(Ordering::SeqCst),
            flushes: counters.flushes.load(Ordering::SeqCst),
            signals_delivered: counters.signals_delivered.load(Ordering::SeqCst),
        }
    }

    /// Whether `directory` currently has an entry (active or draining).
    pub fn has_entry(&self, directory: impl AsRef<Path>) -> bool {
        let Ok(directory) = dunce::canonicalize(directory.as_ref()) else {
            return false;
        };
        self.inner.lock_entries().contains_key(&directory)
    }

    /// Subscribers currently attached to `directory`.
    pub fn subscriber_count(&self, directory: impl AsRef<Path>) -> usize {
        let Ok(directory) = dunce::canonicalize(directory.as_ref()) else {
            return 0;
        };
        self.inner
            .lock_entries()
            .get(&directory)
            .map_or(0, |entry| entry.lock_state().subscribers.len())
    }

    /// Tear down every entry now, without waiting for grace periods.
    ///
    /// Outstanding subscriptions see their signal source end.
    pub fn shutdown(&self) {
        let drained: Vec<_> = self.inner.lock_entries().drain().map(|(_, e)| e).collect();
        for entry in drained {
            {
                let mut state = entry.lock_state();
                state.closed = true;
                state.subscribers.clear();
                if let Some(pending) = state.pending_teardown.take() {
                    pending.task.abort();
                }
            }
            entry.close();
        }
    }
}

impl std::fmt::Debug for WatchManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchManager")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ManagerInner {
    fn lock_entries(&self) -> MutexGuard<'_, HashMap<PathBuf, Arc<WatchEntry>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn creation_lock(&self, directory: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.creating.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(directory.to_path_buf()).or_default().clone()
    }

    /// Drop the directory's creation lock once nobody else is waiting on it.
    fn forget_creation_lock(&self, directory: &Path, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.creating.lock().unwrap_or_else(PoisonError::into_inner);
        // Clones are only handed out under `creating`, so the count is exact:
        // one in the map, one here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(directory);
        }
    }

    async fn create_and_attach(self: &Arc<Self>, directory: PathBuf) -> Result<Subscription> {
        let entry = self.create_entry(directory.clone()).await?;
        let mut entries = self.lock_entries();
        entries.insert(directory, entry.clone());
        Ok(self.attach(&entry))
    }

    fn attach_existing(self: &Arc<Self>, directory: &Path) -> Option<Subscription> {
        let entries = self.lock_entries();
        entries.get(directory).map(|entry| self.attach(entry))
    }

    /// Add a subscriber to `entry`. Callers hold the entries lock.
    fn attach(self: &Arc<Self>, entry: &Arc<WatchEntry>) -> Subscription {
        let mut state = entry.lock_state();
        if let Some(pending) = state.pending_teardown.take() {
            pending.task.abort();
            debug!("reusing draining watch on {}", entry.directory.display());
        }

        let id = state.next_id;
        state.next_id += 1;
        let (tx, rx) = mpsc::channel(1);
        state.subscribers.insert(id, tx);
        debug!(
            "subscriber {id} attached to {} ({} total)",
            entry.directory.display(),
            state.subscribers.len()
        );

        Subscription {
            id,
            directory: entry.directory.clone(),
            signal: rx,
            entry: Arc::downgrade(entry),
            manager: Arc::downgrade(self),
        }
    }

    async fn create_entry(&self, directory: PathBuf) -> Result<Arc<WatchEntry>> {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel::<RawEvent>();
        let policy = self.policy.clone();
        let root = directory.clone();

        // The walk and the ignore queries block, keep them off the runtime threads.
        let watcher = tokio::task::spawn_blocking(move || -> Result<DirectoryWatcher> {
            let watcher = DirectoryWatcher::new(root, policy, move |event: RawEvent| {
                // The loop is gone once the entry is torn down.
                let _ = raw_tx.send(event);
            })?;
            watcher.add_recursive(watcher.root());
            Ok(watcher)
        })
        .await??;

        self.counters.watches_allocated.fetch_add(1, Ordering::SeqCst);
        info!(
            "watching {} ({} directories)",
            directory.display(),
            watcher.watched_count()
        );

        let watcher = Arc::new(watcher);
        let entry = Arc::new(WatchEntry {
            directory,
            debounce: self.config.debounce,
            watcher: watcher.clone(),
            state: Mutex::new(EntryState::default()),
            shutdown: CancellationToken::new(),
            runtime: Handle::current(),
            counters: self.counters.clone(),
        });

        entry.runtime.spawn(reaction_loop(
            Arc::downgrade(&entry),
            watcher,
            raw_rx,
            entry.shutdown.clone(),
            entry.debounce,
        ));

        Ok(entry)
    }

    fn unsubscribe(self: &Arc<Self>, entry: &Arc<WatchEntry>, id: u64) {
        let _entries = self.lock_entries();
        let mut state = entry.lock_state();
        if state.subscribers.remove(&id).is_none() {
            return;
        }
        debug!(
            "subscriber {id} released from {} ({} left)",
            entry.directory.display(),
            state.subscribers.len()
        );

        if state.subscribers.is_empty() && !state.closed {
            self.arm_teardown(entry, &mut state);
        }
    }

    fn arm_teardown(self: &Arc<Self>, entry: &Arc<WatchEntry>, state: &mut EntryState) {
        state.teardown_generation += 1;
        let generation = state.teardown_generation;
        let grace = self.config.grace_period;
        let manager = Arc::downgrade(self);
        let weak_entry = Arc::downgrade(entry);

        let task = entry.runtime.spawn(async move {
            tokio::time::sleep(grace).await;
            if let (Some(manager), Some(entry)) = (manager.upgrade(), weak_entry.upgrade()) {
                manager.expire(&entry, generation);
            }
        });

        state.pending_teardown = Some(PendingTeardown {
            generation,
            task: task.abort_handle(),
        });
        debug!(
            "no subscribers left on {}, tearing down in {grace:?}",
            entry.directory.display()
        );
    }

    /// Grace period elapsed. Tears the entry down unless a subscriber came
    /// back or a newer teardown superseded this one.
    fn expire(&self, entry: &Arc<WatchEntry>, generation: u64) {
        let mut entries = self.lock_entries();
        {
            let mut state = entry.lock_state();
            let current = state
                .pending_teardown
                .as_ref()
                .is_some_and(|pending| pending.generation == generation);
            if !current || !state.subscribers.is_empty() {
                return;
            }
            state.pending_teardown = None;
            state.closed = true;
        }

        if entries
            .get(&entry.directory)
            .is_some_and(|live| Arc::ptr_eq(live, entry))
        {
            entries.remove(&entry.directory);
        }
        entry.close();
    }
}

impl WatchEntry {
    fn lock_state(&self) -> MutexGuard<'_, EntryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Offer one signal to every subscriber. Returns how many took it.
    fn signal_subscribers(&self) -> usize {
        let state = self.lock_state();
        state
            .subscribers
            .values()
            .filter(|tx| tx.try_send(()).is_ok())
            .count()
    }

    /// Stop the reaction loop and release the OS watch, once.
    fn close(&self) {
        self.shutdown.cancel();
        if self.watcher.close() {
            self.counters.watches_released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for WatchEntry {
    fn drop(&mut self) {
        self.close();
    }
}

/// The single loop reacting to raw events for one entry.
///
/// Events are handled strictly in arrival order, so debounce resets never race.
async fn reaction_loop(
    entry: Weak<WatchEntry>,
    watcher: Arc<DirectoryWatcher>,
    mut events: mpsc::UnboundedReceiver<RawEvent>,
    shutdown: CancellationToken,
    debounce: Duration,
) {
    let timer = tokio::time::sleep(debounce);
    tokio::pin!(timer);
    let mut armed = false;

    loop {
        tokio::select! {
            biased;

            () = shutdown.cancelled() => break,

            () = &mut timer, if armed => {
                armed = false;
                let Some(entry) = entry.upgrade() else {
                    break;
                };
                let delivered = entry.signal_subscribers();
                entry.counters.flushes.fetch_add(1, Ordering::SeqCst);
                entry.counters.signals_delivered.fetch_add(delivered, Ordering::SeqCst);
                debug!("change in {}, signalled {delivered} subscribers", entry.directory.display());
            }

            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        error!("watch error in {}: {e}", watcher.root().display());
                        continue;
                    }
                };

                // New directories are registered here, before the next event is looked at.
                let processor = watcher.clone();
                match tokio::task::spawn_blocking(move || processor.process(&event)).await {
                    Ok(true) => {
                        timer.as_mut().reset(Instant::now() + debounce);
                        armed = true;
                    }
                    Ok(false) => {}
                    Err(e) => warn!("event processing failed in {}: {e}", watcher.root().display()),
                }
            }
        }
    }

    debug!("reaction loop for {} stopped", watcher.root().display());
}

/// A live subscription to a directory's change signal.
///
/// Dropping it (or calling [`Subscription::release`]) removes the subscriber
/// from its entry; ownership makes that happen exactly once.
pub struct Subscription {
    id: u64,
    directory: PathBuf,
    signal: mpsc::Receiver<()>,
    entry: Weak<WatchEntry>,
    manager: Weak<ManagerInner>,
}

impl Subscription {
    /// Wait for the next change signal. `None` once the watch is gone.
    pub async fn changed(&mut self) -> Option<()> {
        self.signal.recv().await
    }

    /// Take a pending signal without waiting.
    pub fn try_changed(&mut self) -> bool {
        self.signal.try_recv().is_ok()
    }

    /// The canonical directory this subscription watches.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Leave the entry now.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let (Some(manager), Some(entry)) = (self.manager.upgrade(), self.entry.upgrade()) {
            manager.unsubscribe(&entry, self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("directory", &self.directory)
            .finish_non_exhaustive()
    }
}

fn canonical_dir(directory: &Path) -> Result<PathBuf> {
    let canonical = dunce::canonicalize(directory)
        .map_err(|_| WatcherError::DirectoryNotFound(directory.display().to_string()))?;
    if !canonical.is_dir() {
        return Err(WatcherError::NotADirectory(canonical.display().to_string()));
    }
    Ok(canonical)
}
