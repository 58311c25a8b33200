//! End-to-end tests for live connections over a real directory.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use prview_git::{CommandOutput, CommandRunner};
use prview_live::{
    HubExit, INVALID_REPO, LiveDiffService, LiveError, MessageSink, MessageSource, RefreshHook,
    Result, ServerMessage,
};
use prview_watcher::WatchConfig;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

struct NothingIgnored;

impl CommandRunner for NothingIgnored {
    fn run(&self, _repo: &Path, _args: &[String]) -> prview_git::Result<CommandOutput> {
        Ok(CommandOutput::new(1, ""))
    }
}

/// Forwards sent messages to the test; can be told to fail writes.
struct ChannelSink {
    tx: mpsc::UnboundedSender<ServerMessage>,
    closes: Arc<AtomicUsize>,
    fail_writes: bool,
}

#[async_trait]
impl MessageSink for ChannelSink {
    async fn send(&mut self, message: &ServerMessage) -> Result<()> {
        if self.fail_writes {
            return Err(LiveError::Io(std::io::ErrorKind::BrokenPipe.into()));
        }
        let _ = self.tx.send(message.clone());
        Ok(())
    }

    async fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Client input fed by the test. Dropping the sender is an inbound close.
struct ChannelSource {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn next_message(&mut self) -> Option<Result<String>> {
        self.rx.recv().await.map(Ok)
    }
}

struct Client {
    sent: mpsc::UnboundedReceiver<ServerMessage>,
    input: mpsc::UnboundedSender<String>,
    closes: Arc<AtomicUsize>,
}

fn connection(fail_writes: bool) -> (ChannelSink, ChannelSource, Client) {
    let (tx, sent) = mpsc::unbounded_channel();
    let (input, rx) = mpsc::unbounded_channel();
    let closes = Arc::new(AtomicUsize::new(0));
    let sink = ChannelSink {
        tx,
        closes: closes.clone(),
        fail_writes,
    };
    (sink, ChannelSource { rx }, Client { sent, input, closes })
}

fn service(work_dir: &Path) -> LiveDiffService {
    let config = WatchConfig::new()
        .with_debounce(Duration::from_millis(50))
        .with_grace_period(Duration::from_secs(10));
    LiveDiffService::new(work_dir, config, Arc::new(NothingIgnored))
}

fn work_dir() -> (tempfile::TempDir, PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let root = dunce::canonicalize(temp.path()).unwrap();
    std::fs::create_dir_all(root.join("src")).unwrap();
    (temp, root)
}

async fn wait_until_subscribed(service: &LiveDiffService, dir: &Path) {
    tokio::time::timeout(WAIT, async {
        while service.manager().subscriber_count(dir) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connection never subscribed");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_change_sends_refresh_then_client_stop_releases() {
    let (_temp, root) = work_dir();
    let service = service(&root);
    let (sink, source, mut client) = connection(false);

    let serving = {
        let service = service.clone();
        tokio::spawn(async move {
            service
                .serve(None, sink, source, CancellationToken::new())
                .await
        })
    };
    wait_until_subscribed(&service, &root).await;

    std::fs::write(root.join("src/lib.rs"), "// changed\n").unwrap();
    let message = tokio::time::timeout(WAIT, client.sent.recv()).await.unwrap();
    assert_eq!(message, Some(ServerMessage::Refresh));

    client.input.send("bye".to_string()).unwrap();
    let exit = tokio::time::timeout(WAIT, serving).await.unwrap().unwrap().unwrap();

    assert_eq!(exit, HubExit::ClientClosed);
    assert_eq!(client.closes.load(Ordering::SeqCst), 1);
    assert_eq!(service.manager().subscriber_count(&root), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_inbound_close_stops_connection() {
    let (_temp, root) = work_dir();
    let service = service(&root);
    let (sink, source, client) = connection(false);
    drop(client.input);

    let exit = tokio::time::timeout(
        WAIT,
        service.serve(None, sink, source, CancellationToken::new()),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(exit, HubExit::ClientClosed);
    assert_eq!(client.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_write_failure_stops_connection() {
    let (_temp, root) = work_dir();
    let service = service(&root);
    let (sink, source, client) = connection(true);

    let serving = {
        let service = service.clone();
        tokio::spawn(async move {
            service
                .serve(None, sink, source, CancellationToken::new())
                .await
        })
    };
    wait_until_subscribed(&service, &root).await;

    std::fs::write(root.join("src/lib.rs"), "// changed\n").unwrap();
    let exit = tokio::time::timeout(WAIT, serving).await.unwrap().unwrap().unwrap();

    assert_eq!(exit, HubExit::WriteFailed);
    assert_eq!(client.closes.load(Ordering::SeqCst), 1);
    assert_eq!(service.manager().subscriber_count(&root), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancellation_and_manager_shutdown() {
    let (_temp, root) = work_dir();
    let service = service(&root);

    let (sink, source, first) = connection(false);
    let cancel = CancellationToken::new();
    let cancelled = {
        let service = service.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { service.serve(None, sink, source, cancel).await })
    };

    let (sink, source, second) = connection(false);
    let ended = {
        let service = service.clone();
        tokio::spawn(async move {
            service
                .serve(None, sink, source, CancellationToken::new())
                .await
        })
    };

    tokio::time::timeout(WAIT, async {
        while service.manager().subscriber_count(&root) < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(service.manager().stats().watches_allocated, 1);

    cancel.cancel();
    let exit = tokio::time::timeout(WAIT, cancelled).await.unwrap().unwrap().unwrap();
    assert_eq!(exit, HubExit::Cancelled);
    assert_eq!(first.closes.load(Ordering::SeqCst), 1);

    service.manager().shutdown();
    let exit = tokio::time::timeout(WAIT, ended).await.unwrap().unwrap().unwrap();
    assert_eq!(exit, HubExit::WatchEnded);
    assert_eq!(second.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_invalid_repo_is_reported() {
    let (_temp, root) = work_dir();
    let service = service(&root);
    let (sink, source, mut client) = connection(false);

    let err = service
        .serve(Some("../outside"), sink, source, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, LiveError::InvalidRepo(_)));
    assert_eq!(
        client.sent.recv().await,
        Some(ServerMessage::error(INVALID_REPO))
    );
    assert_eq!(client.closes.load(Ordering::SeqCst), 1);
    assert_eq!(service.manager().stats().watches_allocated, 0);
}

#[derive(Default)]
struct CountingHook {
    seen: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl RefreshHook for CountingHook {
    async fn before_refresh(&self, directory: &Path) {
        self.seen.lock().unwrap().push(directory.to_path_buf());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_refresh_hook_runs_before_notice() {
    let (_temp, root) = work_dir();
    let hook = Arc::new(CountingHook::default());
    let service = service(&root).with_on_refresh(hook.clone());
    let (sink, source, mut client) = connection(false);

    let cancel = CancellationToken::new();
    let serving = {
        let service = service.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { service.serve(None, sink, source, cancel).await })
    };
    wait_until_subscribed(&service, &root).await;

    std::fs::write(root.join("src/main.rs"), "fn main() {}\n").unwrap();
    let message = tokio::time::timeout(WAIT, client.sent.recv()).await.unwrap();
    assert_eq!(message, Some(ServerMessage::Refresh));
    let seen = hook.seen.lock().unwrap().clone();
    assert!(!seen.is_empty());
    assert!(seen.iter().all(|dir| *dir == root));

    cancel.cancel();
    tokio::time::timeout(WAIT, serving).await.unwrap().unwrap().unwrap();
}
