//! Serving one live connection.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use prview_watcher::WatchManager;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, warn};

use crate::connection::{MessageSink, MessageSource};
use crate::error::Result;
use crate::protocol::{ServerMessage, WATCHER_FAILED};

/// Why [`NotificationHub::serve`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubExit {
    /// The client sent something, closed, or its read failed.
    ClientClosed,

    /// The owner cancelled the connection.
    Cancelled,

    /// Writing a refresh notice failed.
    WriteFailed,

    /// The watch went away underneath the connection (manager shut down).
    WatchEnded,
}

/// Runs before each refresh notice is written.
#[async_trait]
pub trait RefreshHook: Send + Sync {
    async fn before_refresh(&self, directory: &Path);
}

/// Turns change signals for a directory into refresh notices on a connection.
#[derive(Clone)]
pub struct NotificationHub {
    manager: WatchManager,
    on_refresh: Option<Arc<dyn RefreshHook>>,
}

impl NotificationHub {
    pub fn new(manager: WatchManager) -> Self {
        Self {
            manager,
            on_refresh: None,
        }
    }

    /// Run `hook` before every refresh notice.
    pub fn with_on_refresh(mut self, hook: Arc<dyn RefreshHook>) -> Self {
        self.on_refresh = Some(hook);
        self
    }

    pub fn manager(&self) -> &WatchManager {
        &self.manager
    }

    /// Serve one connection until the client goes away, `cancel` fires, or a
    /// write fails.
    ///
    /// Only this task writes to `sink`; `source` is drained by a separate
    /// reader task. If the watch cannot be set up the client gets an error
    /// message, the connection is closed and the setup error is returned.
    pub async fn serve<S, R>(
        &self,
        directory: &Path,
        mut sink: S,
        source: R,
        cancel: CancellationToken,
    ) -> Result<HubExit>
    where
        S: MessageSink,
        R: MessageSource,
    {
        let mut subscription = match self.manager.subscribe(directory).await {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!("cannot watch {}: {e}", directory.display());
                if let Err(send_err) = sink.send(&ServerMessage::error(WATCHER_FAILED)).await {
                    debug!("could not report watch failure: {send_err}");
                }
                sink.close().await;
                return Err(e.into());
            }
        };

        let (stop_tx, mut stop_rx) = oneshot::channel();
        // Aborted on drop, so dropping this future mid-loop stops the reader too.
        let reader = AbortOnDropHandle::new(tokio::spawn(wait_for_client_stop(source, stop_tx)));
        info!("live connection opened for {}", subscription.directory().display());

        let exit = loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => break HubExit::Cancelled,

                _ = &mut stop_rx => break HubExit::ClientClosed,

                signal = subscription.changed() => {
                    if signal.is_none() {
                        break HubExit::WatchEnded;
                    }
                    if let Some(hook) = &self.on_refresh {
                        hook.before_refresh(subscription.directory()).await;
                    }
                    if let Err(e) = sink.send(&ServerMessage::Refresh).await {
                        debug!("refresh write failed: {e}");
                        break HubExit::WriteFailed;
                    }
                }
            }
        };

        drop(reader);
        info!(
            "live connection for {} closed: {exit:?}",
            subscription.directory().display()
        );
        subscription.release();
        sink.close().await;
        Ok(exit)
    }
}

impl std::fmt::Debug for NotificationHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationHub")
            .field("manager", &self.manager)
            .field("on_refresh", &self.on_refresh.is_some())
            .finish()
    }
}

/// Any client message, a read error, or end of input all mean stop.
async fn wait_for_client_stop<R: MessageSource>(mut source: R, stop: oneshot::Sender<()>) {
    match source.next_message().await {
        Some(Ok(message)) => debug!("client sent {} bytes, stopping", message.len()),
        Some(Err(e)) => debug!("client read failed: {e}"),
        None => debug!("client closed"),
    }
    let _ = stop.send(());
}
