//! The transport seam: where messages go out and where client input comes in.
//!
//! A transport supplies one [`MessageSink`] and one [`MessageSource`] per
//! connection. Only the hub's writer touches the sink, so implementations
//! never see concurrent writes.

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tracing::debug;

use crate::error::{LiveError, Result};
use crate::protocol::ServerMessage;

/// Outbound half of a connection.
#[async_trait]
pub trait MessageSink: Send {
    /// Write one message.
    async fn send(&mut self, message: &ServerMessage) -> Result<()>;

    /// Close the connection. Closing twice is a no-op.
    async fn close(&mut self);
}

/// Inbound half of a connection.
#[async_trait]
pub trait MessageSource: Send + 'static {
    /// Next raw client message. `None` once the client has closed.
    async fn next_message(&mut self) -> Option<Result<String>>;
}

/// Writes each message as one line of JSON.
#[derive(Debug)]
pub struct JsonLinesSink<W> {
    writer: W,
    closed: bool,
}

impl<W> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            closed: false,
        }
    }

    /// Whether [`MessageSink::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W> MessageSink for JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, message: &ServerMessage) -> Result<()> {
        if self.closed {
            return Err(LiveError::Closed);
        }
        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.writer.shutdown().await {
            debug!("closing connection writer failed: {e}");
        }
    }
}

/// Reads client input one line at a time.
#[derive(Debug)]
pub struct LinesSource<R> {
    lines: Lines<R>,
}

impl<R: AsyncBufRead> LinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }
}

#[async_trait]
impl<R> MessageSource for LinesSource<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    async fn next_message(&mut self) -> Option<Result<String>> {
        match self.lines.next_line().await {
            Ok(Some(line)) => Some(Ok(line)),
            Ok(None) => None,
            Err(e) => Some(Err(e.into())),
        }
    }
}
