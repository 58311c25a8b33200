//! # Live
//!
//! Pushes "refresh" notices to connected clients whenever a watched
//! repository changes, and answers diff requests for the same repositories.
//!
//! ```text
//! WatchManager ──signal──► NotificationHub writer ──refresh──► MessageSink
//!                                   ▲
//!                 stop ─────────────┘◄── reader task ◄── MessageSource
//! ```
//!
//! Transports (a websocket server, the stdio CLI) plug in through
//! [`MessageSink`] and [`MessageSource`] and call [`LiveDiffService`].

pub mod connection;
pub mod error;
pub mod hub;
pub mod protocol;
pub mod service;

pub use connection::{JsonLinesSink, LinesSource, MessageSink, MessageSource};
pub use error::{LiveError, Result};
pub use hub::{HubExit, NotificationHub, RefreshHook};
pub use protocol::{INVALID_REPO, ServerMessage, WATCHER_FAILED};
pub use service::LiveDiffService;
