//! # Watcher
//!
//! Shared change notification for working trees. Many subscribers can watch
//! the same directory; they share one OS watch, and bursts of filesystem
//! events are coalesced into a single debounced "something changed" signal.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         WatchManager                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  directory ──► WatchEntry ──► reaction loop ──► debounce timer  │
//! │                    │               │                  │         │
//! │                    ▼               ▼                  ▼         │
//! │           DirectoryWatcher    IgnorePolicy     Subscription × N │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! When the last subscriber of a directory leaves, the entry lingers for a
//! grace period so a quick reconnect reuses the same OS watch.

pub mod config;
pub mod directory;
pub mod error;
pub mod event;
pub mod ignore;
pub mod manager;

pub use config::WatchConfig;
pub use directory::DirectoryWatcher;
pub use error::{Result, WatcherError};
pub use event::FileEventKind;
pub use ignore::IgnorePolicy;
pub use manager::{Subscription, WatchManager, WatchManagerStats};
