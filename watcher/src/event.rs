//! Classification of raw notify events.

use notify::event::{ModifyKind, RenameMode};

/// Kind of file event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    /// File or directory was created.
    Created,

    /// File contents changed.
    Modified,

    /// File or directory was deleted.
    Deleted,

    /// Renamed (old path).
    RenamedFrom,

    /// Renamed (new path).
    RenamedTo,

    /// Renamed, with both paths in one event (old first).
    Renamed,

    /// Metadata changed.
    MetadataChanged,

    /// Opened, read or closed. Never a change by itself.
    Accessed,

    /// Unknown event type.
    Unknown,
}

impl FileEventKind {
    /// Whether this kind should restart the debounce timer.
    pub fn is_change(self) -> bool {
        !matches!(self, Self::Accessed)
    }
}

impl From<notify::EventKind> for FileEventKind {
    fn from(kind: notify::EventKind) -> Self {
        match kind {
            notify::EventKind::Create(_) => Self::Created,
            notify::EventKind::Modify(modify_kind) => match modify_kind {
                ModifyKind::Name(RenameMode::From) => Self::RenamedFrom,
                ModifyKind::Name(RenameMode::To) => Self::RenamedTo,
                ModifyKind::Name(RenameMode::Both) => Self::Renamed,
                ModifyKind::Metadata(_) => Self::MetadataChanged,
                _ => Self::Modified,
            },
            notify::EventKind::Remove(_) => Self::Deleted,
            notify::EventKind::Access(_) => Self::Accessed,
            _ => Self::Unknown,
        }
    }
}
