use std::path::PathBuf;

use ripple_proto::ChangeKind;

/// File system change event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    /// Absolute path under the sync root
    pub path: PathBuf,
    pub kind: FileEventKind,
}

/// Type of file system change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    Created,
    Modified,
    Deleted,
    /// Renamed away from `path`; the destination is reported as `Created`
    Moved,
}

impl FileEvent {
    pub fn new(path: impl Into<PathBuf>, kind: FileEventKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

impl From<FileEventKind> for ChangeKind {
    fn from(kind: FileEventKind) -> Self {
        match kind {
            FileEventKind::Created => ChangeKind::Create,
            FileEventKind::Modified => ChangeKind::Modify,
            FileEventKind::Deleted => ChangeKind::Delete,
            FileEventKind::Moved => ChangeKind::Move,
        }
    }
}
