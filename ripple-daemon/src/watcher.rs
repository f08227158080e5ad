use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use ripple_sync::{FileEvent, FileEventKind};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Watches a sync root and forwards file events to a channel.
///
/// Dropping the watcher stops it and closes the channel.
pub struct FileWatcher {
    path: PathBuf,
    watcher: Option<RecommendedWatcher>,
}

impl FileWatcher {
    /// Create new file watcher for a directory
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            watcher: None,
        }
    }

    /// Get the path being watched
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_running(&self) -> bool {
        self.watcher.is_some()
    }

    /// Start watching, sending converted events into `events`
    pub fn start(&mut self, events: mpsc::Sender<FileEvent>) -> Result<()> {
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for file_event in convert_notify_event(event) {
                    // Runs on the notify thread, outside the runtime
                    if events.blocking_send(file_event).is_err() {
                        debug!("Event receiver gone, dropping file event");
                    }
                }
            }
            Err(e) => error!("File watcher error: {}", e),
        })
        .context("Failed to create file watcher")?;

        watcher
            .watch(&self.path, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {}", self.path.display()))?;
        info!("Started watching directory: {}", self.path.display());

        self.watcher = Some(watcher);
        Ok(())
    }

    pub fn stop(&mut self) {
        if self.watcher.take().is_some() {
            info!("Stopped watching directory: {}", self.path.display());
        }
    }
}

/// Hidden files and editor temporaries never sync
fn should_ignore(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return true;
    };

    name.starts_with('.')
        || name.ends_with('~')
        || name.ends_with(".tmp")
        || name.ends_with(".swp")
        || (name.starts_with('#') && name.ends_with('#'))
}

/// Convert notify event to our file event format
pub fn convert_notify_event(event: Event) -> Vec<FileEvent> {
    let kinds: Vec<Option<FileEventKind>> = match event.kind {
        EventKind::Create(CreateKind::Folder) => return Vec::new(),
        EventKind::Create(_) => vec![Some(FileEventKind::Created)],

        EventKind::Modify(ModifyKind::Metadata(_)) => return Vec::new(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => vec![Some(FileEventKind::Moved)],
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => vec![Some(FileEventKind::Created)],
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            vec![Some(FileEventKind::Moved), Some(FileEventKind::Created)]
        }
        // Platform could not tell which end of the rename this is
        EventKind::Modify(ModifyKind::Name(_)) => vec![None],
        EventKind::Modify(_) => vec![Some(FileEventKind::Modified)],

        EventKind::Remove(RemoveKind::Folder) => return Vec::new(),
        EventKind::Remove(_) => vec![Some(FileEventKind::Deleted)],

        _ => return Vec::new(),
    };

    let mut file_events = Vec::new();
    for (index, path) in event.paths.into_iter().enumerate() {
        if should_ignore(&path) {
            continue;
        }

        let kind = kinds
            .get(index)
            .or_else(|| kinds.last())
            .copied()
            .flatten()
            .unwrap_or_else(|| {
                if path.exists() {
                    FileEventKind::Created
                } else {
                    FileEventKind::Moved
                }
            });

        let carries_content = matches!(kind, FileEventKind::Created | FileEventKind::Modified);
        if carries_content && path.is_dir() {
            continue;
        }

        file_events.push(FileEvent::new(path, kind));
    }

    file_events
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, DataChange, MetadataKind};
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::timeout;

    fn event<P: AsRef<Path>>(kind: EventKind, paths: &[P]) -> Event {
        paths.iter().fold(Event::new(kind), |event, path| {
            event.add_path(path.as_ref().to_path_buf())
        })
    }

    #[test]
    fn test_create_and_modify() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, b"x").unwrap();

        let created = convert_notify_event(event(EventKind::Create(CreateKind::File), &[&file]));
        assert_eq!(created, vec![FileEvent::new(&file, FileEventKind::Created)]);

        let modified = convert_notify_event(event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &[&file],
        ));
        assert_eq!(modified, vec![FileEvent::new(&file, FileEventKind::Modified)]);
    }

    #[test]
    fn test_rename_halves() {
        let dir = TempDir::new().unwrap();
        let from = dir.path().join("old.txt");
        let to = dir.path().join("new.txt");
        fs::write(&to, b"x").unwrap();

        let both = convert_notify_event(event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &[&from, &to],
        ));
        assert_eq!(
            both,
            vec![
                FileEvent::new(&from, FileEventKind::Moved),
                FileEvent::new(&to, FileEventKind::Created),
            ]
        );

        let away = convert_notify_event(event(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            &[&from],
        ));
        assert_eq!(away, vec![FileEvent::new(&from, FileEventKind::Moved)]);

        // Ambiguous rename resolved by whether the path still exists
        let ambiguous = convert_notify_event(event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Any)),
            &[&from, &to],
        ));
        assert_eq!(
            ambiguous,
            vec![
                FileEvent::new(&from, FileEventKind::Moved),
                FileEvent::new(&to, FileEventKind::Created),
            ]
        );
    }

    #[test]
    fn test_ignored_events() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, b"x").unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();

        let cases = [
            event(EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)), &[&file]),
            event(EventKind::Access(AccessKind::Read), &[&file]),
            event(EventKind::Create(CreateKind::Folder), &[&sub]),
            event(EventKind::Modify(ModifyKind::Any), &[&sub]),
            event(EventKind::Remove(RemoveKind::Folder), &[&sub]),
            event(EventKind::Create(CreateKind::File), &[&dir.path().join(".hidden")]),
            event(EventKind::Create(CreateKind::File), &[&dir.path().join("a.txt.swp")]),
            event(EventKind::Create(CreateKind::File), &[&dir.path().join("draft~")]),
            event(EventKind::Create(CreateKind::File), &[&dir.path().join("#scratch#")]),
        ];
        for case in cases {
            assert!(convert_notify_event(case.clone()).is_empty(), "{:?}", case);
        }
    }

    #[test]
    fn test_remove_of_vanished_file() {
        let file = PathBuf::from("/nowhere/gone.txt");
        let removed = convert_notify_event(event(EventKind::Remove(RemoveKind::File), &[&file]));
        assert_eq!(removed, vec![FileEvent::new(&file, FileEventKind::Deleted)]);
    }

    #[tokio::test]
    async fn test_file_watcher() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();

        let mut watcher = FileWatcher::new(root.clone());
        let (tx, mut rx) = mpsc::channel(64);
        watcher.start(tx).unwrap();
        assert!(watcher.is_running());

        // Give watcher time to start
        tokio::time::sleep(Duration::from_millis(100)).await;

        let test_file = root.join("test.txt");
        fs::write(&test_file, b"hello world").unwrap();

        let event = timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.path, test_file);

        watcher.stop();
        assert!(!watcher.is_running());
    }
}
