//! Decides what a remote change means for local state
//!
//! Create and modify always pull the announced content. Delete and move are
//! arbitrated last-write-wins against the local file's modification time;
//! clocks across nodes are trusted as-is.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ripple_proto::{local_path, Change, ChangeKind};
use tracing::{info, warn};

use crate::errors::Result;
use crate::locks::LockRegistry;
use crate::requester::{TransferOutcome, TransferRequester};

/// What the resolver did with one change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Fetched(TransferOutcome),
    Deleted,
    /// Nothing at the path to remove
    AlreadyAbsent,
    /// Local file was modified after the remote delete
    KeptNewerLocal { local_modified: DateTime<Utc> },
    /// Directories are not removed by remote file deletes
    KeptDirectory,
    /// Removal failed; logged and tolerated
    DeleteFailed(String),
}

pub struct ConflictResolver {
    root: PathBuf,
    locks: LockRegistry,
    requester: Arc<TransferRequester>,
}

impl ConflictResolver {
    pub fn new(
        root: impl Into<PathBuf>,
        locks: LockRegistry,
        requester: Arc<TransferRequester>,
    ) -> Self {
        Self {
            root: root.into(),
            locks,
            requester,
        }
    }

    pub async fn resolve(&self, change: &Change) -> Result<Resolution> {
        match change.kind {
            ChangeKind::Create | ChangeKind::Modify => {
                let outcome = self
                    .requester
                    .request_file(&change.path, &change.checksum)
                    .await?;
                Ok(Resolution::Fetched(outcome))
            }
            ChangeKind::Delete | ChangeKind::Move => self.remove(change).await,
        }
    }

    async fn remove(&self, change: &Change) -> Result<Resolution> {
        let path = local_path(&self.root, &change.path)?;

        // Our own unlink would otherwise be announced back as a delete
        let lock = self.locks.acquire(&change.path).await;

        let resolution = match tokio::fs::metadata(&path).await {
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("{} of {} already absent locally", change.kind, change.path);
                Resolution::AlreadyAbsent
            }
            Err(e) => {
                warn!("Cannot stat {}: {}", change.path, e);
                Resolution::DeleteFailed(e.to_string())
            }
            Ok(meta) if meta.is_dir() => {
                info!("Keeping directory {} despite remote {}", change.path, change.kind);
                Resolution::KeptDirectory
            }
            Ok(meta) => {
                let local_modified = meta.modified().map(DateTime::<Utc>::from);
                match local_modified {
                    Ok(local_modified) if local_modified > change.mod_date => {
                        info!(
                            "Keeping {}: local edit at {} is newer than remote {} at {}",
                            change.path, local_modified, change.kind, change.mod_date
                        );
                        Resolution::KeptNewerLocal { local_modified }
                    }
                    _ => match tokio::fs::remove_file(&path).await {
                        Ok(()) => {
                            info!("Removed {} after remote {}", change.path, change.kind);
                            Resolution::Deleted
                        }
                        Err(e) => {
                            warn!("Failed to remove {}: {}", change.path, e);
                            Resolution::DeleteFailed(e.to_string())
                        }
                    },
                }
            }
        };

        if resolution == Resolution::Deleted {
            self.linger().await;
        }
        drop(lock);
        Ok(resolution)
    }

    async fn linger(&self) {
        let linger: Duration = self.requester.config().lock_linger;
        if !linger.is_zero() {
            tokio::time::sleep(linger).await;
        }
    }
}
