//! Per-path transfer locks
//!
//! A locked path has an inbound transfer writing to it. The announcer checks
//! the registry before publishing, so the watcher events caused by our own
//! writes are never sent back out to peers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::debug;

#[derive(Debug)]
struct LockEntry {
    generation: u64,
    // Dropping the sender wakes every waiter
    _released: watch::Sender<()>,
    waiters: watch::Receiver<()>,
}

#[derive(Debug, Default)]
struct LockTable {
    next_generation: u64,
    entries: HashMap<String, LockEntry>,
}

/// Map from relative path to in-flight transfer marker.
///
/// Cheap to clone; clones share the same table. Each node owns one.
#[derive(Debug, Clone, Default)]
pub struct LockRegistry {
    table: Arc<Mutex<LockTable>>,
}

/// Result of [`LockRegistry::try_acquire`]
#[derive(Debug)]
pub enum LockToken {
    /// The caller now holds the path
    Acquired(PathLock),
    /// Someone else holds it; wait for them to finish
    Pending(PendingLock),
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, LockTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn try_acquire(&self, path: &str) -> LockToken {
        let mut table = self.table();

        if let Some(entry) = table.entries.get(path) {
            debug!("{} is already locked", path);
            return LockToken::Pending(PendingLock {
                path: path.to_string(),
                released: entry.waiters.clone(),
            });
        }

        table.next_generation += 1;
        let generation = table.next_generation;
        let (sender, receiver) = watch::channel(());
        table.entries.insert(
            path.to_string(),
            LockEntry {
                generation,
                _released: sender,
                waiters: receiver,
            },
        );

        LockToken::Acquired(PathLock {
            registry: self.clone(),
            path: path.to_string(),
            generation,
        })
    }

    /// Wait until the path is free, then take it
    pub async fn acquire(&self, path: &str) -> PathLock {
        loop {
            match self.try_acquire(path) {
                LockToken::Acquired(lock) => return lock,
                LockToken::Pending(pending) => pending.wait().await,
            }
        }
    }

    pub fn is_locked(&self, path: &str) -> bool {
        self.table().entries.contains_key(path)
    }

    /// Remove the lock on `path`, waking waiters. No-op if unlocked.
    pub fn release(&self, path: &str) {
        if self.table().entries.remove(path).is_some() {
            debug!("Released lock on {}", path);
        }
    }

    /// Number of paths currently locked
    pub fn active_count(&self) -> usize {
        self.table().entries.len()
    }

    fn release_generation(&self, path: &str, generation: u64) {
        let mut table = self.table();
        let current = table
            .entries
            .get(path)
            .is_some_and(|entry| entry.generation == generation);
        if current {
            table.entries.remove(path);
            debug!("Released lock on {}", path);
        }
    }
}

/// Held lock on one path; released on drop.
#[derive(Debug)]
pub struct PathLock {
    registry: LockRegistry,
    path: String,
    generation: u64,
}

impl PathLock {
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for PathLock {
    fn drop(&mut self) {
        self.registry.release_generation(&self.path, self.generation);
    }
}

/// Handle on someone else's lock
#[derive(Debug)]
pub struct PendingLock {
    path: String,
    released: watch::Receiver<()>,
}

impl PendingLock {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Resolves once the holder releases the path
    pub async fn wait(mut self) {
        while self.released.changed().await.is_ok() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn test_acquire_and_release() {
        let locks = LockRegistry::new();
        assert!(!locks.is_locked("a.txt"));

        let token = locks.try_acquire("a.txt");
        assert!(matches!(token, LockToken::Acquired(_)));
        assert!(locks.is_locked("a.txt"));
        assert!(!locks.is_locked("b.txt"));

        drop(token);
        assert!(!locks.is_locked("a.txt"));
    }

    #[test]
    fn test_second_acquire_is_pending() {
        let locks = LockRegistry::new();
        let _held = locks.try_acquire("a.txt");
        assert!(matches!(locks.try_acquire("a.txt"), LockToken::Pending(_)));
        assert_eq!(locks.active_count(), 1);
    }

    #[test]
    fn test_release_is_idempotent() {
        let locks = LockRegistry::new();
        let _held = locks.try_acquire("a.txt");
        locks.release("a.txt");
        locks.release("a.txt");
        locks.release("never-locked.txt");
        assert!(!locks.is_locked("a.txt"));
    }

    #[test]
    fn test_stale_guard_does_not_release_new_holder() {
        let locks = LockRegistry::new();
        let LockToken::Acquired(first) = locks.try_acquire("a.txt") else {
            panic!("expected lock");
        };

        locks.release("a.txt");
        let _second = locks.try_acquire("a.txt");

        drop(first);
        assert!(locks.is_locked("a.txt"));
    }

    #[test]
    fn test_registries_are_independent() {
        let node_a = LockRegistry::new();
        let node_b = LockRegistry::new();
        let _held = node_a.try_acquire("a.txt");
        assert!(!node_b.is_locked("a.txt"));
    }

    #[tokio::test]
    async fn test_pending_wakes_on_release() {
        let locks = LockRegistry::new();
        let LockToken::Acquired(held) = locks.try_acquire("a.txt") else {
            panic!("expected lock");
        };
        let LockToken::Pending(pending) = locks.try_acquire("a.txt") else {
            panic!("expected pending");
        };

        let waiter = tokio::spawn(pending.wait());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_acquire_waits_for_holder() {
        let locks = LockRegistry::new();
        let held = locks.acquire("a.txt").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire("a.txt").await.path().to_string() })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());
        drop(held);

        let path = timeout(Duration::from_secs(1), contender).await.unwrap().unwrap();
        assert_eq!(path, "a.txt");
    }
}
