//! Locking for concurrent access protection.
//!
//! Two layers: a build lock file that keeps separate processes off the same
//! build root, and in-process per-path locks that serialize every
//! load-classify-apply-commit sequence on a single record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

/// Lock expiry duration in seconds.
pub const LOCK_EXPIRY_SECS: i64 = 3600; // 1 hour

/// Interval at which a running build renews its lock.
pub const LOCK_RENEW_SECS: u64 = LOCK_EXPIRY_SECS.unsigned_abs() / 4;

/// Information about a build lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Unique lock identifier.
    pub lock_id: String,
    /// Who holds the lock.
    pub holder: String,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lock expires.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Creates a new lock info.
    #[must_use]
    pub fn new(holder: &str) -> Self {
        let now = Utc::now();
        Self {
            lock_id: Uuid::new_v4().to_string(),
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now + chrono::Duration::seconds(LOCK_EXPIRY_SECS),
        }
    }

    /// Checks if the lock has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Extends the expiry time.
    pub fn refresh(&mut self) {
        self.expires_at = Utc::now() + chrono::Duration::seconds(LOCK_EXPIRY_SECS);
    }

    /// Returns the remaining time until expiry in seconds.
    #[must_use]
    pub fn remaining_secs(&self) -> i64 {
        let remaining = self.expires_at - Utc::now();
        remaining.num_seconds().max(0)
    }
}

/// Generates a unique holder identifier for the current process.
#[must_use]
pub fn generate_holder_id() -> String {
    let hostname = hostname::get()
        .map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().to_string());

    let pid = std::process::id();
    let uuid = &Uuid::new_v4().to_string()[..8];

    format!("{hostname}-{pid}-{uuid}")
}

/// Per-path async locks.
///
/// Holding the guard for a path grants exclusive ownership of that record
/// for the whole read-decide-write sequence.
#[derive(Debug, Default)]
pub struct PathLocks {
    inner: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl PathLocks {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive ownership of `path`.
    pub async fn lock(&self, path: &Path) -> PathGuard<'_> {
        let mutex = {
            let mut table = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(table.entry(path.to_path_buf()).or_default())
        };
        PathGuard {
            locks: self,
            path: path.to_path_buf(),
            guard: Some(mutex.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Exclusive ownership of one path, released on drop.
#[derive(Debug)]
pub struct PathGuard<'a> {
    locks: &'a PathLocks,
    path: PathBuf,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PathGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());

        // Only the table's own handle left: nobody holds or awaits the path.
        let mut table = self.locks.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if table
            .get(&self.path)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
        {
            table.remove(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_lock_creation() {
        let lock = LockInfo::new("test-holder");
        assert_eq!(lock.holder, "test-holder");
        assert!(!lock.is_expired());
        assert!(lock.remaining_secs() > 0);
    }

    #[test]
    fn test_lock_refresh() {
        let mut lock = LockInfo::new("test-holder");
        lock.expires_at = Utc::now() + chrono::Duration::seconds(5);

        lock.refresh();

        assert!(lock.remaining_secs() > LOCK_EXPIRY_SECS - 60);
    }

    #[test]
    fn test_holder_id_generation() {
        let id1 = generate_holder_id();
        let id2 = generate_holder_id();

        // IDs should be unique
        assert_ne!(id1, id2);

        // IDs should contain the process ID
        let pid = std::process::id().to_string();
        assert!(id1.contains(&pid));
    }

    #[tokio::test]
    async fn test_path_lock_is_exclusive() {
        let locks = Arc::new(PathLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let inside = Arc::clone(&inside);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock(Path::new("/build/.host.revision")).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.expect("task completes");
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(locks.tracked(), 0);
    }

    #[tokio::test]
    async fn test_released_paths_leave_the_table() {
        let locks = PathLocks::new();
        let first = locks.lock(Path::new("/build/a")).await;
        let waiter = locks.lock(Path::new("/build/a"));
        tokio::pin!(waiter);
        assert!(
            tokio::time::timeout(Duration::from_millis(20), &mut waiter)
                .await
                .is_err()
        );

        // A waiter still references the entry.
        drop(first);
        assert_eq!(locks.tracked(), 1);

        let second = waiter.await;
        drop(second);
        assert_eq!(locks.tracked(), 0);

        for i in 0..16 {
            let _guard = locks.lock(&PathBuf::from(format!("/build/n{i}"))).await;
        }
        assert_eq!(locks.tracked(), 0);
    }

    #[tokio::test]
    async fn test_distinct_paths_do_not_block() {
        let locks = PathLocks::new();
        let _a = locks.lock(Path::new("/build/a")).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock(Path::new("/build/b")))
            .await;
        assert!(b.is_ok());
    }
}
