//! Revision store trait definition.
//!
//! This module defines the common interface for revision storage backends.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::lock::LockInfo;
use super::types::RevisionRecord;
use crate::error::Result;
use crate::topology::NodeKind;

/// Trait for revision storage backends.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RevisionStore: Send + Sync {
    /// Returns the storage location of a node's record.
    ///
    /// The mapping is deterministic: the same id and kind always yield the
    /// same path, and distinct nodes never share one.
    fn path_for(&self, id: &str, kind: NodeKind) -> PathBuf;

    /// Loads the record stored at `path`.
    ///
    /// Returns `None` if no record exists yet.
    async fn load(&self, path: &Path) -> Result<Option<RevisionRecord>>;

    /// Saves a record atomically.
    async fn save(&self, record: &RevisionRecord, path: &Path) -> Result<()>;

    /// Removes the record stored at `path`.
    async fn remove(&self, path: &Path) -> Result<()>;

    /// Lists every record in the store.
    async fn scan(&self) -> Result<Vec<RevisionRecord>>;

    /// Acquires the build lock.
    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo>;

    /// Releases the build lock.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Extends the expiry of a held build lock.
    ///
    /// Fails with `LockContention` if the lock is no longer held under
    /// `lock_id`.
    async fn refresh_lock(&self, lock_id: &str) -> Result<LockInfo>;

    /// Gets current lock information if locked.
    async fn get_lock_info(&self) -> Result<Option<LockInfo>>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}
