//! Local file-based revision storage backend.
//!
//! Every node's record is a small hidden JSON file under the build root.
//! Container kinds get a directory named after their id; leaf kinds share
//! their parent's directory and carry their leaf name in the file name.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{ForgeError, Result, RevisionError};
use crate::topology::NodeKind;

use super::lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
use super::store::RevisionStore;
use super::types::RevisionRecord;

/// Revision file extension.
pub const RECORD_EXTENSION: &str = "revision";

/// Build lock file name.
const LOCK_FILE: &str = ".build.lock";

/// Local file-based revision store.
#[derive(Debug, Clone)]
pub struct LocalRevisionStore {
    /// Build root holding every record.
    root: PathBuf,
    /// Path to the lock file.
    lock_path: PathBuf,
}

impl LocalRevisionStore {
    /// Creates a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let lock_path = root.join(LOCK_FILE);
        Self { root, lock_path }
    }

    /// Returns the build root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ensures a directory exists.
    async fn ensure_dir(dir: &Path) -> Result<()> {
        if !dir.exists() {
            debug!("Creating revision directory: {}", dir.display());
            fs::create_dir_all(dir)
                .await
                .map_err(|e| RevisionError::io(dir, format!("Failed to create directory: {e}")))?;
        }
        Ok(())
    }

    /// Removes empty directories from `dir` up to, not including, the root.
    async fn prune_empty_dirs(&self, dir: Option<&Path>) {
        let mut current = dir.map(Path::to_path_buf);
        while let Some(dir) = current {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            // Fails on non-empty directories, which ends the walk.
            if fs::remove_dir(&dir).await.is_err() {
                break;
            }
            debug!("Pruned empty directory: {}", dir.display());
            current = dir.parent().map(Path::to_path_buf);
        }
    }

    /// Reads the lock file if it exists.
    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        if !self.lock_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.lock_path).await.map_err(|e| {
            RevisionError::io(&self.lock_path, format!("Failed to read lock file: {e}"))
        })?;

        let lock_info: LockInfo = serde_json::from_str(&content).map_err(|e| {
            RevisionError::corrupt(&self.lock_path, format!("Failed to parse lock file: {e}"))
        })?;

        Ok(Some(lock_info))
    }

    /// Creates the lock file, failing if another process created it first.
    async fn create_lock_file(&self, lock_info: &LockInfo) -> Result<bool> {
        Self::ensure_dir(&self.root).await?;

        let content = serde_json::to_string_pretty(lock_info).map_err(|e| {
            RevisionError::serialization(format!("Failed to serialize lock: {e}"))
        })?;

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => {
                return Err(RevisionError::io(
                    &self.lock_path,
                    format!("Failed to create lock file: {e}"),
                )
                .into());
            }
        };

        file.write_all(content.as_bytes()).await.map_err(|e| {
            RevisionError::io(&self.lock_path, format!("Failed to write lock file: {e}"))
        })?;

        file.sync_all().await.map_err(|e| {
            RevisionError::io(&self.lock_path, format!("Failed to sync lock file: {e}"))
        })?;

        Ok(true)
    }

    /// Deletes the lock file.
    async fn delete_lock_file(&self) -> Result<()> {
        if self.lock_path.exists() {
            fs::remove_file(&self.lock_path).await.map_err(|e| {
                RevisionError::io(&self.lock_path, format!("Failed to delete lock file: {e}"))
            })?;
        }
        Ok(())
    }

    /// Overwrites the lock file of a held lock.
    async fn write_lock_file(&self, lock_info: &LockInfo) -> Result<()> {
        let content = serde_json::to_string_pretty(lock_info).map_err(|e| {
            RevisionError::serialization(format!("Failed to serialize lock: {e}"))
        })?;

        let temp_path = self.lock_path.with_extension("lock.tmp");
        fs::write(&temp_path, content.as_bytes()).await.map_err(|e| {
            RevisionError::io(&temp_path, format!("Failed to write lock file: {e}"))
        })?;
        fs::rename(&temp_path, &self.lock_path).await.map_err(|e| {
            RevisionError::io(&self.lock_path, format!("Failed to rename lock file: {e}"))
        })?;
        Ok(())
    }

    /// Lists record files under the root.
    fn record_paths(root: &Path) -> Vec<PathBuf> {
        WalkDir::new(root)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unreadable build root entry: {e}");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(walkdir::DirEntry::into_path)
            .filter(|path| {
                path.extension().is_some_and(|ext| ext == RECORD_EXTENSION)
                    && path
                        .file_name()
                        .is_some_and(|name| name.to_string_lossy().starts_with('.'))
            })
            .collect()
    }
}

/// Splits an id into its directory part and its last segment.
fn split_id(id: &str) -> (&str, &str) {
    id.rsplit_once('/').unwrap_or(("", id))
}

#[async_trait]
impl RevisionStore for LocalRevisionStore {
    fn path_for(&self, id: &str, kind: NodeKind) -> PathBuf {
        let tag = kind.file_tag();
        match kind {
            NodeKind::Environment => self.root.join(format!(".{tag}.{RECORD_EXTENSION}")),
            NodeKind::ProvisioningStep | NodeKind::Connection | NodeKind::DnsRecord => {
                let (dir, leaf) = split_id(id);
                self.root
                    .join(dir)
                    .join(format!(".{leaf}.{tag}.{RECORD_EXTENSION}"))
            }
            NodeKind::Competition
            | NodeKind::Team
            | NodeKind::Network
            | NodeKind::Host
            | NodeKind::Ami
            | NodeKind::RemoteState
            | NodeKind::User => self.root.join(id).join(format!(".{tag}.{RECORD_EXTENSION}")),
        }
    }

    async fn load(&self, path: &Path) -> Result<Option<RevisionRecord>> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No revision record at: {}", path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(RevisionError::io(path, format!("Failed to read record: {e}")).into());
            }
        };

        let record: RevisionRecord = serde_json::from_str(&content).map_err(|e| {
            ForgeError::Revision(RevisionError::corrupt(path, format!("Failed to parse record: {e}")))
        })?;

        Ok(Some(record))
    }

    async fn save(&self, record: &RevisionRecord, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            Self::ensure_dir(dir).await?;
        }

        debug!("Saving revision {} to: {}", record.id, path.display());

        let content = serde_json::to_string_pretty(record).map_err(|e| {
            RevisionError::serialization(format!("Failed to serialize record {}: {e}", record.id))
        })?;

        // Write to a temporary file first, then rename for atomicity
        let temp_path = path.with_extension(format!("{RECORD_EXTENSION}.tmp"));

        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            RevisionError::io(&temp_path, format!("Failed to create temp record: {e}"))
        })?;

        file.write_all(content.as_bytes())
            .await
            .map_err(|e| RevisionError::io(&temp_path, format!("Failed to write record: {e}")))?;

        file.sync_all()
            .await
            .map_err(|e| RevisionError::io(&temp_path, format!("Failed to sync record: {e}")))?;

        // Atomic rename
        fs::rename(&temp_path, path)
            .await
            .map_err(|e| RevisionError::io(path, format!("Failed to rename record: {e}")))?;

        Ok(())
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => debug!("Removed revision record: {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(RevisionError::io(path, format!("Failed to remove record: {e}")).into());
            }
        }
        self.prune_empty_dirs(path.parent()).await;
        Ok(())
    }

    async fn scan(&self) -> Result<Vec<RevisionRecord>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let root = self.root.clone();
        let paths = tokio::task::spawn_blocking(move || Self::record_paths(&root))
            .await
            .map_err(|e| ForgeError::internal(format!("Build root scan panicked: {e}")))?;

        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            match self.load(&path).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(ForgeError::Revision(RevisionError::Corrupt { path, message })) => {
                    warn!("Skipping corrupt revision record {}: {message}", path.display());
                }
                Err(e) => return Err(e),
            }
        }

        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };
        let lock_info = LockInfo::new(&holder_id);

        if !self.create_lock_file(&lock_info).await? {
            match self.read_lock_file().await {
                Ok(Some(existing)) if !existing.is_expired() => {
                    return Err(RevisionError::LockContention {
                        holder: existing.holder.clone(),
                        since: existing.acquired_at.to_rfc3339(),
                    }
                    .into());
                }
                Ok(_) => debug!("Expired lock found, taking over"),
                Err(e) => warn!("Replacing unreadable lock file: {e}"),
            }

            self.delete_lock_file().await?;
            if !self.create_lock_file(&lock_info).await? {
                let holder = self
                    .read_lock_file()
                    .await
                    .ok()
                    .flatten()
                    .map_or_else(|| String::from("unknown"), |l| l.holder);
                return Err(RevisionError::LockContention {
                    holder,
                    since: String::from("now"),
                }
                .into());
            }
        }

        info!(
            "Acquired build lock: {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );

        Ok(lock_info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.read_lock_file().await? {
            if existing.lock_id == lock_id {
                self.delete_lock_file().await?;
                info!("Released build lock: {lock_id}");
            } else {
                debug!(
                    "Lock ID mismatch: expected {lock_id}, found {}",
                    existing.lock_id
                );
            }
        }
        Ok(())
    }

    async fn refresh_lock(&self, lock_id: &str) -> Result<LockInfo> {
        let mut lock_info = match self.read_lock_file().await? {
            Some(existing) if existing.lock_id == lock_id => existing,
            other => {
                return Err(RevisionError::LockContention {
                    holder: other.map_or_else(|| String::from("nobody"), |l| l.holder),
                    since: String::from("unknown"),
                }
                .into());
            }
        };
        lock_info.refresh();
        self.write_lock_file(&lock_info).await?;

        debug!(
            "Renewed build lock: {} (expires in {}s)",
            lock_info.lock_id,
            lock_info.remaining_secs()
        );
        Ok(lock_info)
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::RevStatus;
    use tempfile::TempDir;

    fn create_test_store() -> (LocalRevisionStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalRevisionStore::new(temp_dir.path());
        (store, temp_dir)
    }

    #[test]
    fn test_path_conventions() {
        let store = LocalRevisionStore::new("/build");
        let host = "teams/0/networks/corp/hosts/dc01";

        assert_eq!(
            store.path_for("regionals", NodeKind::Environment),
            PathBuf::from("/build/.env.revision")
        );
        assert_eq!(
            store.path_for(host, NodeKind::Host),
            PathBuf::from("/build/teams/0/networks/corp/hosts/dc01/.host.revision")
        );
        assert_eq!(
            store.path_for(&format!("{host}/steps/2"), NodeKind::ProvisioningStep),
            PathBuf::from("/build/teams/0/networks/corp/hosts/dc01/steps/.2.pstep.revision")
        );
        assert_eq!(
            store.path_for(&format!("{host}/connections/mgmt"), NodeKind::Connection),
            PathBuf::from(
                "/build/teams/0/networks/corp/hosts/dc01/connections/.mgmt.connection.revision"
            )
        );
        assert_eq!(
            store.path_for("remote/main", NodeKind::RemoteState),
            PathBuf::from("/build/remote/main/.remote.revision")
        );
    }

    #[test]
    fn test_steps_do_not_collide() {
        let store = LocalRevisionStore::new("/build");
        let one = store.path_for("h/steps/1", NodeKind::ProvisioningStep);
        let two = store.path_for("h/steps/2", NodeKind::ProvisioningStep);
        assert_ne!(one, two);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (store, _temp) = create_test_store();
        let path = store.path_for("teams/0", NodeKind::Team);

        let mut record = RevisionRecord::new("teams/0", NodeKind::Team);
        record.checksum = 99;
        record.touch_with_id("logical:teams/0");
        store.save(&record, &path).await.expect("Failed to save record");

        let loaded = store
            .load(&path)
            .await
            .expect("Failed to load record")
            .expect("Record should exist");

        assert_eq!(loaded.status, RevStatus::Active);
        assert_eq!(loaded.checksum, 99);
        assert_eq!(loaded.external_id, record.external_id);
        assert!(!path.with_extension("revision.tmp").exists());
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let (store, _temp) = create_test_store();
        let path = store.path_for("users/ops", NodeKind::User);

        let result = store.load(&path).await.expect("Load should not fail");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_record_is_an_error() {
        let (store, _temp) = create_test_store();
        let path = store.path_for("users/ops", NodeKind::User);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(&path, "{ not json").expect("write");

        let err = store.load(&path).await.expect_err("corrupt record");
        assert!(matches!(
            err,
            ForgeError::Revision(RevisionError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn test_remove_prunes_empty_dirs() {
        let (store, temp) = create_test_store();
        let id = "teams/0/networks/corp/hosts/web/steps/1";
        let path = store.path_for(id, NodeKind::ProvisioningStep);
        store
            .save(&RevisionRecord::new(id, NodeKind::ProvisioningStep), &path)
            .await
            .expect("save");

        let keep = store.path_for("teams/0", NodeKind::Team);
        store
            .save(&RevisionRecord::new("teams/0", NodeKind::Team), &keep)
            .await
            .expect("save");

        store.remove(&path).await.expect("remove");

        assert!(!path.exists());
        assert!(!temp.path().join("teams/0/networks").exists());
        assert!(keep.exists());
    }

    #[tokio::test]
    async fn test_scan_skips_corrupt_and_foreign_files() {
        let (store, temp) = create_test_store();
        for (id, kind) in [
            ("regionals", NodeKind::Environment),
            ("teams/0", NodeKind::Team),
            ("teams/0/networks/corp", NodeKind::Network),
        ] {
            let path = store.path_for(id, kind);
            store
                .save(&RevisionRecord::new(id, kind), &path)
                .await
                .expect("save");
        }
        std::fs::write(temp.path().join("teams/.broken.team.revision"), "nope").expect("write");
        std::fs::write(temp.path().join("teams/notes.txt"), "hello").expect("write");

        let records = store.scan().await.expect("scan");
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["regionals", "teams/0", "teams/0/networks/corp"]);
    }

    #[tokio::test]
    async fn test_lock_acquire_release() {
        let (store, _temp) = create_test_store();

        let lock = store
            .acquire_lock("test-holder")
            .await
            .expect("Failed to acquire lock");

        assert!(store.get_lock_info().await.expect("lock info").is_some());

        store
            .release_lock(&lock.lock_id)
            .await
            .expect("Failed to release lock");

        assert!(store.get_lock_info().await.expect("lock info").is_none());
    }

    #[tokio::test]
    async fn test_lock_conflict() {
        let (store, _temp) = create_test_store();

        let _lock1 = store
            .acquire_lock("holder-1")
            .await
            .expect("Failed to acquire first lock");

        let result = store.acquire_lock("holder-2").await;
        assert!(matches!(
            result,
            Err(ForgeError::Revision(RevisionError::LockContention { .. }))
        ));
    }

    #[tokio::test]
    async fn test_lock_refresh_extends_expiry() {
        let (store, temp) = create_test_store();
        let mut lock = store.acquire_lock("long-build").await.expect("acquire");

        lock.expires_at = chrono::Utc::now() + chrono::Duration::seconds(5);
        std::fs::write(
            temp.path().join(LOCK_FILE),
            serde_json::to_string(&lock).expect("serialize"),
        )
        .expect("write");

        let renewed = store.refresh_lock(&lock.lock_id).await.expect("refresh");
        assert_eq!(renewed.lock_id, lock.lock_id);
        assert!(renewed.remaining_secs() > LOCK_EXPIRY_SECS - 60);

        let on_disk = store
            .get_lock_info()
            .await
            .expect("lock info")
            .expect("lock file");
        assert_eq!(on_disk.expires_at, renewed.expires_at);

        let result = store.refresh_lock("someone-else").await;
        assert!(matches!(
            result,
            Err(ForgeError::Revision(RevisionError::LockContention { .. }))
        ));
    }

    #[tokio::test]
    async fn test_expired_lock_is_taken_over() {
        let (store, temp) = create_test_store();
        let mut stale = LockInfo::new("crashed");
        stale.expires_at = stale.acquired_at - chrono::Duration::seconds(1);
        std::fs::write(
            temp.path().join(LOCK_FILE),
            serde_json::to_string(&stale).expect("serialize"),
        )
        .expect("write");

        let lock = store.acquire_lock("fresh").await.expect("takeover");
        assert_eq!(lock.holder, "fresh");
    }
}
