//! Local file-based state storage backend.
//!
//! Layout under the state directory:
//! - `state.json`: the header
//! - `resources/<name>.json`: one record per resource
//! - `state.lock`: the stack lock

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{DeployError, Result, StateError};

use super::lock::{generate_holder_id, LockInfo, RecordLocks, LOCK_EXPIRY_SECS};
use super::store::{check_record_name, StateStore};
use super::types::{StateHeader, StateRecord};

/// Default state directory name.
pub const STATE_DIR: &str = ".ipfs-deploy";

/// State file name.
const STATE_FILE: &str = "state.json";

/// Directory holding one file per record.
const RESOURCES_DIR: &str = "resources";

/// Lock file name.
const LOCK_FILE: &str = "state.lock";

/// Key used to serialize header writes.
const HEADER_LOCK: &str = "$header";

/// Local file-based state store.
#[derive(Debug)]
pub struct LocalStateStore {
    /// Base directory for state files.
    base_dir: PathBuf,
    /// Path to the header file.
    state_path: PathBuf,
    /// Directory of record files.
    resources_dir: PathBuf,
    /// Path to the lock file.
    lock_path: PathBuf,
    /// Per-record write locks.
    record_locks: RecordLocks,
}

impl LocalStateStore {
    /// Creates a new local state store in `./.ipfs-deploy`.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| DeployError::internal(format!("Cannot determine current directory: {e}")))?
            .join(STATE_DIR);

        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a new local state store with a custom base directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            state_path: base_dir.join(STATE_FILE),
            resources_dir: base_dir.join(RESOURCES_DIR),
            lock_path: base_dir.join(LOCK_FILE),
            base_dir,
            record_locks: RecordLocks::new(),
        }
    }

    /// Returns the base directory.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.resources_dir.join(format!("{name}.json"))
    }

    /// Ensures a directory exists.
    async fn ensure_dir(dir: &Path) -> Result<()> {
        if !dir.exists() {
            debug!("Creating state directory: {}", dir.display());
            fs::create_dir_all(dir).await.map_err(|e| {
                DeployError::State(StateError::write(format!(
                    "Failed to create state directory: {e}"
                )))
            })?;
        }
        Ok(())
    }

    /// Writes `content` to `path` through a temp file and a rename.
    async fn write_atomic(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            Self::ensure_dir(parent).await?;
        }
        let temp_path = path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            DeployError::State(StateError::write(format!(
                "Failed to create temp file {}: {e}",
                temp_path.display()
            )))
        })?;

        file.write_all(content.as_bytes()).await.map_err(|e| {
            DeployError::State(StateError::write(format!("Failed to write state file: {e}")))
        })?;

        file.sync_all().await.map_err(|e| {
            DeployError::State(StateError::write(format!("Failed to sync state file: {e}")))
        })?;

        fs::rename(&temp_path, path).await.map_err(|e| {
            DeployError::State(StateError::write(format!("Failed to rename state file: {e}")))
        })?;

        Ok(())
    }

    async fn read_optional(path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DeployError::State(StateError::corrupted(format!(
                "Failed to read {}: {e}",
                path.display()
            )))),
        }
    }

    /// Reads the lock file if it exists.
    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        let Some(content) = Self::read_optional(&self.lock_path).await? else {
            return Ok(None);
        };

        let lock_info: LockInfo = serde_json::from_str(&content).map_err(|e| {
            DeployError::State(StateError::corrupted(format!("Failed to parse lock file: {e}")))
        })?;

        Ok(Some(lock_info))
    }

    /// Writes the lock file.
    async fn write_lock_file(&self, lock_info: &LockInfo) -> Result<()> {
        Self::ensure_dir(&self.base_dir).await?;

        let content = serde_json::to_string_pretty(lock_info).map_err(|e| {
            DeployError::State(StateError::serialization(format!("Failed to serialize lock: {e}")))
        })?;

        let mut file = fs::File::create(&self.lock_path).await.map_err(|e| {
            DeployError::State(StateError::LockFailed {
                message: format!("Failed to create lock file: {e}"),
            })
        })?;

        file.write_all(content.as_bytes()).await.map_err(|e| {
            DeployError::State(StateError::LockFailed {
                message: format!("Failed to write lock file: {e}"),
            })
        })?;

        file.sync_all().await.map_err(|e| {
            DeployError::State(StateError::LockFailed {
                message: format!("Failed to sync lock file: {e}"),
            })
        })?;

        Ok(())
    }

    /// Deletes the lock file.
    async fn delete_lock_file(&self) -> Result<()> {
        if self.lock_path.exists() {
            fs::remove_file(&self.lock_path).await.map_err(|e| {
                DeployError::State(StateError::LockFailed {
                    message: format!("Failed to delete lock file: {e}"),
                })
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load_header(&self) -> Result<Option<StateHeader>> {
        let Some(content) = Self::read_optional(&self.state_path).await? else {
            debug!("State file does not exist: {}", self.state_path.display());
            return Ok(None);
        };
        debug!("Loading state from: {}", self.state_path.display());
        Ok(Some(StateHeader::from_json(&content)?))
    }

    async fn save_header(&self, header: &StateHeader) -> Result<()> {
        let _guard = self.record_locks.lock(HEADER_LOCK).await;
        debug!("Saving state header to: {}", self.state_path.display());
        Self::write_atomic(&self.state_path, &header.to_json()?).await
    }

    async fn list_records(&self) -> Result<Vec<String>> {
        let mut entries = match fs::read_dir(&self.resources_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(DeployError::State(StateError::corrupted(format!(
                    "Failed to list resource records: {e}"
                ))));
            }
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            DeployError::State(StateError::corrupted(format!("Failed to list resource records: {e}")))
        })? {
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if let Some(name) = file_name.strip_suffix(".json") {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn load_record(&self, name: &str) -> Result<Option<StateRecord>> {
        check_record_name(name)?;
        let Some(content) = Self::read_optional(&self.record_path(name)).await? else {
            return Ok(None);
        };
        Ok(Some(StateRecord::from_json(&content)?))
    }

    async fn put_record(&self, record: &StateRecord) -> Result<()> {
        check_record_name(&record.name)?;
        let _guard = self.record_locks.lock(&record.name).await;
        debug!("Committing record {} (serial {})", record.name, record.serial);
        Self::write_atomic(&self.record_path(&record.name), &record.to_json()?).await
    }

    async fn remove_record(&self, name: &str) -> Result<()> {
        check_record_name(name)?;
        let _guard = self.record_locks.lock(name).await;
        match fs::remove_file(self.record_path(name)).await {
            Ok(()) => {
                debug!("Removed record {name}");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DeployError::State(StateError::write(format!(
                "Failed to remove record {name}: {e}"
            )))),
        }
    }

    async fn delete(&self) -> Result<()> {
        if self.resources_dir.exists() {
            fs::remove_dir_all(&self.resources_dir).await.map_err(|e| {
                DeployError::State(StateError::write(format!("Failed to delete records: {e}")))
            })?;
        }
        if self.state_path.exists() {
            info!("Deleting state file: {}", self.state_path.display());
            fs::remove_file(&self.state_path).await.map_err(|e| {
                DeployError::State(StateError::write(format!("Failed to delete state file: {e}")))
            })?;
        }

        self.delete_lock_file().await
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.state_path.exists())
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        if let Some(existing) = self.read_lock_file().await? {
            if !existing.is_expired() {
                return Err(DeployError::State(StateError::LockedByOther {
                    holder: existing.holder.clone(),
                    since: existing.acquired_at.to_rfc3339(),
                }));
            }
            debug!("Expired lock found, taking over");
        }

        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };

        let lock_info = LockInfo::new(&holder_id);
        self.write_lock_file(&lock_info).await?;

        info!(
            "Acquired state lock: {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );

        Ok(lock_info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.read_lock_file().await? {
            if existing.lock_id == lock_id {
                self.delete_lock_file().await?;
                debug!("Released state lock: {lock_id}");
            } else {
                debug!(
                    "Lock ID mismatch: expected {lock_id}, found {}",
                    existing.lock_id
                );
            }
        }
        Ok(())
    }

    async fn force_unlock(&self) -> Result<()> {
        info!("Force-removing state lock at {}", self.lock_path.display());
        self.delete_lock_file().await
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}
