//! State store trait definition.
//!
//! This module defines the common interface for state storage backends.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::{Result, StateError};
use super::lock::LockInfo;
use super::types::{DeploymentState, StateHeader, StateRecord};

/// Trait for state storage backends.
///
/// Records are committed one at a time; implementations serialize writes to
/// the same record and make each write atomic.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the header. Returns `None` if no state exists yet.
    async fn load_header(&self) -> Result<Option<StateHeader>>;

    /// Saves the header.
    async fn save_header(&self, header: &StateHeader) -> Result<()>;

    /// Lists the logical names of every stored record.
    async fn list_records(&self) -> Result<Vec<String>>;

    /// Loads one record.
    async fn load_record(&self, name: &str) -> Result<Option<StateRecord>>;

    /// Writes one record.
    async fn put_record(&self, record: &StateRecord) -> Result<()>;

    /// Removes one record. Removing a missing record succeeds.
    async fn remove_record(&self, name: &str) -> Result<()>;

    /// Deletes all state, including the lock.
    async fn delete(&self) -> Result<()>;

    /// Checks if state exists.
    async fn exists(&self) -> Result<bool>;

    /// Acquires the stack lock.
    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo>;

    /// Releases the stack lock if `lock_id` holds it.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Removes the stack lock regardless of holder.
    async fn force_unlock(&self) -> Result<()>;

    /// Gets current lock information if locked.
    async fn get_lock_info(&self) -> Result<Option<LockInfo>>;

    /// Checks if the state is locked.
    async fn is_locked(&self) -> Result<bool> {
        Ok(self
            .get_lock_info()
            .await?
            .is_some_and(|lock| !lock.is_expired()))
    }

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;

    /// Loads the header and every record.
    ///
    /// Returns `None` if no header exists yet.
    async fn load(&self) -> Result<Option<DeploymentState>> {
        let Some(header) = self.load_header().await? else {
            return Ok(None);
        };
        let mut records = BTreeMap::new();
        for name in self.list_records().await? {
            let record = self.load_record(&name).await?.ok_or_else(|| {
                StateError::corrupted(format!("Record '{name}' disappeared while loading"))
            })?;
            if record.name != name {
                return Err(StateError::corrupted(format!(
                    "Record stored as '{name}' is named '{}'",
                    record.name
                ))
                .into());
            }
            records.insert(name, record);
        }
        Ok(Some(DeploymentState { header, records }))
    }
}

#[async_trait]
impl StateStore for Box<dyn StateStore> {
    async fn load_header(&self) -> Result<Option<StateHeader>> {
        (**self).load_header().await
    }

    async fn save_header(&self, header: &StateHeader) -> Result<()> {
        (**self).save_header(header).await
    }

    async fn list_records(&self) -> Result<Vec<String>> {
        (**self).list_records().await
    }

    async fn load_record(&self, name: &str) -> Result<Option<StateRecord>> {
        (**self).load_record(name).await
    }

    async fn put_record(&self, record: &StateRecord) -> Result<()> {
        (**self).put_record(record).await
    }

    async fn remove_record(&self, name: &str) -> Result<()> {
        (**self).remove_record(name).await
    }

    async fn delete(&self) -> Result<()> {
        (**self).delete().await
    }

    async fn exists(&self) -> Result<bool> {
        (**self).exists().await
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        (**self).acquire_lock(holder).await
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        (**self).release_lock(lock_id).await
    }

    async fn force_unlock(&self) -> Result<()> {
        (**self).force_unlock().await
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        (**self).get_lock_info().await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}

/// Rejects names that would escape the records directory or key prefix.
pub(crate) fn check_record_name(name: &str) -> std::result::Result<(), StateError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && !name.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(StateError::write(format!("Invalid record name: '{name}'")))
    }
}
