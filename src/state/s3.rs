//! S3-based state storage backend.
//!
//! Uses the same layout as the local backend under `s3://bucket/prefix/`,
//! so state can be shared between machines.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::error::{DeployError, Result, StateError};

use super::lock::{generate_holder_id, LockInfo, RecordLocks, LOCK_EXPIRY_SECS};
use super::store::{check_record_name, StateStore};
use super::types::{StateHeader, StateRecord};

/// State file key suffix.
const STATE_KEY: &str = "state.json";

/// Record key prefix.
const RESOURCES_PREFIX: &str = "resources/";

/// Lock file key suffix.
const LOCK_KEY: &str = "state.lock";

/// S3-based state store.
#[derive(Debug)]
pub struct S3StateStore {
    /// S3 client.
    client: Client,
    /// Bucket name.
    bucket: String,
    /// Key prefix.
    prefix: String,
    /// Per-record write locks.
    record_locks: RecordLocks,
}

fn normalize_prefix(prefix: Option<&str>) -> String {
    prefix
        .map(|p| {
            let p = p.trim_matches('/');
            if p.is_empty() {
                String::new()
            } else {
                format!("{p}/")
            }
        })
        .unwrap_or_default()
}

impl S3StateStore {
    /// Creates a new S3 state store.
    ///
    /// # Errors
    ///
    /// Returns an error if the S3 client cannot be initialized.
    pub async fn new(bucket: &str, prefix: Option<&str>, region: Option<&str>) -> Result<Self> {
        let config = if let Some(region_str) = region {
            aws_config::from_env()
                .region(aws_config::Region::new(region_str.to_string()))
                .load()
                .await
        } else {
            aws_config::load_from_env().await
        };

        Ok(Self::with_client(Client::new(&config), bucket, prefix))
    }

    /// Creates a new S3 state store with an existing client.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str, prefix: Option<&str>) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: normalize_prefix(prefix),
            record_locks: RecordLocks::new(),
        }
    }

    /// Gets the full S3 key for a file.
    fn key(&self, file: &str) -> String {
        format!("{}{file}", self.prefix)
    }

    fn record_key(&self, name: &str) -> String {
        self.key(&format!("{RESOURCES_PREFIX}{name}.json"))
    }

    /// Gets an object from S3.
    async fn get_object(&self, key: &str) -> Result<Option<String>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(response) => {
                let bytes = response.body.collect().await.map_err(|e| {
                    DeployError::State(StateError::s3(format!("Failed to read S3 object: {e}")))
                })?;

                let content = String::from_utf8(bytes.to_vec()).map_err(|e| {
                    DeployError::State(StateError::corrupted(format!(
                        "Invalid UTF-8 in S3 object: {e}"
                    )))
                })?;

                Ok(Some(content))
            }
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(DeployError::State(StateError::s3(format!(
                        "S3 get error: {service_err}"
                    ))))
                }
            }
        }
    }

    /// Puts an object to S3.
    async fn put_object(&self, key: &str, content: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(content.as_bytes().to_vec().into())
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| DeployError::State(StateError::s3(format!("S3 put error: {e}"))))?;

        Ok(())
    }

    /// Deletes an object from S3.
    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| DeployError::State(StateError::s3(format!("S3 delete error: {e}"))))?;

        Ok(())
    }

    /// Lists keys under a prefix, following continuation tokens.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| DeployError::State(StateError::s3(format!("S3 list error: {e}"))))?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }
        Ok(keys)
    }

    /// Checks if an object exists in S3.
    async fn object_exists(&self, key: &str) -> Result<bool> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(DeployError::State(StateError::s3(format!(
                        "S3 head error: {service_err}"
                    ))))
                }
            }
        }
    }
}

#[async_trait]
impl StateStore for S3StateStore {
    async fn load_header(&self) -> Result<Option<StateHeader>> {
        let key = self.key(STATE_KEY);
        debug!("Loading state from s3://{}/{key}", self.bucket);

        match self.get_object(&key).await? {
            Some(json) => {
                let header = StateHeader::from_json(&json)?;
                info!("Loaded state for stack: {}/{}", header.stack, header.environment);
                Ok(Some(header))
            }
            None => {
                debug!("No state found in S3");
                Ok(None)
            }
        }
    }

    async fn save_header(&self, header: &StateHeader) -> Result<()> {
        let key = self.key(STATE_KEY);
        let _guard = self.record_locks.lock(STATE_KEY).await;
        debug!("Saving state header to s3://{}/{key}", self.bucket);
        self.put_object(&key, &header.to_json()?).await
    }

    async fn list_records(&self) -> Result<Vec<String>> {
        let prefix = self.key(RESOURCES_PREFIX);
        let mut names: Vec<String> = self
            .list_keys(&prefix)
            .await?
            .iter()
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter_map(|file| file.strip_suffix(".json"))
            .map(str::to_string)
            .collect();
        names.sort();
        Ok(names)
    }

    async fn load_record(&self, name: &str) -> Result<Option<StateRecord>> {
        check_record_name(name)?;
        match self.get_object(&self.record_key(name)).await? {
            Some(json) => Ok(Some(StateRecord::from_json(&json)?)),
            None => Ok(None),
        }
    }

    async fn put_record(&self, record: &StateRecord) -> Result<()> {
        check_record_name(&record.name)?;
        let _guard = self.record_locks.lock(&record.name).await;
        debug!("Committing record {} (serial {})", record.name, record.serial);
        self.put_object(&self.record_key(&record.name), &record.to_json()?)
            .await
    }

    async fn remove_record(&self, name: &str) -> Result<()> {
        check_record_name(name)?;
        let _guard = self.record_locks.lock(name).await;
        self.delete_object(&self.record_key(name)).await
    }

    async fn delete(&self) -> Result<()> {
        info!("Deleting state from s3://{}/{}", self.bucket, self.prefix);

        for name in self.list_records().await? {
            self.remove_record(&name).await?;
        }
        self.delete_object(&self.key(STATE_KEY)).await?;
        self.delete_object(&self.key(LOCK_KEY)).await
    }

    async fn exists(&self) -> Result<bool> {
        self.object_exists(&self.key(STATE_KEY)).await
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        if let Some(existing) = self.get_lock_info().await? {
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

        let content = serde_json::to_string_pretty(&lock_info).map_err(|e| {
            DeployError::State(StateError::serialization(format!("Failed to serialize lock: {e}")))
        })?;

        self.put_object(&self.key(LOCK_KEY), &content).await?;

        info!(
            "Acquired state lock: {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );

        Ok(lock_info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.get_lock_info().await? {
            if existing.lock_id == lock_id {
                self.delete_object(&self.key(LOCK_KEY)).await?;
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
        info!("Force-removing state lock at s3://{}/{}", self.bucket, self.key(LOCK_KEY));
        self.delete_object(&self.key(LOCK_KEY)).await
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        let Some(content) = self.get_object(&self.key(LOCK_KEY)).await? else {
            return Ok(None);
        };
        let lock_info: LockInfo = serde_json::from_str(&content).map_err(|e| {
            DeployError::State(StateError::corrupted(format!("Failed to parse lock: {e}")))
        })?;
        Ok(Some(lock_info))
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_normalization() {
        assert_eq!(normalize_prefix(None), "");
        assert_eq!(normalize_prefix(Some("/")), "");
        assert_eq!(normalize_prefix(Some("/stacks/ipfs/")), "stacks/ipfs/");
        assert_eq!(normalize_prefix(Some("ipfs")), "ipfs/");
    }
}
