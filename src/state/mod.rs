//! State management module.
//!
//! This module provides persistent state storage for tracking applied
//! resources: a versioned header, one record per resource committed
//! incrementally, a stack lock, and encryption of secret values.

mod known;
mod local;
mod lock;
mod s3;
mod secrets;
mod store;
mod types;

pub use known::{KnownState, PriorRecord};
pub use local::{LocalStateStore, STATE_DIR};
pub use lock::{generate_holder_id, LockInfo, RecordLocks, LOCK_EXPIRY_SECS};
pub use s3::S3StateStore;
pub use secrets::{SecretsManager, PASSPHRASE_ENV};
pub use store::StateStore;
pub use types::{
    DeploymentState, HistoryEntry, RunOperation, StateHeader, StateRecord, StoredValue,
    MAX_HISTORY, STATE_VERSION,
};
