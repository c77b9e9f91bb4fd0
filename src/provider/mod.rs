//! Provider adapters.
//!
//! This module is the boundary to the cloud:
//! - The [`Provider`] trait with a schema-driven default diff
//! - A retry policy for transient failures
//! - An HTTP adapter for a REST cloud endpoint
//! - A simulated in-process cloud for offline runs and tests

mod adapter;
mod http;
mod retry;
mod simulated;

pub use adapter::{changed_fields, FieldChange, Provider, ProviderResource};
pub use http::{classify_status, HttpProvider};
pub use retry::{
    RetryPolicy, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY_MS,
};
pub use simulated::SimulatedProvider;
