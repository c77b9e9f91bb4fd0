//! Manifest handling.
//!
//! This module handles everything between `ipfs-deploy.yaml` and a set of
//! resource descriptors:
//! - Parsing and deserializing the manifest
//! - Resolving config options from defaults, values, environment, and flags
//! - Validation of manifest values
//! - Computing manifest hashes for change detection

mod hash;
mod parser;
mod spec;
mod validator;

pub use hash::ConfigHasher;
pub use parser::{
    find_config_file, option_env_var, parse_override, ConfigParser, DEFAULT_CONFIG_FILES,
    ENV_PREFIX, PROVIDER_TOKEN_ENV,
};
pub use spec::{
    ConfigOption, Manifest, ProviderConfig, ProviderKind, ResourceSpec, RetryConfig,
    StackConfig, StateBackend, StateConfig,
};
pub use self::validator::{ConfigValidator, ValidationError, ValidationResult};
