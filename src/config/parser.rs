//! Manifest loading and config option resolution.
//!
//! This module handles loading the manifest from YAML, applying environment
//! overrides, and computing the final value of every config option.

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{ConfigError, DeployError, Result};

use super::spec::Manifest;

/// Prefix of every environment variable the tool reads.
pub const ENV_PREFIX: &str = "IPFS_DEPLOY_";

/// Environment variable holding the HTTP provider's bearer token.
pub const PROVIDER_TOKEN_ENV: &str = "IPFS_DEPLOY_PROVIDER_TOKEN";

/// Manifest parser.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new manifest parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads a manifest from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Manifest> {
        let path = path.as_ref();
        info!("Loading manifest from: {}", path.display());

        if !path.exists() {
            return Err(DeployError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            DeployError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses a manifest from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<Manifest> {
        debug!("Parsing YAML manifest");

        let manifest: Manifest = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            DeployError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Parsed manifest for stack {} with {} resources",
            manifest.stack.name,
            manifest.resources.len()
        );
        Ok(manifest)
    }

    /// Loads a manifest and applies environment overrides.
    ///
    /// Environment variables are checked in the format
    /// `IPFS_DEPLOY_<SECTION>_<KEY>` (e.g. `IPFS_DEPLOY_STACK_NAME`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<Manifest> {
        let mut manifest = self.load_file(path)?;
        Self::apply_env_overrides(&mut manifest);
        Ok(manifest)
    }

    /// Applies environment variable overrides to the manifest.
    pub fn apply_env_overrides(manifest: &mut Manifest) {
        if let Ok(name) = std::env::var("IPFS_DEPLOY_STACK_NAME") {
            debug!("Overriding stack.name from environment");
            manifest.stack.name = name;
        }

        if let Ok(env) = std::env::var("IPFS_DEPLOY_STACK_ENVIRONMENT") {
            debug!("Overriding stack.environment from environment");
            manifest.stack.environment = env;
        }

        if let Ok(bucket) = std::env::var("IPFS_DEPLOY_STATE_BUCKET") {
            debug!("Overriding state.bucket from environment");
            manifest.state.bucket = Some(bucket);
        }

        if let Ok(prefix) = std::env::var("IPFS_DEPLOY_STATE_PREFIX") {
            debug!("Overriding state.prefix from environment");
            manifest.state.prefix = Some(prefix);
        }

        if let Ok(endpoint) = std::env::var("IPFS_DEPLOY_PROVIDER_ENDPOINT") {
            debug!("Overriding provider.endpoint from environment");
            manifest.provider.endpoint = Some(endpoint);
        }
    }

    /// Loads the .env file next to the manifest if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                DeployError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Resolves the local state directory declared in the manifest.
    #[must_use]
    pub fn state_dir(&self, manifest: &Manifest) -> Option<PathBuf> {
        let path = PathBuf::from(manifest.state.path.as_deref()?);
        Some(match &self.base_path {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        })
    }

    /// Gets the HTTP provider token from the environment (optional).
    #[must_use]
    pub fn provider_token() -> Option<String> {
        std::env::var(PROVIDER_TOKEN_ENV).ok().filter(|t| !t.is_empty())
    }

    /// Computes the value of every declared config option.
    ///
    /// Precedence, lowest first: the option's default, the manifest's
    /// `values:` section, `IPFS_DEPLOY_CONFIG_<NAME>`, then `overrides`.
    /// An option nothing sets is null.
    ///
    /// # Errors
    ///
    /// Returns an error if `values:` or `overrides` name an undeclared option.
    pub fn resolve_options(
        manifest: &Manifest,
        overrides: &[(String, String)],
    ) -> std::result::Result<BTreeMap<String, Value>, ConfigError> {
        Self::resolve_options_with(manifest, overrides, |name| std::env::var(name).ok())
    }

    /// Like [`Self::resolve_options`] with a custom environment lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if `values:` or `overrides` name an undeclared option.
    pub fn resolve_options_with<E>(
        manifest: &Manifest,
        overrides: &[(String, String)],
        env: E,
    ) -> std::result::Result<BTreeMap<String, Value>, ConfigError>
    where
        E: Fn(&str) -> Option<String>,
    {
        for name in manifest.values.keys().chain(overrides.iter().map(|(k, _)| k)) {
            if !manifest.config.contains_key(name) {
                return Err(ConfigError::UnknownOption { name: name.clone() });
            }
        }

        let mut options = BTreeMap::new();
        for (name, option) in &manifest.config {
            let mut value = option.default.clone().unwrap_or(Value::Null);

            if let Some(set) = manifest.values.get(name) {
                value = set.clone();
            }
            if let Some(raw) = env(&option_env_var(name)) {
                debug!("Config option {name} set from environment");
                value = option_value(&raw, option.default.as_ref());
            }
            if let Some((_, raw)) = overrides.iter().rev().find(|(k, _)| k == name) {
                debug!("Config option {name} set on the command line");
                value = option_value(raw, option.default.as_ref());
            }

            options.insert(name.clone(), value);
        }
        Ok(options)
    }
}

/// Environment variable that sets config option `name`.
///
/// `myPublicIp` becomes `IPFS_DEPLOY_CONFIG_MY_PUBLIC_IP`.
#[must_use]
pub fn option_env_var(name: &str) -> String {
    let mut snake = String::with_capacity(name.len() + 4);
    let mut previous_lower = false;
    for c in name.chars() {
        if c.is_ascii_uppercase() && previous_lower {
            snake.push('_');
        }
        previous_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        snake.push(if c == '-' || c == '.' { '_' } else { c.to_ascii_uppercase() });
    }
    format!("{ENV_PREFIX}CONFIG_{snake}")
}

/// Parses a `name=value` override.
///
/// # Errors
///
/// Returns an error if there is no `=` or the name is empty.
pub fn parse_override(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected name=value, got '{raw}'")),
    }
}

/// Empty strings unset an option.
fn option_value(raw: &str, default: Option<&Value>) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    if matches!(default, Some(Value::String(_))) {
        return Value::String(raw.to_string());
    }
    // Options without a string default take YAML scalars: `false`, `8`, `0.5`.
    match serde_yaml::from_str::<Value>(raw) {
        Ok(value @ (Value::Bool(_) | Value::Number(_))) => value,
        _ => Value::String(raw.to_string()),
    }
}

/// Default manifest file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["ipfs-deploy.yaml", "ipfs-deploy.yml"];

/// Finds the manifest in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no manifest is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found manifest: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(DeployError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    const MANIFEST: &str = r#"
stack:
  name: ipfs-node
config:
  region:
    default: us-west-2
  instanceType:
    default: m5.large
  myPublicIp:
    description: CIDR allowed to reach SSH and the API
values:
  instanceType: t3.medium
resources:
  - name: vpc
    type: vpc
    properties:
      cidr_block: 10.0.0.0/16
  - name: subnet
    type: subnet
    properties:
      vpc_id: { $ref: vpc.id }
      cidr_block: 10.0.1.0/24
      availability_zone: { $concat: [{ $config: region }, "a"] }
outputs:
  vpc_id: { $ref: vpc.id }
"#;

    fn manifest() -> Manifest {
        ConfigParser::new().parse_yaml(MANIFEST, None).unwrap()
    }

    #[test]
    fn test_parse_minimal_manifest() {
        let yaml = r"
stack:
  name: test-stack
";
        let manifest = ConfigParser::new().parse_yaml(yaml, None).unwrap();
        assert_eq!(manifest.stack.name, "test-stack");
        assert_eq!(manifest.stack.environment, "dev");
        assert!(manifest.resources.is_empty());
    }

    #[test]
    fn test_parse_full_manifest() {
        let manifest = manifest();
        assert_eq!(manifest.resources.len(), 2);
        assert_eq!(manifest.resource_names(), vec!["vpc", "subnet"]);
        assert_eq!(manifest.config.len(), 3);
        assert_eq!(manifest.outputs.len(), 1);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = r"
stack:
  name: test-stack
  colour: blue
";
        assert!(ConfigParser::new().parse_yaml(yaml, None).is_err());
    }

    #[test]
    fn test_option_precedence() {
        let manifest = manifest();
        let env = |name: &str| match name {
            "IPFS_DEPLOY_CONFIG_REGION" => Some(String::from("eu-west-1")),
            "IPFS_DEPLOY_CONFIG_INSTANCE_TYPE" => Some(String::from("c5.large")),
            _ => None,
        };
        let overrides = vec![(String::from("region"), String::from("ap-south-1"))];

        let options = ConfigParser::resolve_options_with(&manifest, &overrides, env).unwrap();
        assert_eq!(options["region"], json!("ap-south-1"));
        assert_eq!(options["instanceType"], json!("c5.large"));
        assert_eq!(options["myPublicIp"], Value::Null);

        let options = ConfigParser::resolve_options_with(&manifest, &[], |_| None).unwrap();
        assert_eq!(options["region"], json!("us-west-2"));
        assert_eq!(options["instanceType"], json!("t3.medium"));
    }

    #[test]
    fn test_overrides_keep_scalar_types() {
        let yaml = r#"
stack:
  name: ipfs-node
config:
  region:
    default: us-west-2
  publicIp:
    default: true
  diskGb:
    default: 8
  myPublicIp: {}
resources:
  - name: vpc
    type: vpc
    properties:
      cidr_block: 10.0.0.0/16
"#;
        let manifest = ConfigParser::new().parse_yaml(yaml, None).unwrap();
        let env = |name: &str| {
            (name == "IPFS_DEPLOY_CONFIG_DISK_GB").then(|| String::from("20"))
        };
        let overrides = vec![
            (String::from("publicIp"), String::from("false")),
            (String::from("region"), String::from("8")),
            (String::from("myPublicIp"), String::from("203.0.113.7/32")),
        ];

        let options = ConfigParser::resolve_options_with(&manifest, &overrides, env).unwrap();
        assert_eq!(options["publicIp"], json!(false));
        assert_eq!(options["diskGb"], json!(20));
        assert_eq!(options["region"], json!("8"));
        assert_eq!(options["myPublicIp"], json!("203.0.113.7/32"));
    }

    #[test]
    fn test_undeclared_override_rejected() {
        let overrides = vec![(String::from("colour"), String::from("blue"))];
        let result = ConfigParser::resolve_options_with(&manifest(), &overrides, |_| None);
        assert!(matches!(result, Err(ConfigError::UnknownOption { name }) if name == "colour"));
    }

    #[test]
    fn test_option_env_var_names() {
        assert_eq!(option_env_var("region"), "IPFS_DEPLOY_CONFIG_REGION");
        assert_eq!(option_env_var("myPublicIp"), "IPFS_DEPLOY_CONFIG_MY_PUBLIC_IP");
        assert_eq!(option_env_var("instance-type"), "IPFS_DEPLOY_CONFIG_INSTANCE_TYPE");
    }

    #[test]
    fn test_parse_override() {
        assert_eq!(
            parse_override("myPublicIp=1.2.3.4/32").unwrap(),
            (String::from("myPublicIp"), String::from("1.2.3.4/32"))
        );
        assert_eq!(parse_override("region=").unwrap().1, "");
        assert!(parse_override("novalue").is_err());
        assert!(parse_override("=x").is_err());
    }

    #[test]
    fn test_find_config_file_walks_parents() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("ipfs-deploy.yaml"), MANIFEST).unwrap();

        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, dir.path().join("ipfs-deploy.yaml"));
    }

    #[test]
    fn test_state_dir_relative_to_manifest() {
        let mut manifest = manifest();
        manifest.state.path = Some(String::from("state"));
        let parser = ConfigParser::new().with_base_path("/srv/stack");
        assert_eq!(parser.state_dir(&manifest), Some(PathBuf::from("/srv/stack/state")));
    }
}
