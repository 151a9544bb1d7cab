//! Configuration Loader
//!
//! Environment-aware configuration loading: YAML file discovery, environment detection,
//! merging of the environment section over the base document, and a small set of
//! environment variable overrides applied last.

use super::error::{ConfigResult, ConfigurationError};
use super::ModerationQueueConfig;
use serde_yaml::Value as YamlValue;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const CONFIG_FILE_NAMES: [&str; 2] = ["moderation-queue.yaml", "moderation-queue.yml"];
const ENVIRONMENT_SECTIONS: [&str; 3] = ["development", "test", "production"];

/// Loaded configuration plus the context it was loaded from
#[derive(Debug)]
pub struct ConfigManager {
    config: ModerationQueueConfig,
    environment: String,
    config_directory: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection from `./config`
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment.
    /// Useful for tests that should not touch process environment variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            "Loading configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let mut config = Self::load_and_merge_config(&config_directory, environment)?;
        Self::apply_env_overrides(&mut config)?;
        config.validate()?;

        debug!(
            config = %Self::sanitize_config_for_logging(&config),
            "Configuration loaded"
        );
        info!(
            environment = environment,
            database_url = %config.database.url,
            lease_timeout_seconds = config.lease.timeout_seconds,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: Some(config_directory),
        }))
    }

    /// Load from `./config` when a file exists, otherwise fall back to defaults.
    /// Environment variable overrides apply in both cases.
    pub fn load_or_default() -> ConfigResult<Arc<ConfigManager>> {
        match Self::load() {
            Ok(manager) => Ok(manager),
            Err(ConfigurationError::ConfigFileNotFound { searched_paths }) => {
                warn!(
                    searched = ?searched_paths,
                    "No configuration file found, using built-in defaults"
                );
                let mut config = ModerationQueueConfig::default();
                Self::apply_env_overrides(&mut config)?;
                config.validate()?;
                Ok(Arc::new(Self::from_config(config, &Self::detect_environment())))
            }
            Err(err) => Err(err),
        }
    }

    /// Wrap an already-built configuration
    pub fn from_config(config: ModerationQueueConfig, environment: &str) -> ConfigManager {
        ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: None,
        }
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &ModerationQueueConfig {
        &self.config
    }

    /// Get the current environment
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Get the configuration directory, if the configuration came from disk
    pub fn config_directory(&self) -> Option<&Path> {
        self.config_directory.as_deref()
    }

    /// Sanitized configuration for debugging output
    pub fn debug_config(&self) -> serde_json::Value {
        Self::sanitize_config_for_logging(&self.config)
    }

    /// Detect current environment from environment variables
    fn detect_environment() -> String {
        env::var("MODQ_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    /// Read a configuration file, refusing anything that is not a reasonably sized regular file
    fn read_config_file_safely(path: &Path) -> ConfigResult<String> {
        const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024; // 1MB limit

        let metadata = std::fs::metadata(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))?;

        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigurationError::invalid_value(
                "file_size",
                metadata.len().to_string(),
                format!("Configuration file too large (> {MAX_CONFIG_FILE_SIZE} bytes)"),
            ));
        }

        if !metadata.is_file() {
            return Err(ConfigurationError::invalid_value(
                "file_type",
                "directory or special file",
                "Configuration path must point to a regular file",
            ));
        }

        std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))
    }

    fn find_config_file(config_directory: &Path) -> ConfigResult<PathBuf> {
        let mut searched_paths = Vec::new();

        for name in CONFIG_FILE_NAMES {
            let config_path = config_directory.join(name);
            searched_paths.push(config_path.clone());

            if config_path.exists() {
                debug!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        Err(ConfigurationError::config_file_not_found(searched_paths))
    }

    /// Load and merge configuration with environment-specific overrides
    fn load_and_merge_config(
        config_directory: &Path,
        environment: &str,
    ) -> ConfigResult<ModerationQueueConfig> {
        let config_file = Self::find_config_file(config_directory)?;
        let yaml_content = Self::read_config_file_safely(&config_file)?;

        let mut yaml_data: YamlValue = serde_yaml::from_str(&yaml_content)
            .map_err(|e| ConfigurationError::invalid_yaml(config_file.display().to_string(), e))?;

        if let Some(env_overrides) = yaml_data
            .get(YamlValue::String(environment.to_string()))
            .cloned()
        {
            debug!("Applying environment-specific overrides for: {}", environment);
            Self::merge_yaml_values(&mut yaml_data, env_overrides);
        }

        if let YamlValue::Mapping(ref mut map) = yaml_data {
            for section in ENVIRONMENT_SECTIONS {
                map.remove(YamlValue::String(section.to_string()));
            }
        }

        serde_yaml::from_value(yaml_data).map_err(|e| {
            ConfigurationError::invalid_yaml(
                config_file.display().to_string(),
                format!("Failed to deserialize configuration: {e}"),
            )
        })
    }

    /// Recursively merge YAML values (environment overrides into base config)
    fn merge_yaml_values(base: &mut YamlValue, override_value: YamlValue) {
        match (&mut *base, override_value) {
            (YamlValue::Mapping(base_map), YamlValue::Mapping(override_map)) => {
                for (key, value) in override_map {
                    if let Some(existing_value) = base_map.get_mut(&key) {
                        Self::merge_yaml_values(existing_value, value);
                    } else {
                        base_map.insert(key, value);
                    }
                }
            }
            (base_ref, override_val) => {
                *base_ref = override_val;
            }
        }
    }

    /// Apply the environment variables that take precedence over any file
    fn apply_env_overrides(config: &mut ModerationQueueConfig) -> ConfigResult<()> {
        if let Ok(url) = env::var("MODQ_DATABASE_URL").or_else(|_| env::var("DATABASE_URL")) {
            debug!("Using database url from environment");
            config.database.url = url;
        }

        if let Ok(timeout) = env::var("MODQ_LEASE_TIMEOUT_SECONDS") {
            config.lease.timeout_seconds = timeout.parse().map_err(|e| {
                ConfigurationError::environment_override_error("MODQ_LEASE_TIMEOUT_SECONDS", e)
            })?;
        }

        if let Ok(attempts) = env::var("MODQ_RETRY_MAX_ATTEMPTS") {
            config.retry.max_attempts = attempts.parse().map_err(|e| {
                ConfigurationError::environment_override_error("MODQ_RETRY_MAX_ATTEMPTS", e)
            })?;
        }

        Ok(())
    }

    /// Mask fields whose names suggest credentials before they reach the logs
    fn sanitize_config_for_logging(config: &ModerationQueueConfig) -> serde_json::Value {
        let mut config_json = serde_json::json!(config);
        let sensitive_patterns = ["password", "secret", "key", "token", "credential", "auth"];
        Self::sanitize_json_recursive(&mut config_json, &sensitive_patterns);
        config_json
    }

    fn sanitize_json_recursive(value: &mut serde_json::Value, sensitive_patterns: &[&str]) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let key_lower = key.to_lowercase();
                    let is_sensitive = sensitive_patterns
                        .iter()
                        .any(|pattern| key_lower.contains(pattern));

                    if is_sensitive {
                        *val = serde_json::Value::String("[MASKED]".to_string());
                    } else {
                        Self::sanitize_json_recursive(val, sensitive_patterns);
                    }
                }
            }
            serde_json::Value::Array(arr) => {
                for item in arr.iter_mut() {
                    Self::sanitize_json_recursive(item, sensitive_patterns);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_config_yaml() -> &'static str {
        r#"
database:
  url: "sqlite://base.db"
  max_connections: 4

lease:
  timeout_seconds: 120

retry:
  max_attempts: 5
  base_delay_ms: 250

test:
  database:
    url: "sqlite://test.db"
  lease:
    timeout_seconds: 5

production:
  database:
    max_connections: 32
"#
    }

    fn write_config(dir: &TempDir, contents: &str) {
        fs::write(dir.path().join("moderation-queue.yaml"), contents).unwrap();
    }

    #[test]
    fn test_environment_section_overrides_base() {
        let dir = TempDir::new().unwrap();
        write_config(&dir, create_test_config_yaml());

        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
                .unwrap();
        let config = manager.config();

        assert_eq!(manager.environment(), "test");
        assert_eq!(config.lease.timeout_seconds, 5);
        assert_eq!(config.database.max_connections, 4);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 250);
    }

    #[test]
    fn test_other_environment_sections_are_ignored() {
        let dir = TempDir::new().unwrap();
        write_config(&dir, create_test_config_yaml());

        let manager = ConfigManager::load_from_directory_with_env(
            Some(dir.path().to_path_buf()),
            "production",
        )
        .unwrap();

        assert_eq!(manager.config().database.max_connections, 32);
        assert_eq!(manager.config().lease.timeout_seconds, 120);
    }

    #[test]
    fn test_missing_file_reports_searched_paths() {
        let dir = TempDir::new().unwrap();
        let err =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
                .unwrap_err();

        match err {
            ConfigurationError::ConfigFileNotFound { searched_paths } => {
                assert_eq!(searched_paths.len(), 2);
            }
            other => panic!("Expected ConfigFileNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let dir = TempDir::new().unwrap();
        write_config(&dir, "retry:\n  max_attempts: 0\n");

        let err =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
                .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidValue { .. }));
    }

    #[test]
    fn test_merge_yaml_values_replaces_scalars() {
        let mut base: YamlValue = serde_yaml::from_str("a: 1\nb:\n  c: 2\n  d: 3\n").unwrap();
        let overrides: YamlValue = serde_yaml::from_str("b:\n  c: 20\ne: 5\n").unwrap();
        ConfigManager::merge_yaml_values(&mut base, overrides);

        assert_eq!(base["a"], YamlValue::from(1));
        assert_eq!(base["b"]["c"], YamlValue::from(20));
        assert_eq!(base["b"]["d"], YamlValue::from(3));
        assert_eq!(base["e"], YamlValue::from(5));
    }

    #[test]
    fn test_sanitize_masks_sensitive_keys() {
        let mut value = serde_json::json!({
            "database": { "url": "sqlite://x.db", "password": "hunter2" },
            "api_token": "abc"
        });
        ConfigManager::sanitize_json_recursive(&mut value, &["password", "token"]);
        assert_eq!(value["database"]["password"], "[MASKED]");
        assert_eq!(value["api_token"], "[MASKED]");
        assert_eq!(value["database"]["url"], "sqlite://x.db");
    }
}
