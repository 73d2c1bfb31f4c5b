use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use lunchbox_core::AdminGate;

/// Passphrase behind the stock admin digest; real deployments override it
/// in config or via LUNCHBOX_ADMIN_DIGEST.
const DEFAULT_ADMIN_PASSPHRASE: &str = "lunchtime";

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Path to the SQLite database
    pub database_path: ConfigValue<PathBuf>,
    /// Customer name used when placing orders without --name
    pub customer_name: ConfigValue<String>,
    /// Lowercase hex SHA-256 digest of the admin passphrase
    pub admin_digest: ConfigValue<String>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    database_path: Option<PathBuf>,
    customer_name: Option<String>,
    admin_digest: Option<String>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let default_db_path = Self::default_data_dir().join("lunchbox.db");

        // Start with defaults
        let mut database_path = ConfigValue::new(default_db_path, ConfigSource::Default);
        let mut customer_name = ConfigValue::new("guest".to_string(), ConfigSource::Default);
        let mut admin_digest = ConfigValue::new(
            AdminGate::from_passphrase(DEFAULT_ADMIN_PASSPHRASE).digest_hex(),
            ConfigSource::Default,
        );
        let mut config_file = None;

        // Try to load from config file
        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            if let Some(db_path) = file_config.database_path {
                // Resolve relative paths against config file's directory
                let resolved_path = if db_path.is_relative() {
                    path.parent().map(|p| p.join(&db_path)).unwrap_or(db_path)
                } else {
                    db_path
                };
                database_path = ConfigValue::new(resolved_path, ConfigSource::File);
            }
            if let Some(name) = file_config.customer_name {
                customer_name = ConfigValue::new(name, ConfigSource::File);
            }
            if let Some(digest) = file_config.admin_digest {
                admin_digest = ConfigValue::new(digest, ConfigSource::File);
            }
        }

        // Apply environment variable overrides
        if let Ok(db_path) = std::env::var("LUNCHBOX_DATABASE_PATH") {
            database_path = ConfigValue::new(PathBuf::from(db_path), ConfigSource::Environment);
        }
        if let Ok(name) = std::env::var("LUNCHBOX_CUSTOMER_NAME") {
            customer_name = ConfigValue::new(name, ConfigSource::Environment);
        }
        if let Ok(digest) = std::env::var("LUNCHBOX_ADMIN_DIGEST") {
            admin_digest = ConfigValue::new(digest, ConfigSource::Environment);
        }

        Ok(Self {
            database_path,
            customer_name,
            admin_digest,
            config_file,
        })
    }

    /// The admin gate for this configuration. Falls back to the stock
    /// digest when the configured one is malformed.
    pub fn admin_gate(&self) -> AdminGate {
        AdminGate::from_digest_hex(&self.admin_digest.value)
            .unwrap_or_else(|| AdminGate::from_passphrase(DEFAULT_ADMIN_PASSPHRASE))
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/lunchbox/
    /// - macOS: ~/Library/Application Support/lunchbox/
    /// - Windows: %APPDATA%/lunchbox/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lunchbox")
    }

    /// Default data directory (platform-specific):
    /// - Linux: ~/.local/share/lunchbox/
    /// - macOS: ~/Library/Application Support/lunchbox/
    /// - Windows: %APPDATA%/lunchbox/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lunchbox")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_load_no_file_uses_defaults() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nonexistent.yaml");

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(config.customer_name.value, "guest");
        assert_eq!(config.customer_name.source, ConfigSource::Default);
        assert!(config.config_file.is_none());
        assert!(config.admin_gate().verify(DEFAULT_ADMIN_PASSPHRASE));
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "database_path: /custom/path/lunchbox.db").unwrap();
        writeln!(file, "customer_name: alice").unwrap();

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(
            config.database_path.value,
            PathBuf::from("/custom/path/lunchbox.db")
        );
        assert_eq!(config.database_path.source, ConfigSource::File);
        assert_eq!(config.customer_name.value, "alice");
    }

    #[test]
    fn test_relative_database_path_resolves_against_config_dir() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "database_path: data/lunchbox.db").unwrap();

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(
            config.database_path.value,
            temp_dir.path().join("data/lunchbox.db")
        );
    }

    #[test]
    fn test_custom_admin_digest_from_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let digest = AdminGate::from_passphrase("secret").digest_hex();
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "admin_digest: {digest}").unwrap();

        let config = Config::load(Some(config_path)).unwrap();
        assert!(config.admin_gate().verify("secret"));
        assert!(!config.admin_gate().verify(DEFAULT_ADMIN_PASSPHRASE));
    }

    #[test]
    fn test_invalid_yaml_error() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "invalid: yaml: content: [").unwrap();

        let result = Config::load(Some(config_path));
        assert!(matches!(result, Err(ConfigError::ParseError(_, _))));
    }
}
