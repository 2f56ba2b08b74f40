//! Service Settings
//!
//! Loaded once at startup from a configuration file, overridden by
//! `SENSOR_INGEST__SERVER__<KEY>` environment variables.

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use storage::{DatabaseConfig, SslMode, StorageError, TlsFiles};

/// Default configuration file
pub const DEFAULT_CONFIG_PATH: &str = "sensor-config.json";

/// Prefix of environment overrides
const ENV_PREFIX: &str = "SENSOR_INGEST";

/// Top-level settings document
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
}

/// The `server` section
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_server_host")]
    pub server_host: String,
    #[serde(default = "default_server_port")]
    pub server_port: u16,

    pub database_host: String,
    #[serde(default = "default_database_port")]
    pub database_port: u16,
    pub database_name: String,
    pub database_user: String,
    #[serde(default)]
    pub database_pwd: Option<String>,
    #[serde(default)]
    pub database_ssl_mode: Option<String>,
    #[serde(default)]
    pub database_ssl_path_ca_cert_pem: Option<PathBuf>,
    #[serde(default)]
    pub database_ssl_path_client_key_pem: Option<PathBuf>,
    #[serde(default)]
    pub database_ssl_path_client_cert_pem: Option<PathBuf>,
    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,
    #[serde(default = "default_acquire_timeout_secs")]
    pub database_acquire_timeout_secs: u64,

    #[serde(default = "default_queue_capacity")]
    pub router_queue_capacity: usize,

    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    8080
}

fn default_database_port() -> u16 {
    5432
}

fn default_max_connections() -> u32 {
    storage::pool::DEFAULT_MAX_CONNECTIONS
}

fn default_acquire_timeout_secs() -> u64 {
    storage::pool::DEFAULT_ACQUIRE_TIMEOUT.as_secs()
}

fn default_queue_capacity() -> usize {
    router::DEFAULT_QUEUE_CAPACITY
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    /// Load from `path` plus environment overrides.
    ///
    /// A missing file is tolerated only when `required` is false.
    pub fn load(path: &str, required: bool) -> Result<Self, StorageError> {
        let config = Config::builder()
            .add_source(File::with_name(path).required(required))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(configuration)?;
        config.try_deserialize().map_err(configuration)
    }

    /// Parse a JSON settings document
    pub fn from_json(document: &str) -> Result<Self, StorageError> {
        Config::builder()
            .add_source(File::from_str(document, FileFormat::Json))
            .build()
            .and_then(Config::try_deserialize)
            .map_err(configuration)
    }

    /// Address the HTTP server binds to
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.server_host, self.server.server_port)
    }
}

impl ServerSettings {
    /// Connection parameters for the pool
    pub fn database_config(&self) -> Result<DatabaseConfig, StorageError> {
        let config = DatabaseConfig {
            host: self.database_host.clone(),
            port: self.database_port,
            database: self.database_name.clone(),
            user: self.database_user.clone(),
            password: self.database_pwd.clone(),
            ssl_mode: SslMode::resolve(self.database_ssl_mode.as_deref())?,
            tls: TlsFiles {
                ca_cert: self.database_ssl_path_ca_cert_pem.clone(),
                client_key: self.database_ssl_path_client_key_pem.clone(),
                client_cert: self.database_ssl_path_client_cert_pem.clone(),
            },
            max_connections: self.database_max_connections,
            acquire_timeout: Duration::from_secs(self.database_acquire_timeout_secs),
        };
        config.validate()?;
        Ok(config)
    }
}

fn configuration(err: config::ConfigError) -> StorageError {
    StorageError::Configuration(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"{
        "server": {
            "database_host": "db.local",
            "database_name": "aware",
            "database_user": "ingest",
            "database_pwd": "secret"
        }
    }"#;

    #[test]
    fn test_defaults() {
        let settings = Settings::from_json(MINIMAL).unwrap();
        assert_eq!(settings.server.server_port, 8080);
        assert_eq!(settings.server.database_port, 5432);
        assert_eq!(settings.server.database_max_connections, 5);
        assert_eq!(settings.server.log_level, "info");
        assert_eq!(settings.bind_address(), "0.0.0.0:8080");

        let db = settings.server.database_config().unwrap();
        assert_eq!(db.ssl_mode, SslMode::Disable);
        assert_eq!(db.password.as_deref(), Some("secret"));
        assert_eq!(db.acquire_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_missing_host_is_configuration_failure() {
        let err = Settings::from_json(r#"{"server": {"database_name": "a", "database_user": "b"}}"#)
            .unwrap_err();
        assert!(matches!(err, StorageError::Configuration(_)));
    }

    #[test]
    fn test_prefer_with_certificates() {
        let settings = Settings::from_json(
            r#"{
                "server": {
                    "database_host": "db.local",
                    "database_name": "aware",
                    "database_user": "ingest",
                    "database_ssl_mode": "preferred",
                    "database_ssl_path_ca_cert_pem": "/etc/ssl/ca.pem",
                    "database_ssl_path_client_key_pem": "/etc/ssl/client.key",
                    "database_ssl_path_client_cert_pem": "/etc/ssl/client.pem"
                }
            }"#,
        )
        .unwrap();

        let db = settings.server.database_config().unwrap();
        assert_eq!(db.ssl_mode, SslMode::Prefer);
        assert_eq!(db.tls.ca_cert, Some(PathBuf::from("/etc/ssl/ca.pem")));
        assert_eq!(db.tls.client_cert, Some(PathBuf::from("/etc/ssl/client.pem")));
    }

    #[test]
    fn test_unknown_ssl_mode_rejected() {
        let settings = Settings::from_json(
            r#"{
                "server": {
                    "database_host": "db.local",
                    "database_name": "aware",
                    "database_user": "ingest",
                    "database_ssl_mode": "maybe"
                }
            }"#,
        )
        .unwrap();

        assert!(matches!(
            settings.server.database_config(),
            Err(StorageError::Configuration(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let path = file.path().to_str().unwrap();

        let settings = Settings::load(path, true).unwrap();
        assert_eq!(settings.server.database_host, "db.local");
        assert_eq!(settings.server.database_name, "aware");
        assert_eq!(settings.server.database_pwd.as_deref(), Some("secret"));

        let optional = Settings::load(path, false).unwrap();
        assert_eq!(optional.server.database_user, "ingest");
    }

    #[test]
    fn test_missing_required_file() {
        assert!(Settings::load("does-not-exist.json", true).is_err());
    }
}
