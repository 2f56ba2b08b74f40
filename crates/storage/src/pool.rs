//! Connection Pool Manager
//!
//! Wraps a bounded `sqlx` PostgreSQL pool built once at startup. Connections
//! are leased per operation and returned to the pool when the lease drops.

use crate::StorageError;
use serde::Serialize;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use sqlx::Postgres;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Default number of concurrent connections
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Default time a caller waits for a free connection
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Encryption mode for store connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Plain TCP
    #[default]
    Disable,
    /// TLS when the server offers it
    Prefer,
    /// TLS mandatory, certificate not verified
    Require,
    /// TLS mandatory, certificate chain verified
    VerifyCa,
    /// TLS mandatory, chain and host name verified
    VerifyFull,
}

impl SslMode {
    /// Resolve an optional configuration value. Absent means disabled.
    pub fn resolve(value: Option<&str>) -> Result<Self, StorageError> {
        value.map_or(Ok(SslMode::Disable), |v| v.parse())
    }

    /// Whether certificate material should be installed for this mode
    pub fn uses_tls(self) -> bool {
        self != SslMode::Disable
    }

    fn as_pg(self) -> PgSslMode {
        match self {
            SslMode::Disable => PgSslMode::Disable,
            SslMode::Prefer => PgSslMode::Prefer,
            SslMode::Require => PgSslMode::Require,
            SslMode::VerifyCa => PgSslMode::VerifyCa,
            SslMode::VerifyFull => PgSslMode::VerifyFull,
        }
    }
}

impl FromStr for SslMode {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "disable" | "disabled" => Ok(SslMode::Disable),
            "prefer" | "preferred" => Ok(SslMode::Prefer),
            "require" | "required" => Ok(SslMode::Require),
            "verify-ca" | "verify_ca" => Ok(SslMode::VerifyCa),
            "verify-full" | "verify_full" => Ok(SslMode::VerifyFull),
            other => Err(StorageError::Configuration(format!(
                "unsupported database_ssl_mode {:?}",
                other
            ))),
        }
    }
}

/// PEM files used when TLS is enabled
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsFiles {
    /// Trust anchor for the server certificate
    pub ca_cert: Option<PathBuf>,
    /// Client private key for mutual authentication
    pub client_key: Option<PathBuf>,
    /// Client certificate paired with `client_key`
    pub client_cert: Option<PathBuf>,
}

/// Connection parameters, built once at startup
#[derive(Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: Option<String>,
    pub ssl_mode: SslMode,
    pub tls: TlsFiles,
    /// Pool capacity
    pub max_connections: u32,
    /// Upper bound on waiting for a lease
    pub acquire_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "sensors".to_string(),
            user: "postgres".to_string(),
            password: None,
            ssl_mode: SslMode::Disable,
            tls: TlsFiles::default(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }
}

// Keeps the password out of logs.
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("ssl_mode", &self.ssl_mode)
            .field("tls", &self.tls)
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout", &self.acquire_timeout)
            .finish()
    }
}

impl DatabaseConfig {
    /// Check required parameters
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.host.trim().is_empty() {
            return Err(StorageError::Configuration("database_host is empty".into()));
        }
        if self.database.trim().is_empty() {
            return Err(StorageError::Configuration("database_name is empty".into()));
        }
        if self.user.trim().is_empty() {
            return Err(StorageError::Configuration("database_user is empty".into()));
        }
        if self.port == 0 {
            return Err(StorageError::Configuration("database_port must be non-zero".into()));
        }
        if self.max_connections == 0 {
            return Err(StorageError::Configuration(
                "database_max_connections must be at least 1".into(),
            ));
        }
        if self.ssl_mode.uses_tls()
            && self.tls.ca_cert.is_some()
            && self.tls.client_key.is_some()
            && self.tls.client_cert.is_none()
        {
            return Err(StorageError::Configuration(
                "database_ssl_path_client_key_pem requires database_ssl_path_client_cert_pem".into(),
            ));
        }
        Ok(())
    }

    /// Map onto driver connect options.
    ///
    /// Certificates apply only when TLS is on. The CA certificate is the
    /// trust anchor; client key and certificate are installed only on top of
    /// a configured CA certificate.
    pub fn connect_options(&self) -> Result<PgConnectOptions, StorageError> {
        self.validate()?;

        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.user)
            .ssl_mode(self.ssl_mode.as_pg());

        if let Some(password) = &self.password {
            options = options.password(password);
        }

        if !self.ssl_mode.uses_tls() {
            if self.tls.ca_cert.is_some() || self.tls.client_key.is_some() {
                debug!("SSL disabled, ignoring configured certificate paths");
            }
            return Ok(options);
        }

        if let Some(ca_cert) = &self.tls.ca_cert {
            options = options.ssl_root_cert(ca_cert);
            if let (Some(key), Some(cert)) = (&self.tls.client_key, &self.tls.client_cert) {
                options = options.ssl_client_key(key).ssl_client_cert(cert);
            }
        }

        Ok(options)
    }
}

/// Point-in-time pool occupancy
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PoolStatus {
    pub size: u32,
    pub idle: usize,
    pub max_connections: u32,
    pub closed: bool,
}

/// Process-wide bounded pool handle. Cloning shares the same pool.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: PgPool,
    max_connections: u32,
}

impl ConnectionPool {
    /// Build the pool. Connections open lazily on first acquire.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: &DatabaseConfig) -> Result<Self, StorageError> {
        let options = config.connect_options()?;
        let inner = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_lazy_with(options);

        info!(
            "Connection pool configured: {}:{}/{} (max {} connections, ssl {:?})",
            config.host, config.port, config.database, config.max_connections, config.ssl_mode
        );

        Ok(Self {
            inner,
            max_connections: config.max_connections,
        })
    }

    /// Build a pool from a `postgres://` URL
    pub fn from_url(url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let options = PgConnectOptions::from_str(url)?;
        let inner = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(DEFAULT_ACQUIRE_TIMEOUT)
            .connect_lazy_with(options);

        Ok(Self {
            inner,
            max_connections,
        })
    }

    /// Lease a connection, waiting for a free slot up to the acquire timeout
    pub async fn acquire(&self) -> Result<PoolConnection<Postgres>, StorageError> {
        self.inner
            .acquire()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    /// Wait for outstanding leases, close every connection, refuse new acquires
    pub async fn close(&self) {
        info!("Closing connection pool");
        self.inner.close().await;
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Current occupancy
    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            size: self.inner.size(),
            idle: self.inner.num_idle(),
            max_connections: self.max_connections,
            closed: self.inner.is_closed(),
        }
    }
}
