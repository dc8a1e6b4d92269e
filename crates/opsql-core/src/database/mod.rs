//! Database connection management
//!
//! Picks a driver from the DSN, opens a small sqlx pool, and exposes it
//! through the [`Database`](crate::port::Database) port. Each driver module
//! provides a plain-connection type and a transaction type.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tracing::{info, warn};

use crate::error::PortError;
use crate::port::Database;

#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

/// Relational driver behind a DSN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    Postgres,
    MySql,
    Sqlite,
}

impl Driver {
    /// Detect the driver from a DSN.
    ///
    /// Besides URL forms, the driver-style MySQL DSN `user:pass@tcp(host:3306)/db`
    /// is recognised.
    pub fn detect(dsn: &str) -> Result<Self, PortError> {
        let lower = dsn.trim().to_ascii_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Ok(Driver::Postgres)
        } else if lower.starts_with("mysql://") || lower.contains("@tcp(") {
            Ok(Driver::MySql)
        } else if lower.starts_with("sqlite:") {
            Ok(Driver::Sqlite)
        } else {
            Err(PortError::UnsupportedDriver {
                dsn: mask_dsn(dsn),
            })
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Driver::Postgres => "postgres",
            Driver::MySql => "mysql",
            Driver::Sqlite => "sqlite",
        }
    }
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub dsn: String,
    /// A run uses one transaction, so one connection is enough.
    pub max_connections: u32,
    pub connection_timeout: Duration,
    pub idle_timeout: Option<Duration>,
    pub max_lifetime: Option<Duration>,
}

impl DatabaseConfig {
    pub fn new(dsn: impl Into<String>) -> Self {
        Self {
            dsn: dsn.into(),
            max_connections: 1,
            connection_timeout: Duration::from_secs(30),
            idle_timeout: None,
            max_lifetime: None,
        }
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }
}

/// Connect to the database named by the config's DSN.
pub async fn connect(config: &DatabaseConfig) -> Result<Box<dyn Database>, PortError> {
    let driver = Driver::detect(&config.dsn)?;
    info!(
        "Connecting to {} database: {}",
        driver.name(),
        mask_dsn(&config.dsn)
    );

    let db: Result<Box<dyn Database>, PortError> = match driver {
        #[cfg(feature = "postgres")]
        Driver::Postgres => postgres::PgDatabase::connect(config)
            .await
            .map(|db| Box::new(db) as Box<dyn Database>),
        #[cfg(feature = "mysql")]
        Driver::MySql => mysql::MySqlDatabase::connect(config)
            .await
            .map(|db| Box::new(db) as Box<dyn Database>),
        #[cfg(feature = "sqlite")]
        Driver::Sqlite => sqlite::SqliteDatabase::connect(config)
            .await
            .map(|db| Box::new(db) as Box<dyn Database>),
        #[allow(unreachable_patterns)]
        _ => Err(PortError::UnsupportedDriver {
            dsn: mask_dsn(&config.dsn),
        }),
    };

    db.map_err(|e| {
        warn!("Failed to connect to database: {}", e);
        e
    })
}

fn go_mysql_dsn() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:(?P<auth>[^@]*)@)?tcp\((?P<addr>[^)]*)\)/(?P<db>[^?]*)")
            .expect("static regex is valid")
    })
}

/// Rewrite a driver-style MySQL DSN into a `mysql://` URL. Driver-specific
/// query parameters (`parseTime`, `loc`, ...) are dropped.
pub fn normalize_mysql_dsn(dsn: &str) -> String {
    match go_mysql_dsn().captures(dsn.trim()) {
        Some(caps) => {
            let auth = caps
                .name("auth")
                .map(|m| format!("{}@", m.as_str()))
                .unwrap_or_default();
            format!("mysql://{}{}/{}", auth, &caps["addr"], &caps["db"])
        }
        None => dsn.to_string(),
    }
}

fn bare_credentials() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([^:/@]+):([^@]+)@").expect("static regex is valid"))
}

/// Mask the password in a DSN for logging.
pub fn mask_dsn(dsn: &str) -> String {
    if let Ok(mut parsed) = url::Url::parse(dsn) {
        // `user:pass@tcp(...)` parses as a URL with scheme `user` and no host
        if parsed.has_host() {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
                return parsed.to_string();
            }
            return dsn.to_string();
        }
    }
    bare_credentials().replace(dsn, "$1:***@").into_owned()
}
