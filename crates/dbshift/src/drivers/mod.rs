//! Database driver implementations.
//!
//! - [`postgres`]: PostgreSQL via tokio-postgres (optional rustls TLS)
//! - [`mssql`]: Microsoft SQL Server via tiberius
//! - [`mysql`]: MySQL and MariaDB via sqlx
//! - [`memory`]: in-process engine for tests and dry runs
//!
//! Each driver implements [`Driver`] and hands out one [`Connection`] per
//! caller. The [`DriverRegistry`] resolves engine names from configuration,
//! including the usual aliases.
//!
//! [`Connection`]: crate::core::traits::Connection

pub mod memory;
pub mod mssql;
pub mod mysql;
pub mod postgres;

pub use memory::MemoryDriver;
pub use mssql::MssqlDriver;
pub use mysql::MysqlDriver;
pub use postgres::PostgresDriver;

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ConnectionConfig;
use crate::core::traits::{Connection, Driver};
use crate::error::{ConvertError, Result};

/// Canonical engine name for a configured engine string.
pub fn canonical_engine(engine: &str) -> Option<&'static str> {
    match engine.to_lowercase().as_str() {
        "postgres" | "postgresql" | "pg" => Some("postgres"),
        "mssql" | "sqlserver" | "sql_server" => Some("mssql"),
        "mysql" | "mariadb" => Some("mysql"),
        "memory" => Some("memory"),
        _ => None,
    }
}

/// Drivers keyed by canonical engine name.
#[derive(Clone)]
pub struct DriverRegistry {
    drivers: HashMap<&'static str, Arc<dyn Driver>>,
}

impl DriverRegistry {
    /// Registry without any driver.
    pub fn empty() -> Self {
        Self {
            drivers: HashMap::new(),
        }
    }

    /// Registry with the PostgreSQL, SQL Server, MySQL and memory drivers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(PostgresDriver));
        registry.register(Arc::new(MssqlDriver));
        registry.register(Arc::new(MysqlDriver));
        registry.register(Arc::new(MemoryDriver::new()));
        registry
    }

    /// Add or replace the driver for its engine.
    pub fn register(&mut self, driver: Arc<dyn Driver>) {
        self.drivers.insert(driver.engine(), driver);
    }

    /// Look up the driver for an engine name or alias.
    pub fn get(&self, engine: &str) -> Result<Arc<dyn Driver>> {
        canonical_engine(engine)
            .and_then(|name| self.drivers.get(name))
            .cloned()
            .ok_or_else(|| {
                ConvertError::Config(format!(
                    "Unknown database engine: '{}'. Supported engines: {}",
                    engine,
                    self.engines().join(", ")
                ))
            })
    }

    /// Open a connection using the driver for the config's engine.
    pub async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        self.get(&config.engine)?.connect(config).await
    }

    /// Registered engine names, sorted.
    pub fn engines(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.drivers.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("engines", &self.engines())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_engine() {
        assert_eq!(canonical_engine("postgres"), Some("postgres"));
        assert_eq!(canonical_engine("PostgreSQL"), Some("postgres"));
        assert_eq!(canonical_engine("pg"), Some("postgres"));
        assert_eq!(canonical_engine("sqlserver"), Some("mssql"));
        assert_eq!(canonical_engine("MariaDB"), Some("mysql"));
        assert_eq!(canonical_engine("memory"), Some("memory"));
        assert_eq!(canonical_engine("oracle"), None);
    }

    #[test]
    fn test_registry_lookup() {
        let registry = DriverRegistry::with_builtins();
        assert_eq!(registry.engines(), vec!["memory", "mssql", "mysql", "postgres"]);
        assert_eq!(registry.get("pg").unwrap().engine(), "postgres");
        assert!(registry.get("oracle").is_err());
    }

    #[test]
    fn test_register_replaces_driver() {
        let mut registry = DriverRegistry::empty();
        assert!(registry.get("memory").is_err());
        registry.register(Arc::new(MemoryDriver::new()));
        assert!(registry.get("memory").is_ok());
    }
}
