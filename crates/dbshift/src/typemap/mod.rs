//! Conversion maps from generic type codes to target type names.
//!
//! A map is a JSON object keyed by generic code (as a string):
//!
//! ```json
//! { "12": "VARCHAR", "4": "INTEGER", "93": "TIMESTAMP" }
//! ```
//!
//! Maps for `postgres`, `mssql` and `mysql` are compiled in. A file named
//! `<dialect>.json` in the configured maps directory takes precedence, which
//! is also how other dialects are added.

use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

use crate::error::{ConvertError, Result};

/// Target type name used when a generic code has no mapping.
pub const INVALID_TYPE: &str = "INVALID";

const BUILTIN_POSTGRES: &str = include_str!("../../maps/postgres.json");
const BUILTIN_MSSQL: &str = include_str!("../../maps/mssql.json");
const BUILTIN_MYSQL: &str = include_str!("../../maps/mysql.json");

/// Engine family of a target dialect name.
///
/// Drives the literal syntax that differs between engines (booleans and
/// binary strings). Dialects only known through a maps directory file are
/// [`TargetDialect::Standard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetDialect {
    Postgres,
    Mssql,
    Mysql,
    Standard,
}

impl TargetDialect {
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Self::Postgres,
            "mssql" | "sqlserver" | "sql_server" => Self::Mssql,
            "mysql" | "mariadb" => Self::Mysql,
            _ => Self::Standard,
        }
    }
}

/// Generic code to target type name lookup for one dialect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionMap {
    dialect: String,
    types: HashMap<i32, String>,
}

impl ConversionMap {
    pub fn new(dialect: impl Into<String>, types: HashMap<i32, String>) -> Self {
        Self {
            dialect: dialect.into(),
            types,
        }
    }

    /// Load the map for a dialect, preferring `<maps_dir>/<dialect>.json`.
    pub fn load(dialect: &str, maps_dir: Option<&Path>) -> Result<Self> {
        let dialect = dialect.trim().to_lowercase();

        if let Some(dir) = maps_dir {
            let path = dir.join(format!("{}.json", dialect));
            if path.is_file() {
                debug!("Loading conversion map from {}", path.display());
                let content = std::fs::read_to_string(&path)?;
                return Self::from_json(&dialect, &content);
            }
        }

        let builtin = match TargetDialect::from_name(&dialect) {
            TargetDialect::Postgres => BUILTIN_POSTGRES,
            TargetDialect::Mssql => BUILTIN_MSSQL,
            TargetDialect::Mysql => BUILTIN_MYSQL,
            TargetDialect::Standard => {
                return Err(ConvertError::Config(format!(
                    "No conversion map for target dialect '{}'",
                    dialect
                )))
            }
        };
        Self::from_json(&dialect, builtin)
    }

    /// Parse a map from its JSON text.
    pub fn from_json(dialect: &str, content: &str) -> Result<Self> {
        let raw: HashMap<String, String> = serde_json::from_str(content)?;
        let mut types = HashMap::with_capacity(raw.len());
        for (key, type_name) in raw {
            let code = key.trim().parse::<i32>().map_err(|_| {
                ConvertError::Config(format!(
                    "Conversion map '{}': key '{}' is not a type code",
                    dialect, key
                ))
            })?;
            types.insert(code, type_name);
        }
        Ok(Self::new(dialect, types))
    }

    pub fn dialect(&self) -> &str {
        &self.dialect
    }

    pub fn target_dialect(&self) -> TargetDialect {
        TargetDialect::from_name(&self.dialect)
    }

    /// Mapped type name, if the code is known.
    pub fn get(&self, generic_type: i32) -> Option<&str> {
        self.types.get(&generic_type).map(String::as_str)
    }

    /// Mapped type name, or [`INVALID_TYPE`].
    pub fn target_type(&self, generic_type: i32) -> &str {
        self.get(generic_type).unwrap_or(INVALID_TYPE)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
