//! Configuration validation.

use super::{Config, ConnectionConfig};
use crate::drivers::canonical_engine;
use crate::error::{ConvertError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    if config.data_dir.as_os_str().is_empty() {
        return Err(ConvertError::Config("data_dir must not be empty".into()));
    }

    // Extraction config validation - only check if explicitly set
    if let Some(0) = config.extraction.workers {
        return Err(ConvertError::Config(
            "extraction.workers must be at least 1".into(),
        ));
    }
    if let Some(0) = config.extraction.connection_batch {
        return Err(ConvertError::Config(
            "extraction.connection_batch must be at least 1".into(),
        ));
    }
    if config.extraction.timeout_secs == 0 {
        return Err(ConvertError::Config(
            "extraction.timeout_secs must be at least 1".into(),
        ));
    }

    if let Some(origin) = &config.origin {
        validate_connection("origin", origin)?;
    }
    if let Some(target) = &config.target {
        validate_connection("target", target)?;
    }

    if let Some(dialect) = &config.target_dialect {
        if dialect.trim().is_empty() {
            return Err(ConvertError::Config(
                "target_dialect must not be empty".into(),
            ));
        }
    }

    Ok(())
}

/// Validate one connection section.
pub fn validate_connection(section: &str, conn: &ConnectionConfig) -> Result<()> {
    let engine = canonical_engine(&conn.engine).ok_or_else(|| {
        ConvertError::Config(format!(
            "{}.engine must be one of postgres, mssql, mysql, memory; got '{}'",
            section, conn.engine
        ))
    })?;

    if conn.name.trim().is_empty() {
        return Err(ConvertError::Config(format!("{}.name is required", section)));
    }
    if conn.database.is_empty() {
        return Err(ConvertError::Config(format!(
            "{}.database is required",
            section
        )));
    }
    if engine != "memory" && conn.host.is_empty() {
        return Err(ConvertError::Config(format!("{}.host is required", section)));
    }

    Ok(())
}
