//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

impl ConnectionConfig {
    /// Port to dial, falling back to the engine's standard port.
    pub fn get_port(&self) -> u16 {
        self.port
            .unwrap_or(match crate::drivers::canonical_engine(&self.engine) {
                Some("mssql") => 1433,
                Some("mysql") => 3306,
                _ => 5432,
            })
    }

    /// Validate a connection given at runtime; `section` names it in errors.
    pub fn validate(&self, section: &str) -> Result<()> {
        validation::validate_connection(section, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_yaml_with_defaults() {
        let config = Config::from_yaml(
            r#"
origin:
  name: legacy
  engine: mssql
  host: db1
  database: shop
  user: sa
  password: secret
"#,
        )
        .unwrap();

        assert_eq!(config.data_dir, std::path::PathBuf::from("migrations"));
        assert_eq!(config.extraction.timeout_secs, 1800);
        assert_eq!(config.extraction.workers, None);

        let origin = config.origin.unwrap();
        assert_eq!(origin.get_port(), 1433);
        assert_eq!(origin.ssl_mode, "disable");
        assert!(origin.schema.is_none());
    }

    #[test]
    fn test_default_ports() {
        let mut conn = ConnectionConfig::new("shop", "mysql", "shop");
        assert_eq!(conn.get_port(), 3306);
        conn.engine = "postgresql".into();
        assert_eq!(conn.get_port(), 5432);
        conn.port = Some(6000);
        assert_eq!(conn.get_port(), 6000);
    }

    #[test]
    fn test_connection_batch_capped_by_workers() {
        let config = Config::from_yaml(
            r#"
extraction:
  workers: 3
  connection_batch: 10
"#,
        )
        .unwrap();
        assert_eq!(config.extraction.get_workers(), 3);
        assert_eq!(config.extraction.get_connection_batch(), 3);
    }

    #[test]
    fn test_default_workers_follow_cpu_cores() {
        let extraction = ExtractionConfig::default();
        let expected = (SystemResources::detect().cpu_cores * 2).max(1);
        assert_eq!(extraction.get_workers(), expected);
        assert_eq!(extraction.get_connection_batch(), expected);
    }

    #[test]
    fn test_connection_batch_defaults_to_workers() {
        let extraction = ExtractionConfig {
            workers: Some(6),
            ..Default::default()
        };
        assert_eq!(extraction.get_connection_batch(), 6);
    }

    #[test]
    fn test_auto_tuning_keeps_explicit_workers() {
        let resources = SystemResources {
            total_memory_gb: 8.0,
            cpu_cores: 4,
        };
        let tuned = ExtractionConfig {
            workers: Some(3),
            ..Default::default()
        }
        .with_auto_tuning(&resources);
        assert_eq!(tuned.workers, Some(3));

        let tuned = ExtractionConfig::default().with_auto_tuning(&resources);
        assert_eq!(tuned.workers, Some(8));
    }
}
