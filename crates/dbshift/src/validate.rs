//! Post-load consistency validation.
//!
//! The orchestrator only relies on [`ConsistencyValidator`]: given both
//! endpoints and the migrated definition it returns human-readable messages.
//! [`RowCountValidator`] is the default implementation.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::ConnectionConfig;
use crate::core::schema::DatabaseDefinition;
use crate::drivers::DriverRegistry;
use crate::error::{ConvertError, Result};

/// Outcome of a validation run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationReport {
    pub messages: Vec<String>,
    /// Number of tables found inconsistent.
    pub mismatches: usize,
}

impl ValidationReport {
    pub fn is_consistent(&self) -> bool {
        self.mismatches == 0
    }
}

/// Compares origin and target after loading.
#[async_trait]
pub trait ConsistencyValidator: Send + Sync {
    async fn validate(
        &self,
        origin: &ConnectionConfig,
        target: &ConnectionConfig,
        database: &DatabaseDefinition,
    ) -> Result<ValidationReport>;
}

/// Compares per-table row counts between origin and target.
#[derive(Debug, Clone)]
pub struct RowCountValidator {
    registry: DriverRegistry,
}

impl RowCountValidator {
    pub fn new(registry: DriverRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ConsistencyValidator for RowCountValidator {
    async fn validate(
        &self,
        origin: &ConnectionConfig,
        target: &ConnectionConfig,
        database: &DatabaseDefinition,
    ) -> Result<ValidationReport> {
        let mut source = self.registry.connect(origin).await?;
        let mut dest = self.registry.connect(target).await?;
        let mut report = ValidationReport::default();

        for table in &database.tables {
            let name = table.full_name();
            let expected = source
                .count_rows(&table.schema, &table.name)
                .await
                .map_err(|e| ConvertError::Validation(format!("{} (origin): {}", name, e)))?;
            let actual = dest
                .count_rows(&table.schema, &table.name)
                .await
                .map_err(|e| ConvertError::Validation(format!("{} (target): {}", name, e)))?;

            if expected == actual {
                report
                    .messages
                    .push(format!("{}: {} rows, OK", name, actual));
            } else {
                warn!("{}: origin has {} rows, target has {}", name, expected, actual);
                report.mismatches += 1;
                report.messages.push(format!(
                    "{}: origin has {} rows, target has {}",
                    name, expected, actual
                ));
            }
        }

        report.messages.push(format!(
            "{} of {} tables consistent",
            database.tables.len() - report.mismatches,
            database.tables.len()
        ));
        info!(
            "Validation complete: {} mismatched tables",
            report.mismatches
        );

        let closed_source = source.close().await;
        let closed_dest = dest.close().await;
        closed_source?;
        closed_dest?;
        Ok(report)
    }
}
