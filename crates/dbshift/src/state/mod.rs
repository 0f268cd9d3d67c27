//! Migration status aggregate and the store that owns it.

mod store;

pub use store::StatusStore;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ConnectionConfig;
use crate::core::schema::DatabaseDefinition;

/// Migration state machine steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EtlStep {
    Created,
    ExtractionInProgress,
    ExtractionFinished,
    TransformationInProgress,
    TransformationFinished,
    WaitingForLoadConfirmation,
    LoadInProgress,
    LoadFinished,
    ValidationInProgress,
    Finished,
    Error,
}

impl EtlStep {
    pub fn as_str(self) -> &'static str {
        match self {
            EtlStep::Created => "CREATED",
            EtlStep::ExtractionInProgress => "EXTRACTION_IN_PROGRESS",
            EtlStep::ExtractionFinished => "EXTRACTION_FINISHED",
            EtlStep::TransformationInProgress => "TRANSFORMATION_IN_PROGRESS",
            EtlStep::TransformationFinished => "TRANSFORMATION_FINISHED",
            EtlStep::WaitingForLoadConfirmation => "WAITING_FOR_LOAD_CONFIRMATION",
            EtlStep::LoadInProgress => "LOAD_IN_PROGRESS",
            EtlStep::LoadFinished => "LOAD_FINISHED",
            EtlStep::ValidationInProgress => "VALIDATION_IN_PROGRESS",
            EtlStep::Finished => "FINISHED",
            EtlStep::Error => "ERROR",
        }
    }

    /// No further transition leaves this step.
    pub fn is_terminal(self) -> bool {
        matches!(self, EtlStep::Finished | EtlStep::Error)
    }
}

impl fmt::Display for EtlStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs and intermediate results carried between stages.
#[derive(Debug, Clone, Default)]
pub struct MigrationMetadata {
    pub origin: Option<ConnectionConfig>,
    pub target: Option<ConnectionConfig>,
    pub target_dialect: Option<String>,
    /// Extracted definition, replaced by the transformed one.
    pub database: Option<DatabaseDefinition>,
    /// Qualified table names, referenced tables first.
    pub execution_order: Vec<String>,
}

/// One migration's status. Stored behind an `Arc` and replaced, never
/// mutated in place, once it is in a [`StatusStore`].
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    pub id: Uuid,
    pub name: String,
    pub step: EtlStep,
    /// Last error, or the validation summary once finished.
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
    /// Incremented by every store update.
    pub version: u64,
    pub metadata: MigrationMetadata,
}

impl MigrationStatus {
    /// A new migration in [`EtlStep::Created`].
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            step: EtlStep::Created,
            message: None,
            started_at: now,
            finished_at: None,
            last_updated: now,
            version: 0,
            metadata: MigrationMetadata::default(),
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            id: self.id,
            name: self.name.clone(),
            step: self.step,
            message: self.message.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            last_updated: self.last_updated,
            version: self.version,
        }
    }
}

/// Status as published to observers, without connection details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub id: Uuid,
    pub name: String,
    pub step: EtlStep,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
    pub version: u64,
}
