//! Error types for the migration library.

use std::collections::BTreeMap;

use thiserror::Error;
use uuid::Uuid;

/// Exit code for configuration errors.
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code for origin/target connectivity errors.
pub const EXIT_CONNECTION_ERROR: u8 = 2;
/// Exit code for catalog introspection errors.
pub const EXIT_INTROSPECTION_ERROR: u8 = 3;
/// Exit code for table dump failures.
pub const EXIT_EXTRACTION_ERROR: u8 = 4;
/// Exit code for schema problems found during transformation.
pub const EXIT_SCHEMA_ERROR: u8 = 5;
/// Exit code for load failures.
pub const EXIT_LOAD_ERROR: u8 = 6;
/// Exit code for file system errors.
pub const EXIT_IO_ERROR: u8 = 7;
/// Exit code for validation failures.
pub const EXIT_VALIDATION_ERROR: u8 = 8;
/// Exit code for everything else.
pub const EXIT_INTERNAL_ERROR: u8 = 9;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum ConvertError {
    /// Configuration error (invalid YAML, missing fields, unknown engine, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Origin or target database could not be reached.
    #[error("Connection to {endpoint} failed: {message}")]
    Connection { endpoint: String, message: String },

    /// A catalog query failed during schema introspection.
    #[error("Schema introspection failed: {0}")]
    Introspection(String),

    /// One or more tables could not be dumped.
    #[error("Extraction failed for {} table(s): {}", failures.len(), format_failures(failures))]
    TableDump { failures: BTreeMap<String, String> },

    /// The dump pool did not drain within the configured limit.
    #[error("Table dump did not finish within {0} seconds")]
    DumpTimeout(u64),

    /// Foreign keys form a cycle, so no creation order exists.
    #[error("Circular foreign key dependency between tables: {}", tables.join(", "))]
    CyclicDependency { tables: Vec<String> },

    /// Applying a DDL or DML artifact against the target failed.
    #[error("Load failed for table {table} ({phase}): {message}")]
    Load {
        table: String,
        phase: &'static str,
        message: String,
    },

    /// The consistency validation collaborator failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A background stage ended in ERROR.
    #[error("Migration {stage} stage failed: {message}")]
    StageFailed {
        stage: &'static str,
        message: String,
    },

    /// No migration with the given id exists.
    #[error("Migration '{0}' not found")]
    UnknownMigration(Uuid),

    /// A stage was triggered from a state that does not precede it.
    #[error("Migration '{id}' cannot move from {from} to {to}")]
    InvalidTransition { id: Uuid, from: String, to: String },

    /// An artifact name would escape its directory.
    #[error("Invalid artifact name '{0}'")]
    InvalidArtifactName(String),

    /// A stage was triggered after the service was shut down.
    #[error("Migration service is shut down")]
    ServiceStopped,

    /// PostgreSQL driver error.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// SQL Server driver error.
    #[error("SQL Server error: {0}")]
    Mssql(#[from] tiberius::error::Error),

    /// MySQL driver error.
    #[error("MySQL error: {0}")]
    Mysql(#[from] sqlx::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn format_failures(failures: &BTreeMap<String, String>) -> String {
    failures
        .iter()
        .map(|(table, message)| format!("{}: {}", table, message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ConvertError {
    /// Create a Connection error for an endpoint.
    pub fn connection(endpoint: impl Into<String>, message: impl ToString) -> Self {
        ConvertError::Connection {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    /// Create a Load error.
    pub fn load(table: impl Into<String>, phase: &'static str, message: impl ToString) -> Self {
        ConvertError::Load {
            table: table.into(),
            phase,
            message: message.to_string(),
        }
    }

    /// Wrap an engine error raised by a catalog query.
    pub fn introspection(context: &str, err: impl std::fmt::Display) -> Self {
        ConvertError::Introspection(format!("{}: {}", context, err))
    }

    /// Process exit code for this error category.
    pub fn exit_code(&self) -> u8 {
        match self {
            ConvertError::Config(_) | ConvertError::Yaml(_) => EXIT_CONFIG_ERROR,
            ConvertError::Connection { .. }
            | ConvertError::Postgres(_)
            | ConvertError::Mssql(_)
            | ConvertError::Mysql(_) => EXIT_CONNECTION_ERROR,
            ConvertError::Introspection(_) => EXIT_INTROSPECTION_ERROR,
            ConvertError::TableDump { .. } | ConvertError::DumpTimeout(_) => EXIT_EXTRACTION_ERROR,
            ConvertError::CyclicDependency { .. } => EXIT_SCHEMA_ERROR,
            ConvertError::Load { .. } => EXIT_LOAD_ERROR,
            ConvertError::Io(_) => EXIT_IO_ERROR,
            ConvertError::Validation(_) => EXIT_VALIDATION_ERROR,
            ConvertError::StageFailed { stage, .. } => match *stage {
                "extraction" => EXIT_EXTRACTION_ERROR,
                "transformation" => EXIT_SCHEMA_ERROR,
                "load" => EXIT_LOAD_ERROR,
                "validation" => EXIT_VALIDATION_ERROR,
                _ => EXIT_INTERNAL_ERROR,
            },
            ConvertError::UnknownMigration(_)
            | ConvertError::InvalidTransition { .. }
            | ConvertError::InvalidArtifactName(_)
            | ConvertError::ServiceStopped
            | ConvertError::Json(_) => EXIT_INTERNAL_ERROR,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, ConvertError>;
