//! # dbshift
//!
//! Schema and data migration between relational databases.
//!
//! A migration runs through four stages, each started by its own trigger:
//!
//! - **Extract**: introspect the origin schema and dump every table to
//!   JSON Lines, concurrently and with per-table failure isolation
//! - **Transform**: map column types to the target dialect, order tables by
//!   foreign keys and generate DDL/DML artifacts
//! - **Load**: apply all DDL, then all DML, to the target
//! - **Validate**: compare origin and target
//!
//! Generated DDL can be reviewed and edited between transformation and load.
//!
//! ## Example
//!
//! ```rust,no_run
//! use dbshift::{Config, EtlStep, MigrationService};
//!
//! #[tokio::main]
//! async fn main() -> dbshift::Result<()> {
//!     let config = Config::load("config.yaml")?.with_auto_tuning();
//!     let service = MigrationService::new(&config);
//!
//!     let id = service.create("nightly").id;
//!     if let Some(origin) = config.origin.clone() {
//!         service.start_extraction(id, origin)?;
//!     }
//!     service.wait_idle().await;
//!     assert_eq!(service.status(id)?.step, EtlStep::ExtractionFinished);
//!     Ok(())
//! }
//! ```

pub mod artifacts;
pub mod config;
pub mod core;
pub mod dependency;
pub mod drivers;
pub mod error;
pub mod extract;
pub mod load;
pub mod notify;
pub mod orchestrator;
pub mod sqlgen;
pub mod state;
pub mod transform;
pub mod typemap;
pub mod validate;

// Re-exports for convenient access
pub use artifacts::{MigrationWorkspace, SqlFile, SqlKind, SqlPage};
pub use config::{Config, ConnectionConfig, ExtractionConfig, SystemResources};
pub use crate::core::{
    ColumnDefinition, Connection, DatabaseDefinition, Driver, ForeignKeyDefinition, Row, RowValue,
    TableDefinition,
};
pub use drivers::{DriverRegistry, MemoryDriver, MssqlDriver, MysqlDriver, PostgresDriver};
pub use error::{ConvertError, Result};
pub use extract::{DumpSummary, MetadataExtractor, TableDumper};
pub use load::{LoadExecutor, LoadSummary};
pub use notify::{BroadcastNotifier, FanoutNotifier, StatusEvent, StatusNotifier, TracingNotifier};
pub use orchestrator::MigrationService;
pub use state::{EtlStep, MigrationStatus, StatusSnapshot, StatusStore};
pub use transform::{TransformationResult, Transformer};
pub use typemap::{ConversionMap, TargetDialect};
pub use validate::{ConsistencyValidator, RowCountValidator, ValidationReport};
