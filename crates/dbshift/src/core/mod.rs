//! Core abstractions for engine-agnostic migration.
//!
//! - [`schema`]: database, table, column and foreign key definitions
//! - [`generic`]: cross-engine type codes
//! - [`value`]: row values carried between stages
//! - [`traits`]: driver and connection seams implemented in `drivers`

pub mod generic;
pub mod schema;
pub mod traits;
pub mod value;

pub use schema::{
    ColumnBuilder, ColumnDefinition, DatabaseDefinition, ForeignKeyDefinition, TableDefinition,
};
pub use traits::{Connection, Driver, ImportedKey, IndexColumn, RowStream, TableRef};
pub use value::{Row, RowValue};
