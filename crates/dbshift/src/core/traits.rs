//! Core traits for engine-agnostic migration.
//!
//! - [`Driver`]: opens connections for one database engine
//! - [`Connection`]: a single, task-owned session used for catalog queries,
//!   full-table reads and statement execution
//!
//! Stages never share a connection between tasks; each task asks the driver
//! for its own.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::config::ConnectionConfig;
use crate::error::Result;

use super::schema::{ColumnDefinition, TableDefinition};
use super::value::Row;

/// Stream of rows read from a table cursor.
pub type RowStream<'a> = BoxStream<'a, Result<Row>>;

/// A table as listed by the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

/// One column pair of a foreign key, as the catalog reports imported keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedKey {
    /// Constraint name; rows sharing it belong to one foreign key.
    pub constraint_name: String,
    /// Table holding the referenced key.
    pub referenced_table: String,
    /// Column in the referencing table.
    pub local_column: String,
    /// Column in the referenced table.
    pub referenced_column: String,
    /// 1-based position of the pair within the key.
    pub key_seq: i32,
}

/// One column of an index, as the catalog reports index info.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexColumn {
    pub index_name: Option<String>,
    pub column_name: Option<String>,
    pub non_unique: bool,
}

/// A session against one database.
#[async_trait]
pub trait Connection: Send {
    /// Engine identifier (e.g., "postgres", "mssql").
    fn engine(&self) -> &str;

    // ===== Catalog =====

    /// Current catalog (database) name.
    async fn catalog(&mut self) -> Result<String>;

    /// Schema that introspection and reads default to.
    async fn schema(&mut self) -> Result<String>;

    /// Character encoding reported by the server, if any.
    async fn encoding(&mut self) -> Result<Option<String>>;

    /// Base tables in a schema, in catalog order.
    async fn list_tables(&mut self, schema: &str) -> Result<Vec<TableRef>>;

    /// Primary key column names in key order.
    async fn primary_keys(&mut self, schema: &str, table: &str) -> Result<Vec<String>>;

    /// Columns in ordinal order, without target types.
    async fn columns(&mut self, schema: &str, table: &str) -> Result<Vec<ColumnDefinition>>;

    /// Foreign key column pairs declared on a table.
    async fn imported_keys(&mut self, schema: &str, table: &str) -> Result<Vec<ImportedKey>>;

    /// Columns of the table's unique indexes.
    async fn index_columns(&mut self, schema: &str, table: &str) -> Result<Vec<IndexColumn>>;

    // ===== Data =====

    /// Read every row of a table, streamed from the server cursor.
    async fn stream_rows<'a>(&'a mut self, table: &'a TableDefinition) -> Result<RowStream<'a>>;

    /// Count the rows of a table.
    async fn count_rows(&mut self, schema: &str, table: &str) -> Result<i64>;

    // ===== Target =====

    /// Execute one statement, returning the affected row count.
    async fn execute(&mut self, sql: &str) -> Result<u64>;

    /// Close the session.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Opens connections for one database engine.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Engine identifier this driver serves.
    fn engine(&self) -> &'static str;

    /// Open a new connection.
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>>;
}
