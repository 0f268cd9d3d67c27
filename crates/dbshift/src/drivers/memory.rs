//! In-process engine over shared tables.
//!
//! Databases live in the driver and are shared by every connection opened
//! through it (or any clone of it), so a test can seed an origin, run a
//! migration against it and inspect what reached the target. Statements
//! executed on a memory connection are recorded rather than interpreted:
//! `INSERT INTO` statements bump the target row count of their table.
//!
//! Failures can be injected per table (the row cursor breaks after a number
//! of rows, or never yields) and per statement (any statement containing a
//! marker fails). The driver also tracks how many connections are open at
//! once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;
use parking_lot::Mutex;

use crate::config::ConnectionConfig;
use crate::core::schema::{ColumnDefinition, TableDefinition};
use crate::core::traits::{Connection, Driver, ImportedKey, IndexColumn, RowStream, TableRef};
use crate::core::value::{Row, RowValue};
use crate::error::{ConvertError, Result};

const DEFAULT_SCHEMA: &str = "main";

#[derive(Debug, Clone)]
struct MemoryTable {
    definition: TableDefinition,
    rows: Vec<Row>,
    fail_after: Option<usize>,
    stalled: bool,
}

#[derive(Debug, Default)]
struct MemoryDatabase {
    encoding: Option<String>,
    tables: Vec<MemoryTable>,
    executed: Vec<String>,
    inserted: HashMap<String, i64>,
    fail_on: Vec<String>,
    row_delay: Option<Duration>,
}

impl MemoryDatabase {
    fn table(&self, schema: &str, name: &str) -> Option<&MemoryTable> {
        self.tables
            .iter()
            .find(|t| t.definition.schema == schema && t.definition.name == name)
    }

    fn table_mut(&mut self, schema: &str, name: &str) -> Option<&mut MemoryTable> {
        self.tables
            .iter_mut()
            .find(|t| t.definition.schema == schema && t.definition.name == name)
    }
}

type Databases = Arc<Mutex<HashMap<String, MemoryDatabase>>>;

/// Open and peak connection counts.
#[derive(Debug, Default)]
struct ConnectionGauge {
    open: AtomicUsize,
    peak: AtomicUsize,
}

impl ConnectionGauge {
    fn lease(self: &Arc<Self>) -> ConnectionLease {
        let open = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(open, Ordering::SeqCst);
        ConnectionLease(Arc::clone(self))
    }
}

/// Counts a connection as open until dropped.
struct ConnectionLease(Arc<ConnectionGauge>);

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        self.0.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Driver for the in-process engine. Clones share the same databases.
#[derive(Debug, Clone, Default)]
pub struct MemoryDriver {
    databases: Databases,
    gauge: Arc<ConnectionGauge>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty database (no-op if it exists).
    pub fn create_database(&self, database: &str) {
        self.databases
            .lock()
            .entry(database.to_string())
            .or_default();
    }

    /// Set the encoding reported by a database.
    pub fn set_encoding(&self, database: &str, encoding: &str) {
        let mut databases = self.databases.lock();
        databases.entry(database.to_string()).or_default().encoding = Some(encoding.to_string());
    }

    /// Add (or replace) a table and its rows, creating the database if needed.
    pub fn add_table(&self, database: &str, definition: TableDefinition, rows: Vec<Row>) {
        let mut databases = self.databases.lock();
        let db = databases.entry(database.to_string()).or_default();
        db.tables.retain(|t| {
            !(t.definition.schema == definition.schema && t.definition.name == definition.name)
        });
        db.tables.push(MemoryTable {
            definition,
            rows,
            fail_after: None,
            stalled: false,
        });
    }

    /// Make the row cursor of a table fail after `rows` rows.
    pub fn fail_table_after(&self, database: &str, schema: &str, table: &str, rows: usize) {
        let mut databases = self.databases.lock();
        if let Some(t) = databases
            .get_mut(database)
            .and_then(|db| db.table_mut(schema, table))
        {
            t.fail_after = Some(rows);
        }
    }

    /// Make the row cursor of a table wait forever for its first row.
    pub fn stall_table(&self, database: &str, schema: &str, table: &str) {
        let mut databases = self.databases.lock();
        if let Some(t) = databases
            .get_mut(database)
            .and_then(|db| db.table_mut(schema, table))
        {
            t.stalled = true;
        }
    }

    /// Pause before yielding each row read from a database.
    pub fn set_row_delay(&self, database: &str, delay: Duration) {
        let mut databases = self.databases.lock();
        databases.entry(database.to_string()).or_default().row_delay = Some(delay);
    }

    /// Connections currently open through this driver and its clones.
    pub fn open_connections(&self) -> usize {
        self.gauge.open.load(Ordering::SeqCst)
    }

    /// Most connections ever open at the same time.
    pub fn peak_connections(&self) -> usize {
        self.gauge.peak.load(Ordering::SeqCst)
    }

    /// Make every statement containing `marker` fail.
    pub fn fail_statements_containing(&self, database: &str, marker: &str) {
        let mut databases = self.databases.lock();
        databases
            .entry(database.to_string())
            .or_default()
            .fail_on
            .push(marker.to_string());
    }

    /// Statements executed against a database, in order.
    pub fn executed(&self, database: &str) -> Vec<String> {
        self.databases
            .lock()
            .get(database)
            .map(|db| db.executed.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    fn engine(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        if !self.databases.lock().contains_key(&config.database) {
            return Err(ConvertError::connection(
                config.endpoint(),
                format!("database '{}' does not exist", config.database),
            ));
        }
        Ok(Box::new(MemoryConnection {
            databases: Arc::clone(&self.databases),
            database: config.database.clone(),
            schema: config
                .schema
                .clone()
                .unwrap_or_else(|| DEFAULT_SCHEMA.to_string()),
            _lease: self.gauge.lease(),
        }))
    }
}

/// Connection to one in-process database.
pub struct MemoryConnection {
    databases: Databases,
    database: String,
    schema: String,
    _lease: ConnectionLease,
}

impl MemoryConnection {
    fn with_db<T>(&self, f: impl FnOnce(&mut MemoryDatabase) -> Result<T>) -> Result<T> {
        let mut databases = self.databases.lock();
        let db = databases.get_mut(&self.database).ok_or_else(|| {
            ConvertError::connection(
                format!("memory:///{}", self.database),
                "database was dropped",
            )
        })?;
        f(db)
    }

    fn definition(&self, schema: &str, table: &str) -> Result<TableDefinition> {
        self.with_db(|db| {
            db.table(schema, table)
                .map(|t| t.definition.clone())
                .ok_or_else(|| {
                    ConvertError::Introspection(format!("table {}.{} not found", schema, table))
                })
        })
    }
}

/// Target table name of an `INSERT INTO <name> (...)` statement.
fn insert_target(sql: &str) -> Option<&str> {
    let rest = sql.trim_start().strip_prefix("INSERT INTO ")?;
    rest.split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .filter(|name| !name.is_empty())
}

#[async_trait]
impl Connection for MemoryConnection {
    fn engine(&self) -> &str {
        "memory"
    }

    async fn catalog(&mut self) -> Result<String> {
        Ok(self.database.clone())
    }

    async fn schema(&mut self) -> Result<String> {
        Ok(self.schema.clone())
    }

    async fn encoding(&mut self) -> Result<Option<String>> {
        self.with_db(|db| Ok(db.encoding.clone()))
    }

    async fn list_tables(&mut self, schema: &str) -> Result<Vec<TableRef>> {
        self.with_db(|db| {
            Ok(db
                .tables
                .iter()
                .filter(|t| t.definition.schema == schema)
                .map(|t| TableRef {
                    schema: t.definition.schema.clone(),
                    name: t.definition.name.clone(),
                })
                .collect())
        })
    }

    async fn primary_keys(&mut self, schema: &str, table: &str) -> Result<Vec<String>> {
        Ok(self.definition(schema, table)?.primary_key)
    }

    async fn columns(&mut self, schema: &str, table: &str) -> Result<Vec<ColumnDefinition>> {
        Ok(self
            .definition(schema, table)?
            .columns
            .into_iter()
            .map(|mut c| {
                c.target_type = None;
                c
            })
            .collect())
    }

    async fn imported_keys(&mut self, schema: &str, table: &str) -> Result<Vec<ImportedKey>> {
        let definition = self.definition(schema, table)?;
        Ok(definition
            .foreign_keys
            .iter()
            .flat_map(|fk| {
                fk.column_pairs
                    .iter()
                    .enumerate()
                    .map(move |(i, (local, referenced))| ImportedKey {
                        constraint_name: fk.name.clone(),
                        referenced_table: fk.referenced_table.clone(),
                        local_column: local.clone(),
                        referenced_column: referenced.clone(),
                        key_seq: i as i32 + 1,
                    })
            })
            .collect())
    }

    async fn index_columns(&mut self, schema: &str, table: &str) -> Result<Vec<IndexColumn>> {
        let definition = self.definition(schema, table)?;

        // The primary key index is reported too, as catalogs do.
        let pk_index = definition.primary_key.iter().map(|col| IndexColumn {
            index_name: Some(format!("pk_{}", definition.name)),
            column_name: Some(col.clone()),
            non_unique: false,
        });
        let unique_indexes = definition
            .unique_constraints
            .iter()
            .enumerate()
            .flat_map(|(i, group)| {
                let name = format!("uq_{}_{}", definition.name, i + 1);
                group.iter().map(move |col| IndexColumn {
                    index_name: Some(name.clone()),
                    column_name: Some(col.clone()),
                    non_unique: false,
                })
            });

        Ok(pk_index.chain(unique_indexes).collect())
    }

    async fn stream_rows<'a>(&'a mut self, table: &'a TableDefinition) -> Result<RowStream<'a>> {
        let (rows, fail_after, stalled, delay) = self.with_db(|db| {
            let t = db.table(&table.schema, &table.name).ok_or_else(|| {
                ConvertError::Introspection(format!("table {} not found", table.full_name()))
            })?;
            Ok((t.rows.clone(), t.fail_after, t.stalled, db.row_delay))
        })?;

        if stalled {
            return Ok(stream::pending::<Result<Row>>().boxed());
        }

        let mut items: Vec<Result<Row>> = rows
            .into_iter()
            .take(fail_after.unwrap_or(usize::MAX))
            .map(|row| {
                Ok(table
                    .column_names()
                    .map(|name| {
                        let value = row.get(name).cloned().unwrap_or(RowValue::Null);
                        (name.to_string(), value)
                    })
                    .collect())
            })
            .collect();

        if fail_after.is_some() {
            items.push(Err(ConvertError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                format!("cursor on {} was reset", table.full_name()),
            ))));
        }

        match delay {
            Some(delay) => Ok(stream::iter(items)
                .then(move |item| async move {
                    tokio::time::sleep(delay).await;
                    item
                })
                .boxed()),
            None => Ok(stream::iter(items).boxed()),
        }
    }

    async fn count_rows(&mut self, schema: &str, table: &str) -> Result<i64> {
        let qualified = if schema.is_empty() {
            table.to_string()
        } else {
            format!("{}.{}", schema, table)
        };
        self.with_db(|db| {
            let seeded = db.table(schema, table).map(|t| t.rows.len() as i64);
            let inserted = db.inserted.get(&qualified).copied();
            Ok(seeded.unwrap_or(0) + inserted.unwrap_or(0))
        })
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        self.with_db(|db| {
            if let Some(marker) = db.fail_on.iter().find(|m| sql.contains(m.as_str())) {
                return Err(ConvertError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("statement rejected (matched '{}')", marker),
                )));
            }
            db.executed.push(sql.to_string());
            match insert_target(sql) {
                Some(target) => {
                    *db.inserted.entry(target.to_string()).or_insert(0) += 1;
                    Ok(1)
                }
                None => Ok(0),
            }
        })
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
