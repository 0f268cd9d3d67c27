//! Concurrent table dumper.
//!
//! Every table is read in full by its own task on its own connection and
//! streamed row by row into its JSON Lines artifact. Two semaphores bound
//! the work: the worker pool caps running tasks and the connection batch
//! caps open origin connections. A failing table never cancels its siblings;
//! failures are collected and reported together once every task is done.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use crate::artifacts::{MigrationWorkspace, RowWriter};
use crate::config::{ConnectionConfig, ExtractionConfig};
use crate::core::schema::{DatabaseDefinition, TableDefinition};
use crate::drivers::DriverRegistry;
use crate::error::{ConvertError, Result};

/// Totals for a completed dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DumpSummary {
    pub tables: usize,
    pub rows: u64,
}

/// Dumps every table of a database into the migration workspace.
pub struct TableDumper {
    registry: DriverRegistry,
    origin: ConnectionConfig,
    workers: usize,
    connection_batch: usize,
    timeout: Duration,
}

impl TableDumper {
    pub fn new(registry: DriverRegistry, origin: ConnectionConfig, config: &ExtractionConfig) -> Self {
        Self {
            registry,
            origin,
            workers: config.get_workers(),
            connection_batch: config.get_connection_batch(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Dump all tables. Fails with [`ConvertError::TableDump`] naming every
    /// failed table, or [`ConvertError::DumpTimeout`] if the pool does not
    /// drain in time.
    pub async fn dump(
        &self,
        db: &DatabaseDefinition,
        workspace: &MigrationWorkspace,
    ) -> Result<DumpSummary> {
        let workers = Arc::new(Semaphore::new(self.workers));
        let connections = Arc::new(Semaphore::new(self.connection_batch));

        info!(
            "Dumping {} tables (workers={}, connection_batch={})",
            db.tables.len(),
            self.workers,
            self.connection_batch
        );

        let mut handles = Vec::with_capacity(db.tables.len());
        for table in &db.tables {
            let task = DumpTask {
                registry: self.registry.clone(),
                origin: self.origin.clone(),
                table: table.clone(),
                workspace: workspace.clone(),
                workers: workers.clone(),
                connections: connections.clone(),
            };
            handles.push((table.full_name(), tokio::spawn(task.run())));
        }

        let abort_handles: Vec<_> = handles.iter().map(|(_, h)| h.abort_handle()).collect();

        let collected = tokio::time::timeout(self.timeout, async move {
            let mut summary = DumpSummary::default();
            let mut failures: BTreeMap<String, String> = BTreeMap::new();

            for (table_name, handle) in handles {
                match handle.await {
                    Ok(Ok(rows)) => {
                        info!("{}: dumped {} rows", table_name, rows);
                        summary.tables += 1;
                        summary.rows += rows;
                    }
                    Ok(Err(e)) => {
                        error!("{}: dump failed - {}", table_name, e);
                        failures.insert(table_name, e.to_string());
                    }
                    Err(e) => {
                        error!("{}: dump task panicked - {}", table_name, e);
                        failures.insert(table_name, format!("Task panicked: {}", e));
                    }
                }
            }

            (summary, failures)
        })
        .await;

        let (summary, failures) = match collected {
            Ok(result) => result,
            Err(_) => {
                for handle in abort_handles {
                    handle.abort();
                }
                return Err(ConvertError::DumpTimeout(self.timeout.as_secs()));
            }
        };

        if !failures.is_empty() {
            return Err(ConvertError::TableDump { failures });
        }

        info!(
            "Dump complete: {} tables, {} rows",
            summary.tables, summary.rows
        );
        Ok(summary)
    }
}

/// Work for one table, owned by its spawned task.
struct DumpTask {
    registry: DriverRegistry,
    origin: ConnectionConfig,
    table: TableDefinition,
    workspace: MigrationWorkspace,
    workers: Arc<Semaphore>,
    connections: Arc<Semaphore>,
}

impl DumpTask {
    async fn run(self) -> Result<u64> {
        // Permits are released when the guards drop, on every exit path.
        let _worker = self
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| ConvertError::Io(std::io::Error::other(e)))?;

        // The artifact exists before the first row is read.
        let mut writer = self.workspace.create_row_writer(&self.table).await?;
        debug!(
            "{}: writing {}",
            self.table.full_name(),
            self.workspace.table_data_path(&self.table).display()
        );

        let _connection = self
            .connections
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| ConvertError::Io(std::io::Error::other(e)))?;

        let copied = self.copy_rows(&mut writer).await;
        let flushed = writer.finish().await;
        copied?;
        flushed
    }

    async fn copy_rows(&self, writer: &mut RowWriter) -> Result<()> {
        let mut conn = self.registry.connect(&self.origin).await?;
        {
            let mut rows = conn.stream_rows(&self.table).await?;
            while let Some(row) = rows.next().await {
                writer.write_row(&row?).await?;
            }
        }
        conn.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::generic;
    use crate::core::schema::ColumnDefinition;
    use crate::core::value::{Row, RowValue};
    use crate::drivers::MemoryDriver;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn table(name: &str) -> TableDefinition {
        TableDefinition::new(
            "main",
            name,
            vec![
                ColumnDefinition::builder("id", "int", generic::INTEGER)
                    .ordinal_position(1)
                    .build(),
                ColumnDefinition::builder("label", "varchar", generic::VARCHAR)
                    .ordinal_position(2)
                    .length(20)
                    .build(),
            ],
            vec!["id".into()],
            vec![],
            vec![],
        )
        .unwrap()
    }

    fn rows(n: i64) -> Vec<Row> {
        (1..=n)
            .map(|id| {
                let mut row = Row::new();
                row.insert("id".into(), RowValue::Int(id));
                row.insert("label".into(), RowValue::Text(format!("row {}", id)));
                row
            })
            .collect()
    }

    fn setup(driver: &MemoryDriver, names: &[&str]) -> DatabaseDefinition {
        let tables: Vec<_> = names.iter().map(|n| table(n)).collect();
        for t in &tables {
            driver.add_table("shop", t.clone(), rows(5));
        }
        DatabaseDefinition::new("shop", "main", tables, "utf-8")
    }

    fn dumper(driver: &MemoryDriver, workers: usize, batch: usize) -> TableDumper {
        let mut registry = DriverRegistry::empty();
        registry.register(Arc::new(driver.clone()));
        let config = ExtractionConfig {
            workers: Some(workers),
            connection_batch: Some(batch),
            ..Default::default()
        };
        TableDumper::new(
            registry,
            ConnectionConfig::new("shop", "memory", "shop"),
            &config,
        )
    }

    fn line_count(path: &std::path::Path) -> usize {
        std::fs::read_to_string(path).unwrap().lines().count()
    }

    #[tokio::test]
    async fn test_dump_writes_every_table() {
        let driver = MemoryDriver::new();
        let db = setup(&driver, &["customers", "orders"]);
        let dir = TempDir::new().unwrap();
        let ws = MigrationWorkspace::new(dir.path(), Uuid::new_v4());

        let summary = dumper(&driver, 4, 2).dump(&db, &ws).await.unwrap();

        assert_eq!(summary, DumpSummary { tables: 2, rows: 10 });
        for t in &db.tables {
            assert_eq!(line_count(&ws.table_data_path(t)), 5);
        }
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let driver = MemoryDriver::new();
        let db = setup(&driver, &["t1", "t2", "t3"]);
        driver.fail_table_after("shop", "main", "t2", 2);
        let dir = TempDir::new().unwrap();
        let ws = MigrationWorkspace::new(dir.path(), Uuid::new_v4());

        let err = dumper(&driver, 2, 1).dump(&db, &ws).await.unwrap_err();

        match err {
            ConvertError::TableDump { failures } => {
                assert_eq!(failures.keys().collect::<Vec<_>>(), vec!["main.t2"]);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(line_count(&ws.table_data_path(&db.tables[0])), 5);
        assert_eq!(line_count(&ws.table_data_path(&db.tables[1])), 2);
        assert_eq!(line_count(&ws.table_data_path(&db.tables[2])), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_connections_bounded_by_batch() {
        let driver = MemoryDriver::new();
        let db = setup(&driver, &["t1", "t2", "t3", "t4", "t5", "t6"]);
        driver.set_row_delay("shop", Duration::from_millis(10));
        let dir = TempDir::new().unwrap();
        let ws = MigrationWorkspace::new(dir.path(), Uuid::new_v4());

        let summary = dumper(&driver, 4, 2).dump(&db, &ws).await.unwrap();

        assert_eq!(summary, DumpSummary { tables: 6, rows: 30 });
        assert_eq!(driver.peak_connections(), 2);
        assert_eq!(driver.open_connections(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_table_times_out() {
        let driver = MemoryDriver::new();
        let db = setup(&driver, &["t1", "t2"]);
        driver.stall_table("shop", "main", "t2");
        let dir = TempDir::new().unwrap();
        let ws = MigrationWorkspace::new(dir.path(), Uuid::new_v4());

        let mut registry = DriverRegistry::empty();
        registry.register(Arc::new(driver.clone()));
        let config = ExtractionConfig {
            workers: Some(2),
            connection_batch: Some(2),
            timeout_secs: 30,
        };
        let dumper = TableDumper::new(
            registry,
            ConnectionConfig::new("shop", "memory", "shop"),
            &config,
        );

        let err = dumper.dump(&db, &ws).await.unwrap_err();

        assert!(matches!(err, ConvertError::DumpTimeout(30)), "{}", err);
    }

    #[tokio::test]
    async fn test_connection_failure_leaves_empty_artifact() {
        let driver = MemoryDriver::new();
        let db = DatabaseDefinition::new("ghost", "main", vec![table("lost")], "utf-8");
        let dir = TempDir::new().unwrap();
        let ws = MigrationWorkspace::new(dir.path(), Uuid::new_v4());

        let err = dumper(&driver, 1, 1).dump(&db, &ws).await.unwrap_err();

        assert!(err.to_string().contains("main.lost"));
        assert_eq!(line_count(&ws.table_data_path(&db.tables[0])), 0);
    }
}
