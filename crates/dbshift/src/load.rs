//! Load stage: applies the SQL artifacts to the target.
//!
//! All DDL artifacts run first, then all DML artifacts, each pass in
//! execution order on a single target connection. A missing artifact means
//! there is nothing to apply for that table.

use tracing::{debug, info};

use crate::artifacts::{MigrationWorkspace, SqlKind};
use crate::config::ConnectionConfig;
use crate::core::schema::TableDefinition;
use crate::core::traits::Connection;
use crate::drivers::DriverRegistry;
use crate::error::{ConvertError, Result};

/// Counts for one load run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadSummary {
    pub ddl_statements: usize,
    pub dml_statements: usize,
    pub skipped_artifacts: usize,
}

/// Executes generated SQL against a target database.
pub struct LoadExecutor {
    registry: DriverRegistry,
    target: ConnectionConfig,
}

impl LoadExecutor {
    pub fn new(registry: DriverRegistry, target: ConnectionConfig) -> Self {
        Self { registry, target }
    }

    /// Run the DDL pass then the DML pass over `tables`.
    pub async fn load(
        &self,
        tables: &[&TableDefinition],
        workspace: &MigrationWorkspace,
    ) -> Result<LoadSummary> {
        info!(
            "Loading {} tables into {}",
            tables.len(),
            self.target.endpoint()
        );
        let mut conn = self.registry.connect(&self.target).await?;
        let mut summary = LoadSummary::default();

        let applied = async {
            for kind in [SqlKind::Ddl, SqlKind::Dml] {
                for table in tables {
                    match apply(conn.as_mut(), workspace, kind, table).await? {
                        Some(count) if kind == SqlKind::Ddl => summary.ddl_statements += count,
                        Some(count) => summary.dml_statements += count,
                        None => summary.skipped_artifacts += 1,
                    }
                }
                info!("{} pass complete", kind.dir_name().to_uppercase());
            }
            Ok::<_, ConvertError>(())
        }
        .await;

        let closed = conn.close().await;
        applied?;
        closed?;

        info!(
            "Load complete: {} DDL and {} DML statements",
            summary.ddl_statements, summary.dml_statements
        );
        Ok(summary)
    }
}

/// Execute one artifact. `None` when the artifact does not exist.
async fn apply(
    conn: &mut dyn Connection,
    workspace: &MigrationWorkspace,
    kind: SqlKind,
    table: &TableDefinition,
) -> Result<Option<usize>> {
    let phase = kind.dir_name();
    let table_name = table.full_name();

    let content = match workspace.read_sql(kind, table) {
        Ok(Some(content)) => content,
        Ok(None) => {
            debug!("{}: no {} artifact, skipping", table_name, phase);
            return Ok(None);
        }
        Err(e) => return Err(ConvertError::load(table_name, phase, e)),
    };

    let statements = split_statements(&content);
    for statement in &statements {
        conn.execute(statement)
            .await
            .map_err(|e| ConvertError::load(&table_name, phase, e))?;
    }
    debug!("{}: {} {} statements", table_name, statements.len(), phase);
    Ok(Some(statements.len()))
}

/// Split an artifact into statements.
///
/// Lines are trimmed; blank lines and `--` comment lines are dropped. A
/// statement ends at a line ending in `;`. Text after the last terminator is
/// one more statement.
pub fn split_statements(content: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("--") {
            continue;
        }
        current.push(line);
        if line.ends_with(';') {
            statements.push(current.join(" "));
            current.clear();
        }
    }

    if !current.is_empty() {
        statements.push(current.join(" "));
    }
    statements
}
