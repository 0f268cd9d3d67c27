//! Per-migration workspace on disk.
//!
//! Layout under `<data_dir>/<migration id>/`:
//!
//! ```text
//! db.meta.json             extracted DatabaseDefinition
//! target.meta.json         transformed DatabaseDefinition
//! tables/<name>.jsonl      dumped rows, one JSON object per line
//! ddl/<name>.sql           CREATE TABLE statement
//! dml/<name>.sql           INSERT statements
//! ```
//!
//! `<name>` is `schema.table`, or `table` when the schema is empty. A missing
//! row or SQL artifact means "nothing to do" for that table.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWriteExt, BufWriter};
use uuid::Uuid;

use crate::core::schema::{DatabaseDefinition, TableDefinition};
use crate::core::value::Row;
use crate::error::{ConvertError, Result};

const DB_META: &str = "db.meta.json";
const TARGET_META: &str = "target.meta.json";

/// Kind of SQL artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlKind {
    Ddl,
    Dml,
}

impl SqlKind {
    pub fn dir_name(self) -> &'static str {
        match self {
            SqlKind::Ddl => "ddl",
            SqlKind::Dml => "dml",
        }
    }
}

/// One SQL artifact with its content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlFile {
    pub filename: String,
    pub content: String,
}

/// One page of SQL artifacts, sorted by filename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlPage {
    /// Zero-based page index.
    pub page: usize,
    pub size: usize,
    /// Number of artifacts across all pages.
    pub total: usize,
    pub files: Vec<SqlFile>,
}

/// Artifact name for a table.
pub fn artifact_stem(table: &TableDefinition) -> String {
    table.full_name()
}

/// Files owned by one migration.
#[derive(Debug, Clone)]
pub struct MigrationWorkspace {
    root: PathBuf,
}

impl MigrationWorkspace {
    pub fn new(data_dir: &Path, id: Uuid) -> Self {
        Self {
            root: data_dir.join(id.to_string()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn db_meta_path(&self) -> PathBuf {
        self.root.join(DB_META)
    }

    pub fn target_meta_path(&self) -> PathBuf {
        self.root.join(TARGET_META)
    }

    pub fn tables_dir(&self) -> PathBuf {
        self.root.join("tables")
    }

    pub fn sql_dir(&self, kind: SqlKind) -> PathBuf {
        self.root.join(kind.dir_name())
    }

    pub fn table_data_path(&self, table: &TableDefinition) -> PathBuf {
        self.tables_dir()
            .join(format!("{}.jsonl", artifact_stem(table)))
    }

    pub fn sql_path(&self, kind: SqlKind, table: &TableDefinition) -> PathBuf {
        self.sql_dir(kind)
            .join(format!("{}.sql", artifact_stem(table)))
    }

    // ===== Metadata =====

    pub fn write_db_meta(&self, db: &DatabaseDefinition) -> Result<()> {
        write_json_atomic(&self.db_meta_path(), db)
    }

    pub fn read_db_meta(&self) -> Result<DatabaseDefinition> {
        read_json(&self.db_meta_path())
    }

    pub fn write_target_meta(&self, db: &DatabaseDefinition) -> Result<()> {
        write_json_atomic(&self.target_meta_path(), db)
    }

    pub fn read_target_meta(&self) -> Result<DatabaseDefinition> {
        read_json(&self.target_meta_path())
    }

    // ===== Row store =====

    /// Create (truncate) the row artifact of a table.
    pub async fn create_row_writer(&self, table: &TableDefinition) -> Result<RowWriter> {
        let path = self.table_data_path(table);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::File::create(&path).await?;
        Ok(RowWriter {
            inner: BufWriter::new(file),
            rows: 0,
        })
    }

    /// Open the row artifact of a table, `None` if the table was never dumped.
    pub fn open_row_reader(&self, table: &TableDefinition) -> Result<Option<RowReader>> {
        match fs::File::open(self.table_data_path(table)) {
            Ok(file) => Ok(Some(RowReader {
                lines: BufReader::new(file).lines(),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // ===== SQL artifacts =====

    /// Read a SQL artifact, `None` if it does not exist.
    pub fn read_sql(&self, kind: SqlKind, table: &TableDefinition) -> Result<Option<String>> {
        match fs::read_to_string(self.sql_path(kind, table)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Page through the DDL artifacts in filename order.
    pub fn list_ddl(&self, page: usize, size: usize) -> Result<SqlPage> {
        let dir = self.sql_dir(SqlKind::Ddl);
        let mut names: Vec<String> = match fs::read_dir(&dir) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.path().is_file())
                .filter_map(|entry| entry.file_name().into_string().ok())
                .filter(|name| name.ends_with(".sql"))
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        names.sort();

        let total = names.len();
        let files = names
            .into_iter()
            .skip(page.saturating_mul(size))
            .take(size)
            .map(|filename| {
                let content = fs::read_to_string(dir.join(&filename))?;
                Ok(SqlFile { filename, content })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(SqlPage {
            page,
            size,
            total,
            files,
        })
    }

    /// Overwrite a DDL artifact in place.
    pub fn update_ddl(&self, filename: &str, content: &str) -> Result<()> {
        validate_artifact_name(filename)?;
        let dir = self.sql_dir(SqlKind::Ddl);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(filename), content)?;
        Ok(())
    }
}

/// Reject names that would leave the artifact directory.
fn validate_artifact_name(filename: &str) -> Result<()> {
    let invalid = filename.is_empty()
        || filename.contains('/')
        || filename.contains('\\')
        || filename.contains("..")
        || filename.contains('\0');
    if invalid {
        return Err(ConvertError::InvalidArtifactName(filename.to_string()));
    }
    Ok(())
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(value)?;

    // Atomic write: write to temp file, then rename
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, content)?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Streams rows into a JSON Lines artifact.
pub struct RowWriter {
    inner: BufWriter<tokio::fs::File>,
    rows: u64,
}

impl RowWriter {
    pub async fn write_row(&mut self, row: &Row) -> Result<()> {
        let mut line = serde_json::to_vec(row)?;
        line.push(b'\n');
        self.inner.write_all(&line).await?;
        self.rows += 1;
        Ok(())
    }

    /// Rows written so far.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Flush buffered rows to disk.
    pub async fn finish(mut self) -> Result<u64> {
        self.inner.flush().await?;
        Ok(self.rows)
    }
}

/// Lazily reads rows back from a JSON Lines artifact.
pub struct RowReader {
    lines: std::io::Lines<BufReader<fs::File>>,
}

impl Iterator for RowReader {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            if line.trim().is_empty() {
                continue;
            }
            return Some(serde_json::from_str(&line).map_err(ConvertError::from));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::generic;
    use crate::core::schema::ColumnDefinition;
    use crate::core::value::RowValue;
    use tempfile::TempDir;

    fn table(schema: &str, name: &str) -> TableDefinition {
        TableDefinition::new(
            schema,
            name,
            vec![ColumnDefinition::builder("id", "int", generic::INTEGER)
                .ordinal_position(1)
                .build()],
            vec!["id".into()],
            vec![],
            vec![],
        )
        .unwrap()
    }

    #[test]
    fn test_paths() {
        let ws = MigrationWorkspace::new(Path::new("/data"), Uuid::nil());
        let root = Path::new("/data/00000000-0000-0000-0000-000000000000");
        assert_eq!(ws.root(), root);
        assert_eq!(
            ws.table_data_path(&table("sales", "orders")),
            root.join("tables/sales.orders.jsonl")
        );
        assert_eq!(
            ws.sql_path(SqlKind::Ddl, &table("", "orders")),
            root.join("ddl/orders.sql")
        );
    }

    #[test]
    fn test_metadata_round_trip() {
        let dir = TempDir::new().unwrap();
        let ws = MigrationWorkspace::new(dir.path(), Uuid::new_v4());
        let mut column = ColumnDefinition::builder("name", "varchar", generic::VARCHAR)
            .ordinal_position(2)
            .length(80)
            .default_value(Some("'n/a'".into()))
            .build();
        column.nullable = false;
        let users = table("app", "users");
        let users = users.with_columns(vec![users.columns[0].clone(), column]);
        let db = DatabaseDefinition::new("legacy", "app", vec![users], "latin1");

        ws.write_db_meta(&db).unwrap();
        assert_eq!(ws.read_db_meta().unwrap(), db);
        assert!(ws.read_target_meta().is_err());
    }

    #[tokio::test]
    async fn test_row_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let ws = MigrationWorkspace::new(dir.path(), Uuid::new_v4());
        let orders = table("sales", "orders");

        assert!(ws.open_row_reader(&orders).unwrap().is_none());

        let mut writer = ws.create_row_writer(&orders).await.unwrap();
        for id in 1..=3 {
            let mut row = Row::new();
            row.insert("id".into(), RowValue::Int(id));
            writer.write_row(&row).await.unwrap();
        }
        assert_eq!(writer.finish().await.unwrap(), 3);

        let rows: Vec<Row> = ws
            .open_row_reader(&orders)
            .unwrap()
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].get("id"), Some(&RowValue::Int(3)));
    }

    #[test]
    fn test_list_ddl_pages() {
        let dir = TempDir::new().unwrap();
        let ws = MigrationWorkspace::new(dir.path(), Uuid::new_v4());

        let empty = ws.list_ddl(0, 5).unwrap();
        assert_eq!(empty.total, 0);
        assert!(empty.files.is_empty());

        for name in ["c.sql", "a.sql", "b.sql"] {
            ws.update_ddl(name, &format!("-- {}", name)).unwrap();
        }
        fs::write(ws.sql_dir(SqlKind::Ddl).join("notes.txt"), "x").unwrap();

        let first = ws.list_ddl(0, 2).unwrap();
        assert_eq!(first.total, 3);
        let names: Vec<_> = first.files.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(names, vec!["a.sql", "b.sql"]);

        let second = ws.list_ddl(1, 2).unwrap();
        assert_eq!(second.files.len(), 1);
        assert_eq!(second.files[0].filename, "c.sql");
        assert_eq!(second.files[0].content, "-- c.sql");

        assert!(ws.list_ddl(5, 2).unwrap().files.is_empty());
    }

    #[test]
    fn test_update_ddl_rejects_traversal() {
        let dir = TempDir::new().unwrap();
        let ws = MigrationWorkspace::new(dir.path(), Uuid::new_v4());
        for name in ["../escape.sql", "sub/x.sql", "", "..\\x.sql"] {
            assert!(matches!(
                ws.update_ddl(name, "x"),
                Err(ConvertError::InvalidArtifactName(_))
            ));
        }
    }
}
