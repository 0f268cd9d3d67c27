//! DDL and DML text generation.
//!
//! One `CREATE TABLE` artifact per table and, for tables with dumped rows,
//! one artifact of single-line `INSERT` statements. Output depends only on
//! the table definitions, the row artifacts and the target dialect, so
//! regenerating from the same inputs gives byte-identical files.
//!
//! Literals follow the target dialect where engines disagree: booleans are
//! `1`/`0` on SQL Server, binary columns become `'\x..'`, `0x..` or `X'..'`,
//! and exact numerics are written unquoted.

use std::fs;
use std::io::{BufWriter, Write};

use tracing::{debug, info};

use crate::artifacts::{MigrationWorkspace, SqlKind};
use crate::core::generic;
use crate::core::schema::{ColumnDefinition, TableDefinition};
use crate::core::value::{Row, RowValue};
use crate::error::Result;
use crate::typemap::{TargetDialect, INVALID_TYPE};

/// Type name used for string columns without a usable length.
pub const UNBOUNDED_TEXT: &str = "TEXT";

/// Counts for one generation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GenerationSummary {
    pub ddl_files: usize,
    pub dml_files: usize,
    pub insert_statements: u64,
}

/// Writes SQL artifacts into a migration workspace.
pub struct SqlGenerator<'w> {
    workspace: &'w MigrationWorkspace,
    dialect: TargetDialect,
}

impl<'w> SqlGenerator<'w> {
    pub fn new(workspace: &'w MigrationWorkspace, dialect: TargetDialect) -> Self {
        Self { workspace, dialect }
    }

    /// Generate DDL then DML for the tables, in the given order.
    pub fn generate(&self, tables: &[TableDefinition]) -> Result<GenerationSummary> {
        let mut summary = GenerationSummary::default();

        for table in tables {
            self.write_ddl(table)?;
            summary.ddl_files += 1;
        }

        for table in tables {
            let inserts = self.write_dml(table)?;
            if inserts > 0 {
                summary.dml_files += 1;
                summary.insert_statements += inserts;
            }
        }

        info!(
            "Generated {} DDL and {} DML artifacts ({} inserts)",
            summary.ddl_files, summary.dml_files, summary.insert_statements
        );
        Ok(summary)
    }

    fn write_ddl(&self, table: &TableDefinition) -> Result<()> {
        let path = self.workspace.sql_path(SqlKind::Ddl, table);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, render_ddl(table))?;
        debug!("{}: wrote {}", table.full_name(), path.display());
        Ok(())
    }

    /// Write the INSERT artifact. Returns the number of statements; with no
    /// rows the artifact is absent afterwards.
    fn write_dml(&self, table: &TableDefinition) -> Result<u64> {
        let path = self.workspace.sql_path(SqlKind::Dml, table);

        let mut statements = 0u64;
        if let Some(reader) = self.workspace.open_row_reader(table)? {
            let mut rows = reader.peekable();
            if rows.peek().is_some() {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut writer = BufWriter::new(fs::File::create(&path)?);
                for row in rows {
                    writer.write_all(render_insert(table, &row?, self.dialect).as_bytes())?;
                    writer.write_all(b"\n")?;
                    statements += 1;
                }
                writer.flush()?;
            }
        }

        if statements == 0 {
            match fs::remove_file(&path) {
                Ok(()) => debug!("{}: removed stale {}", table.full_name(), path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        } else {
            debug!(
                "{}: wrote {} inserts to {}",
                table.full_name(),
                statements,
                path.display()
            );
        }
        Ok(statements)
    }
}

/// Render the `CREATE TABLE` statement of a table.
pub fn render_ddl(table: &TableDefinition) -> String {
    let mut clauses: Vec<String> = table
        .columns
        .iter()
        .map(|column| {
            let mut clause = format!("{} {}", column.name, column_type(column));
            if !column.nullable {
                clause.push_str(" NOT NULL");
            }
            clause
        })
        .collect();

    if table.has_pk() {
        clauses.push(format!("PRIMARY KEY ({})", table.primary_key.join(",")));
    }

    for fk in &table.foreign_keys {
        clauses.push(format!(
            "FOREIGN KEY ({}) REFERENCES {} ({})",
            fk.local_columns().collect::<Vec<_>>().join(","),
            fk.referenced_table,
            fk.referenced_columns().collect::<Vec<_>>().join(",")
        ));
    }

    for group in &table.unique_constraints {
        clauses.push(format!("UNIQUE ({})", group.join(",")));
    }

    let body = clauses
        .iter()
        .map(|clause| format!("\t{}", clause))
        .collect::<Vec<_>>()
        .join(",\n");

    format!("CREATE TABLE {} (\n{}\n);\n", table.full_name(), body)
}

/// Type clause of a column definition.
pub fn column_type(column: &ColumnDefinition) -> String {
    let type_name = column.target_type.as_deref().unwrap_or(INVALID_TYPE);

    if generic::is_string_family(column.generic_type) {
        if column.length <= 0
            || column.length == i32::MAX
            || column.origin_type.eq_ignore_ascii_case("text")
        {
            return UNBOUNDED_TEXT.to_string();
        }
        return format!("{}({})", type_name, column.length);
    }

    if generic::is_decimal_family(column.generic_type) && column.precision > 0 {
        return format!("{}({},{})", type_name, column.precision, column.scale);
    }

    type_name.to_string()
}

/// Render one `INSERT` statement for a row, columns in table order.
pub fn render_insert(table: &TableDefinition, row: &Row, dialect: TargetDialect) -> String {
    let columns = table.column_names().collect::<Vec<_>>().join(",");
    let values = table
        .columns
        .iter()
        .map(|column| {
            row.get(&column.name).map_or_else(
                || "NULL".to_string(),
                |value| column_literal(column, value, dialect),
            )
        })
        .collect::<Vec<_>>()
        .join(",");

    format!(
        "INSERT INTO {} ({}) VALUES ({});",
        table.full_name(),
        columns,
        values
    )
}

/// SQL literal for a value of the given column.
///
/// Binary and exact numeric values are dumped as text; they are only
/// written bare when the text has the expected shape, anything else is
/// quoted as a string.
pub fn column_literal(
    column: &ColumnDefinition,
    value: &RowValue,
    dialect: TargetDialect,
) -> String {
    match value {
        RowValue::Text(s) if generic::is_binary_family(column.generic_type) && is_hex(s) => {
            binary_literal(s, dialect)
        }
        RowValue::Text(s) if generic::is_decimal_family(column.generic_type) && is_numeric(s) => {
            s.clone()
        }
        _ => format_value(value, dialect),
    }
}

/// SQL literal for a row value.
pub fn format_value(value: &RowValue, dialect: TargetDialect) -> String {
    match value {
        RowValue::Null => "NULL".to_string(),
        RowValue::Bool(b) => match (dialect, b) {
            (TargetDialect::Mssql, true) => "1".to_string(),
            (TargetDialect::Mssql, false) => "0".to_string(),
            (_, true) => "TRUE".to_string(),
            (_, false) => "FALSE".to_string(),
        },
        RowValue::Int(v) => v.to_string(),
        RowValue::Float(v) if v.is_finite() => v.to_string(),
        RowValue::Float(_) => "NULL".to_string(),
        RowValue::Text(s) => quote_literal(s),
    }
}

/// Binary string literal from hex digits.
pub fn binary_literal(hex: &str, dialect: TargetDialect) -> String {
    match dialect {
        TargetDialect::Postgres => format!("'\\x{}'", hex),
        TargetDialect::Mssql => format!("0x{}", hex),
        TargetDialect::Mysql | TargetDialect::Standard => format!("X'{}'", hex),
    }
}

fn is_hex(s: &str) -> bool {
    s.len() % 2 == 0 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

fn is_numeric(s: &str) -> bool {
    s.bytes().any(|b| b.is_ascii_digit())
        && s
            .bytes()
            .all(|b| b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'e' | b'E'))
        && s.parse::<f64>().is_ok()
}

/// Single-quote a string, doubling quotes and dropping control characters.
pub fn quote_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\u{0000}'..='\u{001F}' | '\u{007F}' => {}
            '\'' => out.push_str("''"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}
