//! MySQL/MariaDB type classification and value conversion.

use sqlx::mysql::MySqlRow;
use sqlx::Row as _;

use crate::core::generic;
use crate::core::schema::ColumnDefinition;
use crate::core::value::{Row, RowValue};
use crate::error::Result;

/// Generic type code for a MySQL `DATA_TYPE`.
pub fn generic_type(data_type: &str) -> i32 {
    match data_type.to_lowercase().as_str() {
        "bit" | "bool" | "boolean" => generic::BIT,
        "tinyint" => generic::TINYINT,
        "smallint" | "year" => generic::SMALLINT,
        "mediumint" | "int" | "integer" => generic::INTEGER,
        "bigint" => generic::BIGINT,
        "float" => generic::REAL,
        "double" | "real" => generic::DOUBLE,
        "decimal" | "numeric" => generic::DECIMAL,
        "char" => generic::CHAR,
        "varchar" | "enum" | "set" => generic::VARCHAR,
        "tinytext" | "text" | "mediumtext" | "longtext" | "json" => generic::LONGVARCHAR,
        "date" => generic::DATE,
        "time" => generic::TIME,
        "datetime" | "timestamp" => generic::TIMESTAMP,
        "binary" => generic::BINARY,
        "varbinary" => generic::VARBINARY,
        "tinyblob" | "blob" | "mediumblob" | "longblob" => generic::LONGVARBINARY,
        _ => generic::OTHER,
    }
}

fn is_integer(data_type: &str) -> bool {
    matches!(
        data_type,
        "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint"
    )
}

fn is_binary(data_type: &str) -> bool {
    matches!(
        data_type,
        "binary" | "varbinary" | "tinyblob" | "blob" | "mediumblob" | "longblob"
    )
}

/// SELECT expression for one column.
///
/// Integers and floats are decoded natively and `bit` arrives as a 0/1
/// comparison result. Binary columns are fetched as lowercase hex and
/// everything else is cast to text on the server.
pub fn select_expr(column: &ColumnDefinition) -> String {
    let ident = quote_ident(&column.name);
    let data_type = column.origin_type.to_lowercase();
    match data_type.as_str() {
        t if is_integer(t) => ident,
        "float" | "double" | "real" => ident,
        "bit" => format!("({} <> 0)", ident),
        t if is_binary(t) => format!("LOWER(HEX({}))", ident),
        _ => format!("CAST({} AS CHAR)", ident),
    }
}

/// Convert a fetched row into a row record, using the projection built by
/// [`select_expr`].
pub fn convert_row(row: &MySqlRow, columns: &[ColumnDefinition]) -> Result<Row> {
    let mut record = Row::new();
    for (idx, column) in columns.iter().enumerate() {
        let value = match column.origin_type.to_lowercase().as_str() {
            "bit" => row
                .try_get::<Option<i64>, _>(idx)?
                .map(|v| RowValue::Bool(v != 0)),
            t if is_integer(t) => integer_value(row, idx)?,
            "float" => row.try_get::<Option<f32>, _>(idx)?.map(RowValue::from),
            "double" | "real" => row.try_get::<Option<f64>, _>(idx)?.map(RowValue::from),
            _ => row.try_get::<Option<String>, _>(idx)?.map(RowValue::from),
        };
        record.insert(column.name.clone(), RowValue::from(value));
    }
    Ok(record)
}

/// Signed or unsigned integer. Unsigned values past `i64::MAX` become text.
fn integer_value(row: &MySqlRow, idx: usize) -> Result<Option<RowValue>> {
    match row.try_get::<Option<i64>, _>(idx) {
        Ok(v) => Ok(v.map(RowValue::from)),
        Err(_) => Ok(row
            .try_get::<Option<u64>, _>(idx)?
            .map(|v| i64::try_from(v).map_or_else(|_| RowValue::text(v), RowValue::from))),
    }
}

/// Quote a MySQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}
