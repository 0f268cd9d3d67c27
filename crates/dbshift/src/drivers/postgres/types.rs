//! PostgreSQL type classification and value conversion.

use tokio_postgres::Row as PgRow;

use crate::core::generic;
use crate::core::schema::ColumnDefinition;
use crate::core::value::{Row, RowValue};
use crate::error::Result;

/// Generic type code for a PostgreSQL `udt_name`.
pub fn generic_type(udt_name: &str) -> i32 {
    match udt_name.to_lowercase().as_str() {
        "bool" | "boolean" => generic::BIT,
        "int2" | "smallint" => generic::SMALLINT,
        "int4" | "integer" | "int" | "serial" => generic::INTEGER,
        "int8" | "bigint" | "bigserial" => generic::BIGINT,
        "float4" | "real" => generic::REAL,
        "float8" | "double precision" | "money" => generic::DOUBLE,
        "numeric" | "decimal" => generic::NUMERIC,
        "bpchar" | "char" | "character" => generic::CHAR,
        "varchar" | "character varying" | "text" | "citext" | "name" => generic::VARCHAR,
        "date" => generic::DATE,
        "time" | "timetz" => generic::TIME,
        "timestamp" | "timestamptz" => generic::TIMESTAMP,
        "bytea" => generic::BINARY,
        "xml" => generic::SQLXML,
        _ => generic::OTHER,
    }
}

/// Whether the column is fetched in its native wire type rather than as text.
fn is_native(udt_name: &str) -> bool {
    matches!(
        udt_name,
        "bool" | "int2" | "int4" | "int8" | "float4" | "float8"
    )
}

/// SELECT expression for one column.
///
/// Only booleans, integers and floats are decoded natively; everything else
/// is rendered by the server as text so that decimals, temporal values and
/// extension types survive without loss. `bytea` is fetched as bare hex.
pub fn select_expr(column: &ColumnDefinition) -> String {
    let ident = quote_ident(&column.name);
    let udt = column.origin_type.to_lowercase();
    if is_native(&udt) {
        ident
    } else if udt == "bytea" {
        format!("encode({}, 'hex')", ident)
    } else {
        format!("{}::text", ident)
    }
}

/// Convert a fetched row into a row record, using the projection built by
/// [`select_expr`].
pub fn convert_row(row: &PgRow, columns: &[ColumnDefinition]) -> Result<Row> {
    let mut record = Row::new();
    for (idx, column) in columns.iter().enumerate() {
        let value = match column.origin_type.to_lowercase().as_str() {
            "bool" => row.try_get::<_, Option<bool>>(idx)?.map(RowValue::from),
            "int2" => row.try_get::<_, Option<i16>>(idx)?.map(RowValue::from),
            "int4" => row.try_get::<_, Option<i32>>(idx)?.map(RowValue::from),
            "int8" => row.try_get::<_, Option<i64>>(idx)?.map(RowValue::from),
            "float4" => row.try_get::<_, Option<f32>>(idx)?.map(RowValue::from),
            "float8" => row.try_get::<_, Option<f64>>(idx)?.map(RowValue::from),
            _ => row.try_get::<_, Option<String>>(idx)?.map(RowValue::from),
        };
        record.insert(column.name.clone(), RowValue::from(value));
    }
    Ok(record)
}

/// Quote a PostgreSQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
