//! SQL Server type classification and value conversion.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use tiberius::Row as TdsRow;
use uuid::Uuid;

use crate::core::generic;
use crate::core::schema::ColumnDefinition;
use crate::core::value::{Row, RowValue};
use crate::error::Result;

/// Generic type code for a SQL Server `DATA_TYPE`.
pub fn generic_type(data_type: &str) -> i32 {
    match data_type.to_lowercase().as_str() {
        "bit" => generic::BIT,
        "tinyint" => generic::TINYINT,
        "smallint" => generic::SMALLINT,
        "int" => generic::INTEGER,
        "bigint" => generic::BIGINT,
        "real" => generic::REAL,
        "float" => generic::DOUBLE,
        "decimal" | "money" | "smallmoney" => generic::DECIMAL,
        "numeric" => generic::NUMERIC,
        "char" | "uniqueidentifier" => generic::CHAR,
        "varchar" => generic::VARCHAR,
        "text" => generic::LONGVARCHAR,
        "nchar" => generic::NCHAR,
        "nvarchar" => generic::NVARCHAR,
        "ntext" => generic::LONGNVARCHAR,
        "date" => generic::DATE,
        "time" => generic::TIME,
        "datetime" | "datetime2" | "smalldatetime" => generic::TIMESTAMP,
        "datetimeoffset" => generic::TIMESTAMP_WITH_TIMEZONE,
        "binary" | "timestamp" | "rowversion" => generic::BINARY,
        "varbinary" => generic::VARBINARY,
        "image" => generic::LONGVARBINARY,
        "xml" => generic::SQLXML,
        _ => generic::OTHER,
    }
}

/// Convert a fetched row into a row record based on each column's native type.
pub fn convert_row(row: &TdsRow, columns: &[ColumnDefinition]) -> Result<Row> {
    let mut record = Row::new();
    for (idx, column) in columns.iter().enumerate() {
        let value = convert_value(row, idx, &column.origin_type)?;
        record.insert(column.name.clone(), value);
    }
    Ok(record)
}

fn convert_value(row: &TdsRow, idx: usize, data_type: &str) -> Result<RowValue> {
    let value = match data_type.to_lowercase().as_str() {
        "bit" => row.try_get::<bool, _>(idx)?.map(RowValue::from),
        "tinyint" => row
            .try_get::<u8, _>(idx)?
            .map(|v| RowValue::Int(v as i64)),
        "smallint" => row.try_get::<i16, _>(idx)?.map(RowValue::from),
        "int" => row.try_get::<i32, _>(idx)?.map(RowValue::from),
        "bigint" => row.try_get::<i64, _>(idx)?.map(RowValue::from),
        "real" => row.try_get::<f32, _>(idx)?.map(RowValue::from),
        "float" => row.try_get::<f64, _>(idx)?.map(RowValue::from),
        "decimal" | "numeric" | "money" | "smallmoney" => match row.try_get::<Decimal, _>(idx) {
            Ok(v) => v.map(RowValue::text),
            // money columns arrive as floats
            Err(_) => row.try_get::<f64, _>(idx)?.map(RowValue::text),
        },
        "uniqueidentifier" => row.try_get::<Uuid, _>(idx)?.map(RowValue::text),
        "datetime" | "datetime2" | "smalldatetime" => row
            .try_get::<NaiveDateTime, _>(idx)?
            .map(|v| RowValue::text(v.format("%Y-%m-%d %H:%M:%S%.f"))),
        "datetimeoffset" => row
            .try_get::<DateTime<FixedOffset>, _>(idx)?
            .map(|v| RowValue::text(v.to_rfc3339())),
        "date" => row.try_get::<NaiveDate, _>(idx)?.map(RowValue::text),
        "time" => row.try_get::<NaiveTime, _>(idx)?.map(RowValue::text),
        "binary" | "varbinary" | "image" | "timestamp" | "rowversion" => row
            .try_get::<&[u8], _>(idx)?
            .map(|v| RowValue::Text(hex::encode(v))),
        _ => row.try_get::<&str, _>(idx)?.map(RowValue::from),
    };
    Ok(RowValue::from(value))
}

/// Quote a SQL Server identifier.
pub fn quote_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Text name for a SQL Server code page.
pub fn code_page_encoding(code_page: i32) -> String {
    match code_page {
        65001 => "utf-8".to_string(),
        1200 => "utf-16".to_string(),
        other => format!("cp{}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_type() {
        assert_eq!(generic_type("int"), generic::INTEGER);
        assert_eq!(generic_type("NVARCHAR"), generic::NVARCHAR);
        assert_eq!(generic_type("money"), generic::DECIMAL);
        assert_eq!(generic_type("datetime2"), generic::TIMESTAMP);
        assert_eq!(generic_type("geography"), generic::OTHER);
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("orders"), "[orders]");
        assert_eq!(quote_ident("a]b"), "[a]]b]");
    }

    #[test]
    fn test_code_page_encoding() {
        assert_eq!(code_page_encoding(65001), "utf-8");
        assert_eq!(code_page_encoding(1252), "cp1252");
    }
}
