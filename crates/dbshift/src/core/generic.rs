//! Cross-engine type classification.
//!
//! Columns carry an integer "generic type" code next to their native type
//! name. The codes are the JDBC `java.sql.Types` values, which every engine
//! driver already knows how to report and which conversion maps are keyed by.

pub const BIT: i32 = -7;
pub const TINYINT: i32 = -6;
pub const SMALLINT: i32 = 5;
pub const INTEGER: i32 = 4;
pub const BIGINT: i32 = -5;
pub const FLOAT: i32 = 6;
pub const REAL: i32 = 7;
pub const DOUBLE: i32 = 8;
pub const NUMERIC: i32 = 2;
pub const DECIMAL: i32 = 3;
pub const CHAR: i32 = 1;
pub const VARCHAR: i32 = 12;
pub const LONGVARCHAR: i32 = -1;
pub const DATE: i32 = 91;
pub const TIME: i32 = 92;
pub const TIMESTAMP: i32 = 93;
pub const BINARY: i32 = -2;
pub const VARBINARY: i32 = -3;
pub const LONGVARBINARY: i32 = -4;
pub const OTHER: i32 = 1111;
pub const BLOB: i32 = 2004;
pub const CLOB: i32 = 2005;
pub const BOOLEAN: i32 = 16;
pub const NCHAR: i32 = -15;
pub const NVARCHAR: i32 = -9;
pub const LONGNVARCHAR: i32 = -16;
pub const NCLOB: i32 = 2011;
pub const SQLXML: i32 = 2009;
pub const TIME_WITH_TIMEZONE: i32 = 2013;
pub const TIMESTAMP_WITH_TIMEZONE: i32 = 2014;

/// Character types whose DDL carries a length.
pub fn is_string_family(code: i32) -> bool {
    matches!(
        code,
        CHAR | VARCHAR | LONGVARCHAR | NCHAR | NVARCHAR | LONGNVARCHAR
    )
}

/// Exact numeric types whose DDL carries precision and scale.
pub fn is_decimal_family(code: i32) -> bool {
    matches!(code, NUMERIC | DECIMAL)
}

/// Byte-string types; their dumped values are hex text.
pub fn is_binary_family(code: i32) -> bool {
    matches!(code, BINARY | VARBINARY | LONGVARBINARY | BLOB)
}
