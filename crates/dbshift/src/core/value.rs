//! Row values as they travel from the origin cursor to the row store and on
//! to DML generation.
//!
//! Only four scalar shapes survive the trip: null, number, boolean and text.
//! Engine values without an exact JSON counterpart (decimals, temporal types,
//! UUIDs, binary) are carried as text so nothing is lost in the row store.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// One column value of a dumped row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// A dumped row keyed by column name.
pub type Row = BTreeMap<String, RowValue>;

impl RowValue {
    pub fn is_null(&self) -> bool {
        matches!(self, RowValue::Null)
    }

    /// Text value from anything displayable.
    pub fn text(value: impl fmt::Display) -> Self {
        RowValue::Text(value.to_string())
    }
}

impl From<Option<RowValue>> for RowValue {
    fn from(value: Option<RowValue>) -> Self {
        value.unwrap_or(RowValue::Null)
    }
}

impl From<bool> for RowValue {
    fn from(v: bool) -> Self {
        RowValue::Bool(v)
    }
}

impl From<i16> for RowValue {
    fn from(v: i16) -> Self {
        RowValue::Int(v as i64)
    }
}

impl From<i32> for RowValue {
    fn from(v: i32) -> Self {
        RowValue::Int(v as i64)
    }
}

impl From<i64> for RowValue {
    fn from(v: i64) -> Self {
        RowValue::Int(v)
    }
}

impl From<f32> for RowValue {
    fn from(v: f32) -> Self {
        RowValue::Float(v as f64)
    }
}

impl From<f64> for RowValue {
    fn from(v: f64) -> Self {
        RowValue::Float(v)
    }
}

impl From<String> for RowValue {
    fn from(v: String) -> Self {
        RowValue::Text(v)
    }
}

impl From<&str> for RowValue {
    fn from(v: &str) -> Self {
        RowValue::Text(v.to_string())
    }
}
