//! Schema metadata types for databases, tables, columns and constraints.
//!
//! These are plain value objects. Extraction builds them once; transformation
//! produces new values rather than mutating the extracted ones.

use serde::{Deserialize, Serialize};

use crate::error::{ConvertError, Result};

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    /// Column name.
    pub name: String,

    /// Ordinal position (1-based).
    pub ordinal_position: i32,

    /// Native type name on the origin engine (e.g., "varchar", "int4").
    pub origin_type: String,

    /// Generic type code, see [`crate::core::generic`].
    pub generic_type: i32,

    /// Type name on the target engine. Unset until transformation.
    pub target_type: Option<String>,

    /// Maximum length for character/binary types.
    pub length: i32,

    /// Numeric precision.
    pub precision: i32,

    /// Numeric scale.
    pub scale: i32,

    /// Whether the column allows NULL.
    pub nullable: bool,

    /// Whether the column is an identity/serial column.
    pub auto_increment: bool,

    /// Default expression as reported by the catalog.
    pub default_value: Option<String>,
}

impl ColumnDefinition {
    /// Start building a column with its name, native type and generic code.
    pub fn builder(
        name: impl Into<String>,
        origin_type: impl Into<String>,
        generic_type: i32,
    ) -> ColumnBuilder {
        ColumnBuilder {
            column: ColumnDefinition {
                name: name.into(),
                ordinal_position: 0,
                origin_type: origin_type.into(),
                generic_type,
                target_type: None,
                length: 0,
                precision: 0,
                scale: 0,
                nullable: true,
                auto_increment: false,
                default_value: None,
            },
        }
    }

    /// Copy of this column with the target type set.
    pub fn with_target_type(&self, target_type: impl Into<String>) -> Self {
        Self {
            target_type: Some(target_type.into()),
            ..self.clone()
        }
    }
}

/// Staged builder for [`ColumnDefinition`].
#[derive(Debug, Clone)]
pub struct ColumnBuilder {
    column: ColumnDefinition,
}

impl ColumnBuilder {
    pub fn ordinal_position(mut self, position: i32) -> Self {
        self.column.ordinal_position = position;
        self
    }

    pub fn target_type(mut self, target_type: impl Into<String>) -> Self {
        self.column.target_type = Some(target_type.into());
        self
    }

    pub fn length(mut self, length: i32) -> Self {
        self.column.length = length;
        self
    }

    pub fn precision(mut self, precision: i32, scale: i32) -> Self {
        self.column.precision = precision;
        self.column.scale = scale;
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.column.nullable = nullable;
        self
    }

    pub fn auto_increment(mut self, auto_increment: bool) -> Self {
        self.column.auto_increment = auto_increment;
        self
    }

    pub fn default_value(mut self, default_value: Option<String>) -> Self {
        self.column.default_value = default_value;
        self
    }

    pub fn build(self) -> ColumnDefinition {
        self.column
    }
}

/// Foreign key metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyDefinition {
    /// Constraint name.
    pub name: String,

    /// Referenced table name.
    pub referenced_table: String,

    /// (local column, referenced column) pairs in key order.
    pub column_pairs: Vec<(String, String)>,
}

impl ForeignKeyDefinition {
    pub fn new(name: impl Into<String>, referenced_table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            referenced_table: referenced_table.into(),
            column_pairs: Vec::new(),
        }
    }

    /// Append a column pair, keeping key order.
    pub fn with_pair(mut self, local: impl Into<String>, referenced: impl Into<String>) -> Self {
        self.column_pairs.push((local.into(), referenced.into()));
        self
    }

    pub fn local_columns(&self) -> impl Iterator<Item = &str> {
        self.column_pairs.iter().map(|(local, _)| local.as_str())
    }

    pub fn referenced_columns(&self) -> impl Iterator<Item = &str> {
        self.column_pairs.iter().map(|(_, referenced)| referenced.as_str())
    }
}

/// Table metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    /// Schema name (may be empty for engines without schemas).
    pub schema: String,

    /// Table name.
    pub name: String,

    /// Columns in ordinal order.
    pub columns: Vec<ColumnDefinition>,

    /// Primary key column names, in key order.
    pub primary_key: Vec<String>,

    /// Foreign key constraints.
    pub foreign_keys: Vec<ForeignKeyDefinition>,

    /// Unique constraint column groups, without primary key columns.
    pub unique_constraints: Vec<Vec<String>>,
}

impl TableDefinition {
    /// Build a table, checking the structural invariants.
    ///
    /// Primary key columns are removed from unique groups and groups left
    /// empty are dropped.
    pub fn new(
        schema: impl Into<String>,
        name: impl Into<String>,
        columns: Vec<ColumnDefinition>,
        primary_key: Vec<String>,
        foreign_keys: Vec<ForeignKeyDefinition>,
        unique_constraints: Vec<Vec<String>>,
    ) -> Result<Self> {
        let unique_constraints = unique_constraints
            .into_iter()
            .map(|group| {
                group
                    .into_iter()
                    .filter(|col| !primary_key.contains(col))
                    .collect::<Vec<_>>()
            })
            .filter(|group| !group.is_empty())
            .collect();

        let table = Self {
            schema: schema.into(),
            name: name.into(),
            columns,
            primary_key,
            foreign_keys,
            unique_constraints,
        };
        table.validate()?;
        Ok(table)
    }

    /// Check ordinal ordering and primary key membership.
    pub fn validate(&self) -> Result<()> {
        for pair in self.columns.windows(2) {
            if pair[1].ordinal_position <= pair[0].ordinal_position {
                return Err(ConvertError::Introspection(format!(
                    "{}: column '{}' has ordinal {} after '{}' with ordinal {}",
                    self.full_name(),
                    pair[1].name,
                    pair[1].ordinal_position,
                    pair[0].name,
                    pair[0].ordinal_position
                )));
            }
        }

        if let Some(missing) = self
            .primary_key
            .iter()
            .find(|pk| self.column(pk).is_none())
        {
            return Err(ConvertError::Introspection(format!(
                "{}: primary key column '{}' is not a column of the table",
                self.full_name(),
                missing
            )));
        }

        Ok(())
    }

    /// Get the qualified table name (`schema.table`, or `table` without a schema).
    pub fn full_name(&self) -> String {
        if self.schema.trim().is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.schema, self.name)
        }
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Column names in declared order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn has_pk(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// Copy of this table with its columns replaced.
    pub fn with_columns(&self, columns: Vec<ColumnDefinition>) -> Self {
        Self {
            columns,
            ..self.clone()
        }
    }
}

/// Database metadata produced by extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseDefinition {
    /// Logical name (the origin connection name).
    pub name: String,

    /// Catalog or schema the tables were read from.
    pub catalog: String,

    /// Tables in catalog order.
    pub tables: Vec<TableDefinition>,

    /// Character encoding reported by the origin.
    pub encoding: String,
}

impl DatabaseDefinition {
    pub fn new(
        name: impl Into<String>,
        catalog: impl Into<String>,
        tables: Vec<TableDefinition>,
        encoding: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            catalog: catalog.into(),
            tables,
            encoding: encoding.into(),
        }
    }

    /// Look up a table by name.
    pub fn table(&self, name: &str) -> Option<&TableDefinition> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Look up a table by its qualified name.
    pub fn table_by_full_name(&self, full_name: &str) -> Option<&TableDefinition> {
        self.tables.iter().find(|t| t.full_name() == full_name)
    }

    /// Copy of this database with its tables replaced.
    pub fn with_tables(&self, tables: Vec<TableDefinition>) -> Self {
        Self {
            name: self.name.clone(),
            catalog: self.catalog.clone(),
            tables,
            encoding: self.encoding.clone(),
        }
    }

    /// Total number of columns across all tables.
    pub fn column_count(&self) -> usize {
        self.tables.iter().map(|t| t.columns.len()).sum()
    }
}
