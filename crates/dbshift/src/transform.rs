//! Transformation stage: target type mapping, ordering and SQL generation.

use tracing::{info, warn};

use crate::artifacts::MigrationWorkspace;
use crate::core::schema::{DatabaseDefinition, TableDefinition};
use crate::dependency;
use crate::error::{ConvertError, Result};
use crate::sqlgen::{GenerationSummary, SqlGenerator};
use crate::typemap::ConversionMap;

/// Output of a transformation run.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformationResult {
    /// The definition with target types set.
    pub definition: DatabaseDefinition,
    /// Qualified table names, referenced tables first.
    pub execution_order: Vec<String>,
    pub generation: GenerationSummary,
}

/// A column whose generic type has no entry in the conversion map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMappingGap {
    pub table: String,
    pub column: String,
    pub origin_type: String,
    pub generic_type: i32,
}

/// Rewrites a database definition for one target dialect.
pub struct Transformer {
    map: ConversionMap,
}

impl Transformer {
    pub fn new(map: ConversionMap) -> Self {
        Self { map }
    }

    /// Map types, persist `target.meta.json`, resolve the table order and
    /// generate the SQL artifacts.
    pub fn transform(
        &self,
        db: &DatabaseDefinition,
        workspace: &MigrationWorkspace,
    ) -> Result<TransformationResult> {
        let (definition, gaps) = map_target_types(db, &self.map);
        for gap in &gaps {
            warn!(
                "{}.{}: no {} type for '{}' (generic {}), using INVALID",
                gap.table,
                gap.column,
                self.map.dialect(),
                gap.origin_type,
                gap.generic_type
            );
        }
        if !gaps.is_empty() {
            warn!(
                "{} of {} columns have no type mapping for {}",
                gaps.len(),
                definition.column_count(),
                self.map.dialect()
            );
        }

        workspace.write_target_meta(&definition)?;

        let ordered = dependency::resolve(&definition.tables)?;
        let execution_order: Vec<String> = ordered.iter().map(|t| t.full_name()).collect();
        info!("Execution order: {}", execution_order.join(", "));

        let generation =
            SqlGenerator::new(workspace, self.map.target_dialect()).generate(&ordered)?;

        Ok(TransformationResult {
            definition,
            execution_order,
            generation,
        })
    }
}

/// New definition with every column's target type taken from the map.
///
/// Unmapped columns get `INVALID` and are reported as gaps.
pub fn map_target_types(
    db: &DatabaseDefinition,
    map: &ConversionMap,
) -> (DatabaseDefinition, Vec<TypeMappingGap>) {
    let mut gaps = Vec::new();

    let tables = db
        .tables
        .iter()
        .map(|table| {
            let columns = table
                .columns
                .iter()
                .map(|column| {
                    if map.get(column.generic_type).is_none() {
                        gaps.push(TypeMappingGap {
                            table: table.full_name(),
                            column: column.name.clone(),
                            origin_type: column.origin_type.clone(),
                            generic_type: column.generic_type,
                        });
                    }
                    column.with_target_type(map.target_type(column.generic_type))
                })
                .collect();
            table.with_columns(columns)
        })
        .collect();

    (db.with_tables(tables), gaps)
}

/// Tables of `db` in execution order.
pub fn ordered_tables<'d>(
    db: &'d DatabaseDefinition,
    execution_order: &[String],
) -> Result<Vec<&'d TableDefinition>> {
    execution_order
        .iter()
        .map(|name| {
            db.table_by_full_name(name).ok_or_else(|| {
                ConvertError::Config(format!("Table '{}' is not part of '{}'", name, db.name))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::SqlKind;
    use crate::core::generic;
    use crate::core::schema::{ColumnDefinition, ForeignKeyDefinition};
    use std::collections::HashMap;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn map() -> ConversionMap {
        let mut types = HashMap::new();
        types.insert(generic::INTEGER, "INTEGER".to_string());
        types.insert(generic::VARCHAR, "VARCHAR".to_string());
        ConversionMap::new("test", types)
    }

    fn db() -> DatabaseDefinition {
        let customers = TableDefinition::new(
            "main",
            "customers",
            vec![
                ColumnDefinition::builder("id", "int", generic::INTEGER)
                    .ordinal_position(1)
                    .build(),
                ColumnDefinition::builder("name", "varchar", generic::VARCHAR)
                    .ordinal_position(2)
                    .length(50)
                    .build(),
            ],
            vec!["id".into()],
            vec![],
            vec![],
        )
        .unwrap();
        let orders = TableDefinition::new(
            "main",
            "orders",
            vec![
                ColumnDefinition::builder("id", "int", generic::INTEGER)
                    .ordinal_position(1)
                    .build(),
                ColumnDefinition::builder("customer_id", "int", generic::INTEGER)
                    .ordinal_position(2)
                    .build(),
                ColumnDefinition::builder("placed", "geometry", generic::OTHER)
                    .ordinal_position(3)
                    .build(),
            ],
            vec!["id".into()],
            vec![ForeignKeyDefinition::new("fk_customer", "customers").with_pair("customer_id", "id")],
            vec![],
        )
        .unwrap();
        DatabaseDefinition::new("shop", "main", vec![orders, customers], "utf-8")
    }

    #[test]
    fn test_map_target_types() {
        let original = db();
        let (mapped, gaps) = map_target_types(&original, &map());

        assert!(original.tables[0].columns.iter().all(|c| c.target_type.is_none()));
        let orders = mapped.table("orders").unwrap();
        assert_eq!(orders.columns[0].target_type.as_deref(), Some("INTEGER"));
        assert_eq!(orders.columns[2].target_type.as_deref(), Some("INVALID"));
        assert_eq!(
            gaps,
            vec![TypeMappingGap {
                table: "main.orders".into(),
                column: "placed".into(),
                origin_type: "geometry".into(),
                generic_type: generic::OTHER,
            }]
        );
    }

    #[test]
    fn test_transform_writes_meta_and_ddl() {
        let dir = TempDir::new().unwrap();
        let ws = MigrationWorkspace::new(dir.path(), Uuid::new_v4());

        let result = Transformer::new(map()).transform(&db(), &ws).unwrap();

        assert_eq!(result.execution_order, vec!["main.customers", "main.orders"]);
        assert_eq!(ws.read_target_meta().unwrap(), result.definition);
        assert_eq!(result.generation.ddl_files, 2);
        assert_eq!(result.generation.dml_files, 0);

        let ordered = ordered_tables(&result.definition, &result.execution_order).unwrap();
        let ddl = ws.read_sql(SqlKind::Ddl, ordered[1]).unwrap().unwrap();
        assert!(ddl.contains("\tplaced INVALID,\n"));
    }

    #[test]
    fn test_cycle_stops_generation() {
        let dir = TempDir::new().unwrap();
        let ws = MigrationWorkspace::new(dir.path(), Uuid::new_v4());
        let original = db();
        let customers = original.table("customers").unwrap();
        let cyclic = TableDefinition {
            foreign_keys: vec![ForeignKeyDefinition::new("fk_last", "orders").with_pair("id", "id")],
            ..customers.clone()
        };
        let db = original.with_tables(vec![original.tables[0].clone(), cyclic]);

        let err = Transformer::new(map()).transform(&db, &ws).unwrap_err();

        assert!(matches!(err, ConvertError::CyclicDependency { .. }));
        assert!(ws.list_ddl(0, 10).unwrap().files.is_empty());
    }

    #[test]
    fn test_ordered_tables_unknown_name() {
        assert!(ordered_tables(&db(), &["main.ghost".to_string()]).is_err());
    }
}
