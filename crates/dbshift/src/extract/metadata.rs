//! Schema introspection: turns catalog queries into a [`DatabaseDefinition`].

use std::collections::HashMap;

use tracing::{debug, info};

use crate::core::schema::{DatabaseDefinition, ForeignKeyDefinition, TableDefinition};
use crate::core::traits::{Connection, ImportedKey, IndexColumn};
use crate::error::Result;

/// Encoding recorded when the engine does not report one.
pub const DEFAULT_ENCODING: &str = "utf-8";

/// Reads the complete schema of the connection's default schema.
///
/// The connection is used serially: one catalog query at a time, one table
/// after another, in catalog order.
pub struct MetadataExtractor<'c> {
    conn: &'c mut dyn Connection,
}

impl<'c> MetadataExtractor<'c> {
    pub fn new(conn: &'c mut dyn Connection) -> Self {
        Self { conn }
    }

    /// Introspect every base table and build the database definition.
    pub async fn extract(&mut self, name: &str) -> Result<DatabaseDefinition> {
        let catalog = self.conn.catalog().await?;
        let schema = self.conn.schema().await?;
        let encoding = self
            .conn
            .encoding()
            .await?
            .unwrap_or_else(|| DEFAULT_ENCODING.to_string());

        let table_refs = self.conn.list_tables(&schema).await?;
        let mut tables = Vec::with_capacity(table_refs.len());

        for table_ref in table_refs {
            let table = self.table(&table_ref.schema, &table_ref.name).await?;
            debug!(
                "{}: {} columns, {} foreign keys, {} unique groups",
                table.full_name(),
                table.columns.len(),
                table.foreign_keys.len(),
                table.unique_constraints.len()
            );
            tables.push(table);
        }

        info!(
            "Introspected {} tables from {} (schema '{}', encoding {})",
            tables.len(),
            catalog,
            schema,
            encoding
        );

        Ok(DatabaseDefinition::new(name, schema, tables, encoding))
    }

    async fn table(&mut self, schema: &str, name: &str) -> Result<TableDefinition> {
        let primary_key = self.conn.primary_keys(schema, name).await?;

        let mut columns = self.conn.columns(schema, name).await?;
        columns.sort_by_key(|c| c.ordinal_position);

        let foreign_keys = group_foreign_keys(self.conn.imported_keys(schema, name).await?);
        let unique_constraints =
            group_unique_indexes(self.conn.index_columns(schema, name).await?, &primary_key);

        TableDefinition::new(
            schema,
            name,
            columns,
            primary_key,
            foreign_keys,
            unique_constraints,
        )
    }
}

/// Group foreign key column pairs by constraint name.
///
/// Constraints keep first-seen order; pairs are ordered by key sequence.
pub fn group_foreign_keys(keys: Vec<ImportedKey>) -> Vec<ForeignKeyDefinition> {
    let mut order: Vec<String> = Vec::new();
    let mut grouped: HashMap<String, (String, Vec<(i32, String, String)>)> = HashMap::new();

    for key in keys {
        let entry = grouped
            .entry(key.constraint_name.clone())
            .or_insert_with(|| {
                order.push(key.constraint_name.clone());
                (key.referenced_table.clone(), Vec::new())
            });
        entry
            .1
            .push((key.key_seq, key.local_column, key.referenced_column));
    }

    order
        .into_iter()
        .filter_map(|name| {
            let (referenced_table, mut pairs) = grouped.remove(&name)?;
            pairs.sort_by_key(|(seq, _, _)| *seq);
            let fk = ForeignKeyDefinition::new(name, referenced_table);
            Some(
                pairs
                    .into_iter()
                    .fold(fk, |fk, (_, local, referenced)| fk.with_pair(local, referenced)),
            )
        })
        .collect()
}

/// Group unique index columns by index name, in first-seen order.
///
/// Non-unique rows, rows missing an index or column name, and primary key
/// columns are skipped. Indexes left without columns are dropped.
pub fn group_unique_indexes(rows: Vec<IndexColumn>, primary_key: &[String]) -> Vec<Vec<String>> {
    let mut order: Vec<String> = Vec::new();
    let mut grouped: HashMap<String, Vec<String>> = HashMap::new();

    for row in rows {
        if row.non_unique {
            continue;
        }
        let (Some(index), Some(column)) = (row.index_name, row.column_name) else {
            continue;
        };
        if primary_key.contains(&column) {
            continue;
        }
        grouped
            .entry(index.clone())
            .or_insert_with(|| {
                order.push(index);
                Vec::new()
            })
            .push(column);
    }

    order
        .into_iter()
        .filter_map(|index| grouped.remove(&index))
        .filter(|group| !group.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::core::generic;
    use crate::core::schema::ColumnDefinition;
    use crate::core::traits::Driver;
    use crate::drivers::MemoryDriver;

    fn key(name: &str, table: &str, local: &str, referenced: &str, seq: i32) -> ImportedKey {
        ImportedKey {
            constraint_name: name.into(),
            referenced_table: table.into(),
            local_column: local.into(),
            referenced_column: referenced.into(),
            key_seq: seq,
        }
    }

    fn index(name: Option<&str>, column: Option<&str>, non_unique: bool) -> IndexColumn {
        IndexColumn {
            index_name: name.map(String::from),
            column_name: column.map(String::from),
            non_unique,
        }
    }

    #[test]
    fn test_foreign_keys_grouped_by_constraint() {
        let fks = group_foreign_keys(vec![
            key("fk_line_order", "orders", "order_no", "no", 2),
            key("fk_line_product", "products", "sku", "sku", 1),
            key("fk_line_order", "orders", "order_region", "region", 1),
        ]);

        assert_eq!(fks.len(), 2);
        assert_eq!(fks[0].name, "fk_line_order");
        assert_eq!(fks[0].referenced_table, "orders");
        assert_eq!(
            fks[0].column_pairs,
            vec![
                ("order_region".to_string(), "region".to_string()),
                ("order_no".to_string(), "no".to_string()),
            ]
        );
        assert_eq!(fks[1].name, "fk_line_product");
    }

    #[test]
    fn test_unique_indexes_grouping() {
        let pk = vec!["id".to_string()];
        let groups = group_unique_indexes(
            vec![
                index(Some("pk_users"), Some("id"), false),
                index(Some("uq_email"), Some("email"), false),
                index(Some("ix_name"), Some("name"), true),
                index(None, Some("ghost"), false),
                index(Some("uq_tenant_login"), Some("tenant"), false),
                index(Some("uq_tenant_login"), Some("login"), false),
                index(Some("uq_expr"), None, false),
            ],
            &pk,
        );

        assert_eq!(
            groups,
            vec![
                vec!["email".to_string()],
                vec!["tenant".to_string(), "login".to_string()],
            ]
        );
    }

    #[tokio::test]
    async fn test_extract_from_memory_engine() {
        let driver = MemoryDriver::new();
        let users = TableDefinition::new(
            "main",
            "users",
            vec![
                ColumnDefinition::builder("id", "int", generic::INTEGER)
                    .ordinal_position(1)
                    .nullable(false)
                    .build(),
                ColumnDefinition::builder("email", "varchar", generic::VARCHAR)
                    .ordinal_position(2)
                    .length(120)
                    .build(),
            ],
            vec!["id".into()],
            vec![],
            vec![vec!["email".into()]],
        )
        .unwrap();
        driver.add_table("crm", users, vec![]);

        let config = ConnectionConfig::new("legacy", "memory", "crm");
        let mut conn = driver.connect(&config).await.unwrap();
        let db = MetadataExtractor::new(conn.as_mut())
            .extract("legacy")
            .await
            .unwrap();

        assert_eq!(db.name, "legacy");
        assert_eq!(db.catalog, "main");
        assert_eq!(db.encoding, DEFAULT_ENCODING);
        let users = db.table("users").unwrap();
        assert_eq!(users.column_names().collect::<Vec<_>>(), vec!["id", "email"]);
        assert_eq!(users.primary_key, vec!["id".to_string()]);
        assert_eq!(users.unique_constraints, vec![vec!["email".to_string()]]);
    }
}
