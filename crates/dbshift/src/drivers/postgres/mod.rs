//! PostgreSQL driver built on tokio-postgres.

pub mod tls;
pub mod types;

pub use tls::SslMode;

use async_trait::async_trait;
use futures::StreamExt;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Config as PgConfig, NoTls};
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::core::schema::{ColumnDefinition, TableDefinition};
use crate::core::traits::{Connection, Driver, ImportedKey, IndexColumn, RowStream, TableRef};
use crate::error::{ConvertError, Result};

use types::{convert_row, generic_type, quote_ident, select_expr};

/// Opens PostgreSQL sessions.
#[derive(Debug, Default, Clone)]
pub struct PostgresDriver;

#[async_trait]
impl Driver for PostgresDriver {
    fn engine(&self) -> &'static str {
        "postgres"
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        Ok(Box::new(PostgresConnection::connect(config).await?))
    }
}

/// One PostgreSQL session.
pub struct PostgresConnection {
    client: Client,
    schema: Option<String>,
}

impl PostgresConnection {
    /// Connect and spawn the connection task.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let endpoint = config.endpoint();

        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.get_port());
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);

        let client = match SslMode::parse(&config.ssl_mode)?.connector()? {
            Some(tls) => {
                let (client, connection) = pg_config
                    .connect(tls)
                    .await
                    .map_err(|e| ConvertError::connection(&endpoint, e))?;
                let task_endpoint = endpoint.clone();
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        warn!("PostgreSQL connection {} closed: {}", task_endpoint, e);
                    }
                });
                client
            }
            None => {
                let (client, connection) = pg_config
                    .connect(NoTls)
                    .await
                    .map_err(|e| ConvertError::connection(&endpoint, e))?;
                let task_endpoint = endpoint.clone();
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        warn!("PostgreSQL connection {} closed: {}", task_endpoint, e);
                    }
                });
                client
            }
        };

        info!("Connected to PostgreSQL: {}", endpoint);

        Ok(Self {
            client,
            schema: config.schema.clone(),
        })
    }

    async fn query_strings(
        &self,
        context: &str,
        sql: &str,
        schema: &str,
        table: &str,
    ) -> Result<Vec<String>> {
        let rows = self
            .client
            .query(sql, &[&schema, &table])
            .await
            .map_err(|e| ConvertError::introspection(context, e))?;
        Ok(rows.iter().map(|row| row.get::<_, String>(0)).collect())
    }
}

#[async_trait]
impl Connection for PostgresConnection {
    fn engine(&self) -> &str {
        "postgres"
    }

    async fn catalog(&mut self) -> Result<String> {
        let row = self
            .client
            .query_one("SELECT current_database()::text", &[])
            .await
            .map_err(|e| ConvertError::introspection("reading catalog name", e))?;
        Ok(row.get(0))
    }

    async fn schema(&mut self) -> Result<String> {
        if let Some(schema) = &self.schema {
            return Ok(schema.clone());
        }
        let row = self
            .client
            .query_one("SELECT COALESCE(current_schema(), 'public')::text", &[])
            .await
            .map_err(|e| ConvertError::introspection("reading current schema", e))?;
        Ok(row.get(0))
    }

    async fn encoding(&mut self) -> Result<Option<String>> {
        let row = self
            .client
            .query_opt(
                "SELECT pg_encoding_to_char(encoding)::text FROM pg_catalog.pg_database WHERE datname = current_database()",
                &[],
            )
            .await
            .map_err(|e| ConvertError::introspection("reading server encoding", e))?;
        Ok(row.map(|r| r.get(0)))
    }

    async fn list_tables(&mut self, schema: &str) -> Result<Vec<TableRef>> {
        let query = r#"
            SELECT table_schema::text, table_name::text
            FROM information_schema.tables
            WHERE table_type = 'BASE TABLE'
              AND table_schema = $1
            ORDER BY table_name
        "#;

        let rows = self
            .client
            .query(query, &[&schema])
            .await
            .map_err(|e| ConvertError::introspection("listing tables", e))?;

        Ok(rows
            .iter()
            .map(|row| TableRef {
                schema: row.get(0),
                name: row.get(1),
            })
            .collect())
    }

    async fn primary_keys(&mut self, schema: &str, table: &str) -> Result<Vec<String>> {
        let query = r#"
            SELECT a.attname::text
            FROM pg_catalog.pg_constraint c
            JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
            JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid
            WHERE n.nspname = $1
              AND t.relname = $2
              AND c.contype = 'p'
              AND a.attnum = ANY(c.conkey)
            ORDER BY array_position(c.conkey, a.attnum)
        "#;
        self.query_strings("reading primary key", query, schema, table)
            .await
    }

    async fn columns(&mut self, schema: &str, table: &str) -> Result<Vec<ColumnDefinition>> {
        let query = r#"
            SELECT
                column_name::text,
                udt_name::text,
                COALESCE(character_maximum_length, 0)::int4,
                COALESCE(numeric_precision, 0)::int4,
                COALESCE(numeric_scale, 0)::int4,
                is_nullable = 'YES',
                is_identity = 'YES' OR COALESCE(column_default LIKE 'nextval(%', false),
                column_default::text,
                ordinal_position::int4
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
        "#;

        let rows = self
            .client
            .query(query, &[&schema, &table])
            .await
            .map_err(|e| ConvertError::introspection("reading columns", e))?;

        let columns: Vec<ColumnDefinition> = rows
            .iter()
            .map(|row| {
                let udt_name: String = row.get(1);
                let generic = generic_type(&udt_name);
                ColumnDefinition::builder(row.get::<_, String>(0), udt_name, generic)
                    .length(row.get(2))
                    .precision(row.get(3), row.get(4))
                    .nullable(row.get(5))
                    .auto_increment(row.get(6))
                    .default_value(row.get(7))
                    .ordinal_position(row.get(8))
                    .build()
            })
            .collect();

        debug!("Loaded {} columns for {}.{}", columns.len(), schema, table);
        Ok(columns)
    }

    async fn imported_keys(&mut self, schema: &str, table: &str) -> Result<Vec<ImportedKey>> {
        let query = r#"
            SELECT
                c.conname::text,
                rt.relname::text,
                a.attname::text,
                ra.attname::text,
                k.ord::int4
            FROM pg_catalog.pg_constraint c
            JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
            JOIN pg_catalog.pg_class rt ON rt.oid = c.confrelid
            CROSS JOIN LATERAL unnest(c.conkey, c.confkey) WITH ORDINALITY AS k(attnum, refnum, ord)
            JOIN pg_catalog.pg_attribute a ON a.attrelid = c.conrelid AND a.attnum = k.attnum
            JOIN pg_catalog.pg_attribute ra ON ra.attrelid = c.confrelid AND ra.attnum = k.refnum
            WHERE n.nspname = $1
              AND t.relname = $2
              AND c.contype = 'f'
            ORDER BY c.conname, k.ord
        "#;

        let rows = self
            .client
            .query(query, &[&schema, &table])
            .await
            .map_err(|e| ConvertError::introspection("reading foreign keys", e))?;

        Ok(rows
            .iter()
            .map(|row| ImportedKey {
                constraint_name: row.get(0),
                referenced_table: row.get(1),
                local_column: row.get(2),
                referenced_column: row.get(3),
                key_seq: row.get(4),
            })
            .collect())
    }

    async fn index_columns(&mut self, schema: &str, table: &str) -> Result<Vec<IndexColumn>> {
        let query = r#"
            SELECT
                i.relname::text,
                a.attname::text,
                NOT ix.indisunique
            FROM pg_catalog.pg_index ix
            JOIN pg_catalog.pg_class i ON i.oid = ix.indexrelid
            JOIN pg_catalog.pg_class t ON t.oid = ix.indrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
            CROSS JOIN LATERAL unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
            LEFT JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
            WHERE n.nspname = $1
              AND t.relname = $2
            ORDER BY i.relname, k.ord
        "#;

        let rows = self
            .client
            .query(query, &[&schema, &table])
            .await
            .map_err(|e| ConvertError::introspection("reading unique indexes", e))?;

        Ok(rows
            .iter()
            .map(|row| IndexColumn {
                index_name: row.get(0),
                column_name: row.get(1),
                non_unique: row.get(2),
            })
            .collect())
    }

    async fn stream_rows<'a>(&'a mut self, table: &'a TableDefinition) -> Result<RowStream<'a>> {
        let projection = table
            .columns
            .iter()
            .map(select_expr)
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {} FROM {}",
            projection,
            qualified(&table.schema, &table.name)
        );
        debug!("Streaming {}", sql);

        let rows = self
            .client
            .query_raw(sql.as_str(), std::iter::empty::<&(dyn ToSql + Sync)>())
            .await?;

        let columns = table.columns.as_slice();
        Ok(rows.map(move |row| convert_row(&row?, columns)).boxed())
    }

    async fn count_rows(&mut self, schema: &str, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", qualified(schema, table));
        let row = self.client.query_one(sql.as_str(), &[]).await?;
        Ok(row.get(0))
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        Ok(self.client.execute(sql, &[]).await?)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        drop(self.client);
        Ok(())
    }
}

fn qualified(schema: &str, table: &str) -> String {
    if schema.is_empty() {
        quote_ident(table)
    } else {
        format!("{}.{}", quote_ident(schema), quote_ident(table))
    }
}
