//! MySQL/MariaDB driver built on sqlx.
//!
//! A MySQL database is also its only schema, so the catalog and the
//! default schema are the same name.

pub mod types;

use async_trait::async_trait;
use futures::StreamExt;
use sqlx::mysql::{
    MySqlConnectOptions, MySqlConnection as SqlxConnection, MySqlRow, MySqlSslMode,
};
use sqlx::{Connection as _, Row as _};
use tracing::{debug, info};

use crate::config::ConnectionConfig;
use crate::core::schema::{ColumnDefinition, TableDefinition};
use crate::core::traits::{Connection, Driver, ImportedKey, IndexColumn, RowStream, TableRef};
use crate::drivers::postgres::SslMode;
use crate::error::{ConvertError, Result};

use types::{convert_row, generic_type, quote_ident, select_expr};

/// Opens MySQL sessions.
#[derive(Debug, Default, Clone)]
pub struct MysqlDriver;

#[async_trait]
impl Driver for MysqlDriver {
    fn engine(&self) -> &'static str {
        "mysql"
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        Ok(Box::new(MysqlConnection::connect(config).await?))
    }
}

/// sqlx TLS mode for an `ssl_mode` setting.
pub fn ssl_mode(mode: SslMode) -> MySqlSslMode {
    match mode {
        SslMode::Disable => MySqlSslMode::Disabled,
        SslMode::Require => MySqlSslMode::Required,
        SslMode::VerifyCa => MySqlSslMode::VerifyCa,
        SslMode::VerifyFull => MySqlSslMode::VerifyIdentity,
    }
}

/// One MySQL session.
pub struct MysqlConnection {
    conn: SqlxConnection,
    schema: Option<String>,
    /// SQL text of the open row stream, which borrows it.
    statement: String,
}

impl MysqlConnection {
    fn build_options(config: &ConnectionConfig) -> Result<MySqlConnectOptions> {
        Ok(MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.get_port())
            .database(&config.database)
            .username(&config.user)
            .password(&config.password)
            .ssl_mode(ssl_mode(SslMode::parse(&config.ssl_mode)?)))
    }

    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let endpoint = config.endpoint();
        let options = Self::build_options(config)?;

        let conn = SqlxConnection::connect_with(&options)
            .await
            .map_err(|e| ConvertError::connection(&endpoint, e))?;

        info!("Connected to MySQL: {}", endpoint);

        Ok(Self {
            conn,
            schema: config.schema.clone(),
            statement: String::new(),
        })
    }

    /// Run a catalog query bound to (schema, table).
    async fn catalog_rows(
        &mut self,
        context: &str,
        sql: &'static str,
        schema: &str,
        table: &str,
    ) -> Result<Vec<MySqlRow>> {
        sqlx::query(sql)
            .bind(schema)
            .bind(table)
            .fetch_all(&mut self.conn)
            .await
            .map_err(|e| ConvertError::introspection(context, e))
    }

    async fn scalar_string(
        &mut self,
        context: &str,
        sql: &'static str,
    ) -> Result<Option<String>> {
        let row = sqlx::query(sql)
            .fetch_one(&mut self.conn)
            .await
            .map_err(|e| ConvertError::introspection(context, e))?;
        Ok(row.try_get::<Option<String>, _>(0)?)
    }
}

#[async_trait]
impl Connection for MysqlConnection {
    fn engine(&self) -> &str {
        "mysql"
    }

    async fn catalog(&mut self) -> Result<String> {
        Ok(self
            .scalar_string("reading catalog name", "SELECT CAST(DATABASE() AS CHAR(255))")
            .await?
            .unwrap_or_default())
    }

    async fn schema(&mut self) -> Result<String> {
        if let Some(schema) = &self.schema {
            return Ok(schema.clone());
        }
        self.catalog().await
    }

    async fn encoding(&mut self) -> Result<Option<String>> {
        self.scalar_string(
            "reading character set",
            "SELECT CAST(@@character_set_database AS CHAR(64))",
        )
        .await
    }

    async fn list_tables(&mut self, schema: &str) -> Result<Vec<TableRef>> {
        let query = r#"
            SELECT
                CAST(TABLE_SCHEMA AS CHAR(255)),
                CAST(TABLE_NAME AS CHAR(255))
            FROM INFORMATION_SCHEMA.TABLES
            WHERE TABLE_TYPE = 'BASE TABLE'
              AND TABLE_SCHEMA = ?
            ORDER BY TABLE_NAME
        "#;

        let rows = sqlx::query(query)
            .bind(schema)
            .fetch_all(&mut self.conn)
            .await
            .map_err(|e| ConvertError::introspection("listing tables", e))?;

        rows.iter()
            .map(|row| -> Result<TableRef> {
                Ok(TableRef {
                    schema: row.try_get(0)?,
                    name: row.try_get(1)?,
                })
            })
            .collect()
    }

    async fn primary_keys(&mut self, schema: &str, table: &str) -> Result<Vec<String>> {
        let query = r#"
            SELECT CAST(COLUMN_NAME AS CHAR(255))
            FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND CONSTRAINT_NAME = 'PRIMARY'
            ORDER BY ORDINAL_POSITION
        "#;

        let rows = self
            .catalog_rows("reading primary key", query, schema, table)
            .await?;
        rows.iter()
            .map(|row| -> Result<String> { Ok(row.try_get(0)?) })
            .collect()
    }

    async fn columns(&mut self, schema: &str, table: &str) -> Result<Vec<ColumnDefinition>> {
        // LONGTEXT and friends report lengths past i32::MAX
        let query = r#"
            SELECT
                CAST(COLUMN_NAME AS CHAR(255)),
                CAST(DATA_TYPE AS CHAR(255)),
                CAST(LEAST(COALESCE(CHARACTER_MAXIMUM_LENGTH, 0), 2147483647) AS SIGNED),
                CAST(COALESCE(NUMERIC_PRECISION, 0) AS SIGNED),
                CAST(COALESCE(NUMERIC_SCALE, 0) AS SIGNED),
                CAST(IS_NULLABLE = 'YES' AS SIGNED),
                CAST(EXTRA LIKE '%auto_increment%' AS SIGNED),
                CAST(COLUMN_DEFAULT AS CHAR),
                CAST(ORDINAL_POSITION AS SIGNED)
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION
        "#;

        let rows = self
            .catalog_rows("reading columns", query, schema, table)
            .await?;

        let columns = rows
            .iter()
            .map(|row| -> Result<ColumnDefinition> {
                let data_type: String = row.try_get(1)?;
                let generic = generic_type(&data_type);
                Ok(ColumnDefinition::builder(row.try_get::<String, _>(0)?, data_type, generic)
                    .length(int_column(row, 2)?)
                    .precision(int_column(row, 3)?, int_column(row, 4)?)
                    .nullable(int_column(row, 5)? == 1)
                    .auto_increment(int_column(row, 6)? == 1)
                    .default_value(row.try_get::<Option<String>, _>(7)?)
                    .ordinal_position(int_column(row, 8)?)
                    .build())
            })
            .collect::<Result<Vec<_>>>()?;

        debug!("Loaded {} columns for {}.{}", columns.len(), schema, table);
        Ok(columns)
    }

    async fn imported_keys(&mut self, schema: &str, table: &str) -> Result<Vec<ImportedKey>> {
        let query = r#"
            SELECT
                CAST(CONSTRAINT_NAME AS CHAR(255)),
                CAST(REFERENCED_TABLE_NAME AS CHAR(255)),
                CAST(COLUMN_NAME AS CHAR(255)),
                CAST(REFERENCED_COLUMN_NAME AS CHAR(255)),
                CAST(ORDINAL_POSITION AS SIGNED)
            FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE
            WHERE TABLE_SCHEMA = ?
              AND TABLE_NAME = ?
              AND REFERENCED_TABLE_NAME IS NOT NULL
            ORDER BY CONSTRAINT_NAME, ORDINAL_POSITION
        "#;

        let rows = self
            .catalog_rows("reading foreign keys", query, schema, table)
            .await?;

        rows.iter()
            .map(|row| -> Result<ImportedKey> {
                Ok(ImportedKey {
                    constraint_name: row.try_get(0)?,
                    referenced_table: row.try_get(1)?,
                    local_column: row.try_get(2)?,
                    referenced_column: row.try_get(3)?,
                    key_seq: int_column(row, 4)?,
                })
            })
            .collect()
    }

    async fn index_columns(&mut self, schema: &str, table: &str) -> Result<Vec<IndexColumn>> {
        let query = r#"
            SELECT
                CAST(INDEX_NAME AS CHAR(255)),
                CAST(COLUMN_NAME AS CHAR(255)),
                CAST(NON_UNIQUE AS SIGNED)
            FROM INFORMATION_SCHEMA.STATISTICS
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
            ORDER BY INDEX_NAME, SEQ_IN_INDEX
        "#;

        let rows = self
            .catalog_rows("reading unique indexes", query, schema, table)
            .await?;

        rows.iter()
            .map(|row| -> Result<IndexColumn> {
                Ok(IndexColumn {
                    index_name: row.try_get(0)?,
                    column_name: row.try_get(1)?,
                    non_unique: int_column(row, 2)? != 0,
                })
            })
            .collect()
    }

    async fn stream_rows<'a>(&'a mut self, table: &'a TableDefinition) -> Result<RowStream<'a>> {
        let projection = table
            .columns
            .iter()
            .map(select_expr)
            .collect::<Vec<_>>()
            .join(", ");
        self.statement = format!(
            "SELECT {} FROM {}",
            projection,
            qualified(&table.schema, &table.name)
        );
        debug!("Streaming {}", self.statement);

        let rows = sqlx::query(self.statement.as_str()).fetch(&mut self.conn);

        let columns = table.columns.as_slice();
        Ok(rows.map(move |row| convert_row(&row?, columns)).boxed())
    }

    async fn count_rows(&mut self, schema: &str, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", qualified(schema, table));
        let row = sqlx::query(&sql).fetch_one(&mut self.conn).await?;
        Ok(row.try_get(0)?)
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        let result = sqlx::query(sql)
            .persistent(false)
            .execute(&mut self.conn)
            .await?;
        Ok(result.rows_affected())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.conn.close().await?;
        Ok(())
    }
}

/// Integer catalog column, clamped into `i32`.
fn int_column(row: &MySqlRow, idx: usize) -> Result<i32> {
    let value = row.try_get::<Option<i64>, _>(idx)?.unwrap_or(0);
    Ok(value.clamp(i32::MIN as i64, i32::MAX as i64) as i32)
}

fn qualified(schema: &str, table: &str) -> String {
    if schema.is_empty() {
        quote_ident(table)
    } else {
        format!("{}.{}", quote_ident(schema), quote_ident(table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssl_mode() {
        assert!(matches!(ssl_mode(SslMode::Disable), MySqlSslMode::Disabled));
        assert!(matches!(ssl_mode(SslMode::Require), MySqlSslMode::Required));
        assert!(matches!(
            ssl_mode(SslMode::VerifyFull),
            MySqlSslMode::VerifyIdentity
        ));
    }

    #[test]
    fn test_invalid_ssl_mode_rejected() {
        let mut config = ConnectionConfig::new("shop", "mysql", "shop");
        config.host = "db1".into();
        config.ssl_mode = "sometimes".into();
        let err = MysqlConnection::build_options(&config).unwrap_err();
        assert!(matches!(err, ConvertError::Config(_)));
    }

    #[test]
    fn test_qualified() {
        assert_eq!(qualified("shop", "orders"), "`shop`.`orders`");
        assert_eq!(qualified("", "orders"), "`orders`");
    }
}
