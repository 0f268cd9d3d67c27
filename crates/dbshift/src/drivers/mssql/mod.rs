//! SQL Server driver built on tiberius.

pub mod types;

use async_trait::async_trait;
use futures::StreamExt;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel, Query, Row as TdsRow};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

use crate::config::ConnectionConfig;
use crate::core::schema::{ColumnDefinition, TableDefinition};
use crate::core::traits::{Connection, Driver, ImportedKey, IndexColumn, RowStream, TableRef};
use crate::error::{ConvertError, Result};

use types::{code_page_encoding, convert_row, generic_type, quote_ident};

/// Opens SQL Server sessions.
#[derive(Debug, Default, Clone)]
pub struct MssqlDriver;

#[async_trait]
impl Driver for MssqlDriver {
    fn engine(&self) -> &'static str {
        "mssql"
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        Ok(Box::new(MssqlConnection::connect(config).await?))
    }
}

/// One SQL Server session over TCP.
pub struct MssqlConnection {
    client: Client<Compat<TcpStream>>,
    schema: Option<String>,
}

impl MssqlConnection {
    fn build_config(config: &ConnectionConfig) -> Config {
        let mut tds = Config::new();
        tds.host(&config.host);
        tds.port(config.get_port());
        tds.database(&config.database);
        tds.authentication(AuthMethod::sql_server(&config.user, &config.password));

        if config.encrypt {
            if config.trust_server_cert {
                tds.trust_cert();
            }
            tds.encryption(EncryptionLevel::Required);
        } else {
            tds.encryption(EncryptionLevel::NotSupported);
        }

        tds
    }

    /// Open the TCP stream and log in.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let endpoint = config.endpoint();
        let tds = Self::build_config(config);

        let tcp = TcpStream::connect(tds.get_addr())
            .await
            .map_err(|e| ConvertError::connection(&endpoint, e))?;
        tcp.set_nodelay(true).ok();

        let client = Client::connect(tds, tcp.compat_write())
            .await
            .map_err(|e| ConvertError::connection(&endpoint, e))?;

        info!("Connected to SQL Server: {}", endpoint);

        Ok(Self {
            client,
            schema: config.schema.clone(),
        })
    }

    /// Run a catalog query bound to (schema, table) and return the first result set.
    async fn catalog_rows(
        &mut self,
        context: &str,
        sql: &'static str,
        schema: &str,
        table: &str,
    ) -> Result<Vec<TdsRow>> {
        let mut query = Query::new(sql);
        query.bind(schema);
        query.bind(table);

        let stream = query
            .query(&mut self.client)
            .await
            .map_err(|e| ConvertError::introspection(context, e))?;
        stream
            .into_first_result()
            .await
            .map_err(|e| ConvertError::introspection(context, e))
    }

    async fn scalar_string(&mut self, context: &str, sql: &str) -> Result<Option<String>> {
        let row = self
            .client
            .simple_query(sql)
            .await
            .map_err(|e| ConvertError::introspection(context, e))?
            .into_row()
            .await
            .map_err(|e| ConvertError::introspection(context, e))?;
        Ok(row.and_then(|r| r.get::<&str, _>(0).map(str::to_string)))
    }
}

#[async_trait]
impl Connection for MssqlConnection {
    fn engine(&self) -> &str {
        "mssql"
    }

    async fn catalog(&mut self) -> Result<String> {
        Ok(self
            .scalar_string("reading catalog name", "SELECT DB_NAME()")
            .await?
            .unwrap_or_default())
    }

    async fn schema(&mut self) -> Result<String> {
        if let Some(schema) = &self.schema {
            return Ok(schema.clone());
        }
        Ok(self
            .scalar_string("reading default schema", "SELECT SCHEMA_NAME()")
            .await?
            .unwrap_or_else(|| "dbo".to_string()))
    }

    async fn encoding(&mut self) -> Result<Option<String>> {
        let sql = "SELECT CAST(COLLATIONPROPERTY(CAST(DATABASEPROPERTYEX(DB_NAME(), 'Collation') AS nvarchar(128)), 'CodePage') AS INT)";
        let row = self
            .client
            .simple_query(sql)
            .await
            .map_err(|e| ConvertError::introspection("reading code page", e))?
            .into_row()
            .await
            .map_err(|e| ConvertError::introspection("reading code page", e))?;
        Ok(row
            .and_then(|r| r.get::<i32, _>(0))
            .map(code_page_encoding))
    }

    async fn list_tables(&mut self, schema: &str) -> Result<Vec<TableRef>> {
        let mut query = Query::new(
            r#"
            SELECT TABLE_SCHEMA, TABLE_NAME
            FROM INFORMATION_SCHEMA.TABLES
            WHERE TABLE_TYPE = 'BASE TABLE'
              AND TABLE_SCHEMA = @P1
            ORDER BY TABLE_NAME
        "#,
        );
        query.bind(schema);

        let rows = query
            .query(&mut self.client)
            .await
            .map_err(|e| ConvertError::introspection("listing tables", e))?
            .into_first_result()
            .await
            .map_err(|e| ConvertError::introspection("listing tables", e))?;

        Ok(rows
            .iter()
            .map(|row| TableRef {
                schema: row.get::<&str, _>(0).unwrap_or_default().to_string(),
                name: row.get::<&str, _>(1).unwrap_or_default().to_string(),
            })
            .collect())
    }

    async fn primary_keys(&mut self, schema: &str, table: &str) -> Result<Vec<String>> {
        let query = r#"
            SELECT c.COLUMN_NAME
            FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
            JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE c
                ON c.CONSTRAINT_NAME = tc.CONSTRAINT_NAME
                AND c.TABLE_SCHEMA = tc.TABLE_SCHEMA
                AND c.TABLE_NAME = tc.TABLE_NAME
            WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY'
              AND tc.TABLE_SCHEMA = @P1
              AND tc.TABLE_NAME = @P2
            ORDER BY c.ORDINAL_POSITION
        "#;

        let rows = self
            .catalog_rows("reading primary key", query, schema, table)
            .await?;
        Ok(rows
            .iter()
            .map(|row| row.get::<&str, _>(0).unwrap_or_default().to_string())
            .collect())
    }

    async fn columns(&mut self, schema: &str, table: &str) -> Result<Vec<ColumnDefinition>> {
        let query = r#"
            SELECT
                COLUMN_NAME,
                DATA_TYPE,
                CAST(ISNULL(CHARACTER_MAXIMUM_LENGTH, 0) AS INT),
                CAST(ISNULL(NUMERIC_PRECISION, 0) AS INT),
                CAST(ISNULL(NUMERIC_SCALE, 0) AS INT),
                CASE WHEN IS_NULLABLE = 'YES' THEN 1 ELSE 0 END,
                ISNULL(COLUMNPROPERTY(OBJECT_ID(QUOTENAME(TABLE_SCHEMA) + '.' + QUOTENAME(TABLE_NAME)), COLUMN_NAME, 'IsIdentity'), 0),
                COLUMN_DEFAULT,
                ORDINAL_POSITION
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2
            ORDER BY ORDINAL_POSITION
        "#;

        let rows = self
            .catalog_rows("reading columns", query, schema, table)
            .await?;

        let columns: Vec<ColumnDefinition> = rows
            .iter()
            .map(|row| {
                let data_type = row.get::<&str, _>(1).unwrap_or_default();
                ColumnDefinition::builder(
                    row.get::<&str, _>(0).unwrap_or_default(),
                    data_type,
                    generic_type(data_type),
                )
                .length(row.get::<i32, _>(2).unwrap_or(0))
                .precision(
                    row.get::<i32, _>(3).unwrap_or(0),
                    row.get::<i32, _>(4).unwrap_or(0),
                )
                .nullable(row.get::<i32, _>(5).unwrap_or(0) == 1)
                .auto_increment(row.get::<i32, _>(6).unwrap_or(0) == 1)
                .default_value(row.get::<&str, _>(7).map(str::to_string))
                .ordinal_position(row.get::<i32, _>(8).unwrap_or(0))
                .build()
            })
            .collect();

        debug!("Loaded {} columns for {}.{}", columns.len(), schema, table);
        Ok(columns)
    }

    async fn imported_keys(&mut self, schema: &str, table: &str) -> Result<Vec<ImportedKey>> {
        let query = r#"
            SELECT
                fk.name,
                rt.name,
                pc.name,
                rc.name,
                CAST(fkc.constraint_column_id AS INT)
            FROM sys.foreign_keys fk
            JOIN sys.foreign_key_columns fkc ON fkc.constraint_object_id = fk.object_id
            JOIN sys.tables pt ON fk.parent_object_id = pt.object_id
            JOIN sys.schemas ps ON pt.schema_id = ps.schema_id
            JOIN sys.tables rt ON fk.referenced_object_id = rt.object_id
            JOIN sys.columns pc ON fkc.parent_object_id = pc.object_id AND fkc.parent_column_id = pc.column_id
            JOIN sys.columns rc ON fkc.referenced_object_id = rc.object_id AND fkc.referenced_column_id = rc.column_id
            WHERE ps.name = @P1 AND pt.name = @P2
            ORDER BY fk.name, fkc.constraint_column_id
        "#;

        let rows = self
            .catalog_rows("reading foreign keys", query, schema, table)
            .await?;

        Ok(rows
            .iter()
            .map(|row| ImportedKey {
                constraint_name: row.get::<&str, _>(0).unwrap_or_default().to_string(),
                referenced_table: row.get::<&str, _>(1).unwrap_or_default().to_string(),
                local_column: row.get::<&str, _>(2).unwrap_or_default().to_string(),
                referenced_column: row.get::<&str, _>(3).unwrap_or_default().to_string(),
                key_seq: row.get::<i32, _>(4).unwrap_or(0),
            })
            .collect())
    }

    async fn index_columns(&mut self, schema: &str, table: &str) -> Result<Vec<IndexColumn>> {
        let query = r#"
            SELECT
                i.name,
                c.name,
                CAST(CASE WHEN i.is_unique = 1 THEN 0 ELSE 1 END AS BIT)
            FROM sys.indexes i
            JOIN sys.index_columns ic ON i.object_id = ic.object_id AND i.index_id = ic.index_id
            JOIN sys.columns c ON ic.object_id = c.object_id AND ic.column_id = c.column_id
            JOIN sys.tables t ON i.object_id = t.object_id
            JOIN sys.schemas s ON t.schema_id = s.schema_id
            WHERE s.name = @P1
              AND t.name = @P2
              AND i.type > 0
              AND ic.is_included_column = 0
            ORDER BY i.name, ic.key_ordinal
        "#;

        let rows = self
            .catalog_rows("reading unique indexes", query, schema, table)
            .await?;

        Ok(rows
            .iter()
            .map(|row| IndexColumn {
                index_name: row.get::<&str, _>(0).map(str::to_string),
                column_name: row.get::<&str, _>(1).map(str::to_string),
                non_unique: row.get::<bool, _>(2).unwrap_or(true),
            })
            .collect())
    }

    async fn stream_rows<'a>(&'a mut self, table: &'a TableDefinition) -> Result<RowStream<'a>> {
        let projection = table
            .columns
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {} FROM {}",
            projection,
            qualified(&table.schema, &table.name)
        );
        debug!("Streaming {}", sql);

        let rows = self.client.simple_query(sql).await?.into_row_stream();

        let columns = table.columns.as_slice();
        Ok(rows.map(move |row| convert_row(&row?, columns)).boxed())
    }

    async fn count_rows(&mut self, schema: &str, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT_BIG(*) FROM {}", qualified(schema, table));
        let row = self.client.simple_query(sql).await?.into_row().await?;
        Ok(row.and_then(|r| r.get::<i64, _>(0)).unwrap_or(0))
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        let result = self.client.execute(sql, &[]).await?;
        Ok(result.total())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.client.close().await?;
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
