//! MySQL / MariaDB adapter implementation using sqlx
//!
//! CREATE statements are captured verbatim with `SHOW CREATE TABLE` and may
//! be rewritten by the structure transformer. Table listings can be ordered
//! by foreign-key dependencies.

use crate::config::PoolConfig;
use crate::db::driver::{mask_url, DatabaseAdapter, DatabaseBackend, INSERT_BATCH_SIZE};
use crate::db::query::{quote_ident, row_columns, rows_per_statement, CellValue, Row};
use crate::db::schema::{ColumnDef, TableInfo, TableStructure};
use crate::error::{Result, SyncError};
use crate::sync::dependency::{order_tables_info, DependencyGraph};
use crate::sync::transform::rewrite_create_table;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::mysql::{MySql, MySqlConnectOptions, MySqlConnection, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::query_builder::Separated;
use sqlx::{Column, ConnectOptions, Connection, QueryBuilder, Row as _, TypeInfo};
use std::str::FromStr;

/// Character sets tried in order when opening a connection
pub const CHARSET_FALLBACKS: &[&str] = &["utf8", "utf8mb4", "latin1"];
const DEFAULT_CHARSET: &str = "utf8";

/// Placeholder limit of the MySQL binary protocol
const MAX_BIND_PARAMS: usize = 65_535;

/// Views are not copyable tables, matching the listing filter
const TABLE_EXISTS_QUERY: &str = "SELECT COUNT(*) FROM information_schema.TABLES \
    WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND TABLE_TYPE = 'BASE TABLE'";

/// MySQL adapter
pub struct MySqlAdapter {
    pool: MySqlPool,
    database: String,
}

impl MySqlAdapter {
    /// Open a pool for `url` bound to `database`
    pub async fn connect(url: &str, database: &str, pool: &PoolConfig, debug: bool) -> Result<Self> {
        let mut options = MySqlConnectOptions::from_str(url)?;
        if !debug {
            options = options.disable_statement_logging();
        }

        let pool = MySqlPoolOptions::new()
            .max_connections(pool.max_connections)
            .acquire_timeout(pool.acquire_timeout)
            .test_before_acquire(true)
            .connect_with(options)
            .await?;

        Ok(Self::from_pool(pool, database))
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: MySqlPool, database: &str) -> Self {
        Self {
            pool,
            database: database.to_string(),
        }
    }

    /// Build a `mysql://` URL with percent-encoded credentials and a charset
    pub fn build_url(
        user: &str,
        password: &str,
        host: &str,
        port: u16,
        database: &str,
        charset: &str,
    ) -> Result<String> {
        let mut url = url::Url::parse(&format!("mysql://{}:{}", host, port))
            .map_err(|e| SyncError::Config(format!("invalid MySQL host '{}': {}", host, e)))?;
        url.set_path(database);
        url.set_username(user)
            .map_err(|_| SyncError::Config("MySQL URL cannot carry a username".to_string()))?;
        if !password.is_empty() {
            url.set_password(Some(password))
                .map_err(|_| SyncError::Config("MySQL URL cannot carry a password".to_string()))?;
        }
        url.query_pairs_mut().append_pair("charset", charset);
        Ok(url.to_string())
    }

    /// Probe [`CHARSET_FALLBACKS`] against the live server and return the URL
    /// of the first character set that connects, or the default charset URL
    /// when every probe fails.
    pub async fn connection_url_with_fallback(
        user: &str,
        password: &str,
        host: &str,
        port: u16,
        database: &str,
    ) -> Result<String> {
        for charset in CHARSET_FALLBACKS {
            let url = Self::build_url(user, password, host, port, database, charset)?;
            match Self::probe(&url).await {
                Ok(()) => {
                    tracing::info!("charset {} works for {}:{}/{}", charset, host, port, database);
                    return Ok(url);
                }
                Err(e) => {
                    tracing::warn!("charset {} failed for {}: {}", charset, mask_url(&url), e);
                }
            }
        }

        tracing::warn!(
            "no charset probe succeeded for {}:{}/{}, using {}",
            host,
            port,
            database,
            DEFAULT_CHARSET
        );
        Self::build_url(user, password, host, port, database, DEFAULT_CHARSET)
    }

    async fn probe(url: &str) -> std::result::Result<(), sqlx::Error> {
        let options = MySqlConnectOptions::from_str(url)?.disable_statement_logging();
        let mut conn = MySqlConnection::connect_with(&options).await?;
        sqlx::query("SELECT 1").execute(&mut conn).await?;
        conn.close().await
    }

    /// Foreign-key references between tables of this database
    async fn dependency_graph(&self) -> Result<DependencyGraph> {
        let rows = sqlx::query(
            "SELECT CAST(TABLE_NAME AS CHAR) AS table_name, \
                    CAST(REFERENCED_TABLE_NAME AS CHAR) AS referenced_table \
             FROM information_schema.KEY_COLUMN_USAGE \
             WHERE TABLE_SCHEMA = ? \
               AND REFERENCED_TABLE_SCHEMA = ? \
               AND REFERENCED_TABLE_NAME IS NOT NULL",
        )
        .bind(&self.database)
        .bind(&self.database)
        .fetch_all(&self.pool)
        .await?;

        let mut graph = DependencyGraph::new();
        for row in &rows {
            let table = text_at(row, 0)?;
            let referenced = text_at(row, 1)?;
            graph.add_reference(&table, &referenced);
        }
        Ok(graph)
    }

    /// Column names in ordinal order; empty when the table does not exist
    async fn column_names(&self, table_name: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT CAST(COLUMN_NAME AS CHAR) FROM information_schema.COLUMNS \
             WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? ORDER BY ORDINAL_POSITION",
        )
        .bind(&self.database)
        .bind(table_name)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| text_at(row, 0)).collect()
    }

    async fn get_columns(&self, table_name: &str) -> Result<Vec<ColumnDef>> {
        let rows = sqlx::query(
            "SELECT CAST(COLUMN_NAME AS CHAR), CAST(COLUMN_TYPE AS CHAR), \
                    CAST(IS_NULLABLE AS CHAR), CAST(COLUMN_KEY AS CHAR), \
                    CAST(COLUMN_DEFAULT AS CHAR), CAST(EXTRA AS CHAR), \
                    CAST(CHARACTER_MAXIMUM_LENGTH AS SIGNED) \
             FROM information_schema.COLUMNS \
             WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
             ORDER BY ORDINAL_POSITION",
        )
        .bind(&self.database)
        .bind(table_name)
        .fetch_all(&self.pool)
        .await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let extra = opt_text_at(row, 5)?.filter(|e| !e.is_empty());
            columns.push(ColumnDef {
                name: text_at(row, 0)?,
                data_type: text_at(row, 1)?,
                is_nullable: text_at(row, 2)? == "YES",
                is_primary_key: text_at(row, 3)? == "PRI",
                default: opt_text_at(row, 4)?,
                max_length: row.try_get::<Option<i64>, _>(6)?,
                extra,
            });
        }
        Ok(columns)
    }

    async fn insert_batches(&self, table_name: &str, rows: &[Row]) -> Result<usize> {
        let columns = row_columns(rows);
        let column_list = columns
            .iter()
            .map(|c| quote_ident(c, '`'))
            .collect::<Vec<_>>()
            .join(", ");
        let per_statement = rows_per_statement(columns.len(), INSERT_BATCH_SIZE, MAX_BIND_PARAMS);
        let mut inserted = 0;

        for batch in rows.chunks(INSERT_BATCH_SIZE) {
            let mut tx = self.pool.begin().await?;
            for chunk in batch.chunks(per_statement) {
                let mut builder: QueryBuilder<MySql> = QueryBuilder::new(format!(
                    "INSERT INTO {} ({}) ",
                    quote_ident(table_name, '`'),
                    column_list
                ));
                builder.push_values(chunk, |mut b, row| {
                    for column in &columns {
                        bind_cell(&mut b, row.get(column).unwrap_or(&CellValue::Null));
                    }
                });
                builder.build().execute(&mut *tx).await?;
            }
            tx.commit().await?;
            inserted += batch.len();
            tracing::debug!("{}: committed {} of {} rows", table_name, inserted, rows.len());
        }
        Ok(inserted)
    }
}

#[async_trait]
impl DatabaseAdapter for MySqlAdapter {
    fn backend(&self) -> DatabaseBackend {
        DatabaseBackend::MySql
    }

    fn database_name(&self) -> &str {
        &self.database
    }

    async fn test_connection(&self) -> bool {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!("MySQL connection test failed for {}: {}", self.database, e);
                false
            }
        }
    }

    async fn get_tables_info(&self, order_by_dependencies: bool) -> Result<Vec<TableInfo>> {
        let rows = sqlx::query(
            "SELECT CAST(TABLE_NAME AS CHAR) AS table_name, \
                    CAST(COALESCE(DATA_LENGTH, 0) AS SIGNED) AS data_length, \
                    CAST(COALESCE(INDEX_LENGTH, 0) AS SIGNED) AS index_length \
             FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE' \
             ORDER BY TABLE_NAME",
        )
        .bind(&self.database)
        .fetch_all(&self.pool)
        .await?;

        let mut tables = Vec::with_capacity(rows.len());
        for row in &rows {
            let table_name = text_at(row, 0)?;
            let data_length: i64 = row.try_get(1)?;
            let index_length: i64 = row.try_get(2)?;

            let count_query = format!("SELECT COUNT(*) FROM {}", quote_ident(&table_name, '`'));
            let row_count: i64 = sqlx::query_scalar(&count_query).fetch_one(&self.pool).await?;

            tables.push(TableInfo::new(table_name, row_count, data_length, index_length));
        }

        if order_by_dependencies {
            tables = match self.dependency_graph().await {
                Ok(graph) => order_tables_info(tables, &graph),
                Err(e) => {
                    tracing::warn!("could not read foreign keys, using alphabetical order: {}", e);
                    tables.sort_by(|a, b| a.table_name.cmp(&b.table_name));
                    tables
                }
            };
            tracing::info!("{} tables ordered by dependencies", tables.len());
        }

        Ok(tables)
    }

    fn connection_url(&self, user: &str, password: &str, host: &str, port: u16, database: &str) -> Result<String> {
        Self::build_url(user, password, host, port, database, DEFAULT_CHARSET)
    }

    async fn get_table_structure(&self, table_name: &str, remove_foreign_keys: bool) -> Result<TableStructure> {
        let query = format!("SHOW CREATE TABLE {}", quote_ident(table_name, '`'));
        let row = match sqlx::query(&query).fetch_optional(&self.pool).await {
            Ok(row) => row,
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some("42S02") => None,
            Err(e) => return Err(e.into()),
        };
        let row = row.ok_or_else(|| SyncError::NotFound(format!("table '{}' not found", table_name)))?;

        let mut create_table_sql = text_at(&row, 1)?;
        if remove_foreign_keys {
            create_table_sql = rewrite_create_table(&create_table_sql, true);
            tracing::info!("foreign keys removed and engine/charset normalized for {}", table_name);
        }

        Ok(TableStructure {
            table_name: table_name.to_string(),
            create_table_sql,
            columns: self.get_columns(table_name).await?,
        })
    }

    async fn get_table_data(&self, table_name: &str, limit: Option<u64>) -> Result<Vec<Row>> {
        let columns = self.column_names(table_name).await?;
        if columns.is_empty() {
            return Err(SyncError::NotFound(format!("table '{}' not found", table_name)));
        }

        let mut query = format!(
            "SELECT {} FROM {}",
            columns.iter().map(|c| quote_ident(c, '`')).collect::<Vec<_>>().join(", "),
            quote_ident(table_name, '`')
        );
        if let Some(limit) = limit {
            query.push_str(&format!(" LIMIT {}", limit));
        }

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                columns
                    .iter()
                    .enumerate()
                    .map(|(i, name)| -> Result<(String, CellValue)> {
                        Ok((name.clone(), extract_cell_value(row, i, name)?))
                    })
                    .collect::<Result<Row>>()
            })
            .collect()
    }

    async fn create_table(&self, table_name: &str, ddl: &str) -> bool {
        match sqlx::raw_sql(ddl).execute(&self.pool).await {
            Ok(_) => {
                tracing::info!("table '{}' created", table_name);
                true
            }
            Err(e) => {
                tracing::error!("failed to create MySQL table {}: {}", table_name, e);
                false
            }
        }
    }

    async fn insert_data(&self, table_name: &str, rows: &[Row]) -> bool {
        if rows.is_empty() {
            return true;
        }
        match self.insert_batches(table_name, rows).await {
            Ok(count) => {
                tracing::info!("{} rows inserted into '{}'", count, table_name);
                true
            }
            Err(e) => {
                tracing::error!("failed to insert into MySQL table {}: {}", table_name, e);
                false
            }
        }
    }

    async fn table_exists(&self, table_name: &str) -> bool {
        let result: std::result::Result<i64, _> = sqlx::query_scalar(TABLE_EXISTS_QUERY)
        .bind(&self.database)
        .bind(table_name)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(count) => count > 0,
            Err(e) => {
                tracing::error!("failed to check MySQL table {}: {}", table_name, e);
                false
            }
        }
    }

    async fn drop_table(&self, table_name: &str) -> bool {
        // FOREIGN_KEY_CHECKS is session state, so every statement must run on
        // the same pooled connection.
        let mut conn = match self.pool.acquire().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!("failed to drop MySQL table {}: {}", table_name, e);
                return false;
            }
        };

        let drop_sql = format!("DROP TABLE IF EXISTS {}", quote_ident(table_name, '`'));
        let dropped: std::result::Result<(), sqlx::Error> = async {
            sqlx::query("SET FOREIGN_KEY_CHECKS = 0").execute(&mut *conn).await?;
            sqlx::query(&drop_sql).execute(&mut *conn).await?;
            Ok(())
        }
        .await;

        if let Err(e) = sqlx::query("SET FOREIGN_KEY_CHECKS = 1").execute(&mut *conn).await {
            tracing::warn!("could not restore FOREIGN_KEY_CHECKS, discarding connection: {}", e);
            let _ = conn.detach().close().await;
        }

        match dropped {
            Ok(()) => {
                tracing::info!("table '{}' dropped", table_name);
                true
            }
            Err(e) => {
                tracing::error!("failed to drop MySQL table {}: {}", table_name, e);
                false
            }
        }
    }
}

// ---- Row decoding and parameter binding ----

fn text_at(row: &MySqlRow, index: usize) -> Result<String> {
    match row.try_get::<String, _>(index) {
        Ok(v) => Ok(v),
        // information_schema reports some names with a binary collation
        Err(_) => {
            let bytes: Vec<u8> = row.try_get_unchecked(index)?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
    }
}

fn opt_text_at(row: &MySqlRow, index: usize) -> Result<Option<String>> {
    match row.try_get::<Option<String>, _>(index) {
        Ok(v) => Ok(v),
        Err(_) => {
            let bytes: Option<Vec<u8>> = row.try_get_unchecked(index)?;
            Ok(bytes.map(|b| String::from_utf8_lossy(&b).into_owned()))
        }
    }
}

fn cell<'r, T>(row: &'r MySqlRow, index: usize, map: impl FnOnce(T) -> CellValue) -> Option<CellValue>
where
    T: sqlx::Decode<'r, MySql> + sqlx::Type<MySql>,
{
    match row.try_get::<Option<T>, _>(index) {
        Ok(Some(v)) => Some(map(v)),
        Ok(None) => Some(CellValue::Null),
        Err(_) => None,
    }
}

fn extract_cell_value(row: &MySqlRow, index: usize, column: &str) -> Result<CellValue> {
    let type_name = row.columns()[index].type_info().name().to_uppercase();
    let value = match type_name.as_str() {
        "NULL" => Some(CellValue::Null),
        "BOOLEAN" => cell::<bool>(row, index, CellValue::Bool),
        "TINYINT" => cell::<i8>(row, index, |v| CellValue::Int(v as i64)),
        "SMALLINT" => cell::<i16>(row, index, |v| CellValue::Int(v as i64)),
        "INT" | "MEDIUMINT" => cell::<i32>(row, index, |v| CellValue::Int(v as i64)),
        "BIGINT" => cell::<i64>(row, index, CellValue::Int),
        "TINYINT UNSIGNED" => cell::<u8>(row, index, |v| CellValue::UInt(v as u64)),
        "SMALLINT UNSIGNED" => cell::<u16>(row, index, |v| CellValue::UInt(v as u64)),
        "INT UNSIGNED" | "MEDIUMINT UNSIGNED" => cell::<u32>(row, index, |v| CellValue::UInt(v as u64)),
        "BIGINT UNSIGNED" | "BIT" => cell::<u64>(row, index, CellValue::UInt),
        "YEAR" => cell::<u16>(row, index, |v| CellValue::UInt(v as u64)),
        "FLOAT" => cell::<f32>(row, index, |v| CellValue::Float(v as f64)),
        "DOUBLE" => cell::<f64>(row, index, CellValue::Float),
        "DECIMAL" => cell::<Decimal>(row, index, CellValue::Decimal),
        "DATE" => cell::<NaiveDate>(row, index, CellValue::Date),
        "TIME" => cell::<NaiveTime>(row, index, CellValue::Time),
        "DATETIME" => cell::<NaiveDateTime>(row, index, CellValue::DateTime),
        "TIMESTAMP" => cell::<DateTime<Utc>>(row, index, CellValue::Timestamp),
        "JSON" => cell::<serde_json::Value>(row, index, CellValue::Json),
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "GEOMETRY" => {
            cell::<Vec<u8>>(row, index, CellValue::Binary)
        }
        _ => cell::<String>(row, index, CellValue::String),
    };

    if let Some(v) = value {
        return Ok(v);
    }
    // TIME values outside 00:00-23:59 and other odd encodings land here
    if let Some(v) = cell::<String>(row, index, CellValue::String) {
        return Ok(v);
    }
    match row.try_get_unchecked::<Option<Vec<u8>>, _>(index) {
        Ok(Some(bytes)) => Ok(match String::from_utf8(bytes) {
            Ok(s) => CellValue::String(s),
            Err(e) => CellValue::Binary(e.into_bytes()),
        }),
        Ok(None) => Ok(CellValue::Null),
        Err(e) => Err(SyncError::TransferFailure(format!(
            "cannot decode {} column '{}': {}",
            type_name, column, e
        ))),
    }
}

fn bind_cell<Sep: std::fmt::Display>(b: &mut Separated<'_, '_, MySql, Sep>, value: &CellValue) {
    match value {
        CellValue::Null => {
            b.push("NULL");
        }
        CellValue::Bool(v) => {
            b.push_bind(*v);
        }
        CellValue::Int(v) => {
            b.push_bind(*v);
        }
        CellValue::UInt(v) => {
            b.push_bind(*v);
        }
        CellValue::Float(v) => {
            b.push_bind(*v);
        }
        CellValue::Decimal(v) => {
            b.push_bind(*v);
        }
        CellValue::String(v) => {
            b.push_bind(v.clone());
        }
        CellValue::Date(v) => {
            b.push_bind(*v);
        }
        CellValue::Time(v) => {
            b.push_bind(*v);
        }
        CellValue::DateTime(v) => {
            b.push_bind(*v);
        }
        CellValue::Timestamp(v) => {
            b.push_bind(*v);
        }
        CellValue::Json(v) => {
            b.push_bind(sqlx::types::Json(v.clone()));
        }
        CellValue::Uuid(v) => {
            b.push_bind(v.to_string());
        }
        CellValue::Binary(v) => {
            b.push_bind(v.clone());
        }
    }
}
