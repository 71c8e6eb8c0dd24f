//! PostgreSQL adapter implementation using sqlx
//!
//! Postgres has no `SHOW CREATE TABLE`, so the CREATE statement is synthesized
//! from the catalog. Only the `public` schema is considered.

use crate::config::PoolConfig;
use crate::db::driver::{DatabaseAdapter, DatabaseBackend, INSERT_BATCH_SIZE};
use crate::db::query::{quote_ident, row_columns, rows_per_statement, CellValue, Row};
use crate::db::schema::{ColumnDef, TableInfo, TableStructure};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow, Postgres};
use sqlx::query_builder::Separated;
use sqlx::{Column, ConnectOptions, QueryBuilder, Row as _, TypeInfo};
use std::collections::HashMap;
use std::str::FromStr;

/// Schema every table is read from and written to
pub const SCHEMA: &str = "public";

const MAX_BIND_PARAMS: usize = 65_535;

/// Views are not copyable tables, matching the listing filter
const TABLE_EXISTS_QUERY: &str = "SELECT COUNT(*) FROM information_schema.tables \
    WHERE table_schema = $1 AND table_name = $2 AND table_type = 'BASE TABLE'";

/// Catalog types decoded natively; anything else is read through `::text`.
/// `numeric` goes through text as well: `Decimal` holds at most 28 digits.
const NATIVE_UDT_NAMES: &[&str] = &[
    "bool", "int2", "int4", "int8", "float4", "float8", "text", "varchar", "bpchar", "name", "date",
    "time", "timestamp", "timestamptz", "json", "jsonb", "uuid", "bytea",
];

/// PostgreSQL adapter
pub struct PostgresAdapter {
    pool: PgPool,
    database: String,
}

impl PostgresAdapter {
    pub async fn connect(url: &str, database: &str, pool: &PoolConfig, debug: bool) -> Result<Self> {
        let mut options = PgConnectOptions::from_str(url)?;
        if !debug {
            options = options.disable_statement_logging();
        }

        let pool = PgPoolOptions::new()
            .max_connections(pool.max_connections)
            .acquire_timeout(pool.acquire_timeout)
            .test_before_acquire(true)
            .connect_with(options)
            .await?;

        Ok(Self::from_pool(pool, database))
    }

    pub fn from_pool(pool: PgPool, database: &str) -> Self {
        Self {
            pool,
            database: database.to_string(),
        }
    }

    /// Build a `postgres://` URL with percent-encoded credentials
    pub fn build_url(user: &str, password: &str, host: &str, port: u16, database: &str) -> Result<String> {
        let mut url = url::Url::parse(&format!("postgres://{}:{}", host, port))
            .map_err(|e| SyncError::Config(format!("invalid PostgreSQL host '{}': {}", host, e)))?;
        url.set_path(database);
        url.set_username(user)
            .map_err(|_| SyncError::Config("PostgreSQL URL cannot carry a username".to_string()))?;
        if !password.is_empty() {
            url.set_password(Some(password))
                .map_err(|_| SyncError::Config("PostgreSQL URL cannot carry a password".to_string()))?;
        }
        Ok(url.to_string())
    }

    async fn get_columns(&self, table_name: &str) -> Result<Vec<ColumnDef>> {
        let rows = sqlx::query(
            "SELECT c.column_name::text, \
                    format_type(a.atttypid, a.atttypmod) AS declared_type, \
                    c.udt_name::text, \
                    c.is_nullable::text, \
                    c.column_default::text, \
                    c.character_maximum_length::bigint, \
                    (i.indrelid IS NOT NULL) AS is_primary_key \
             FROM information_schema.columns c \
             JOIN pg_namespace n ON n.nspname = c.table_schema \
             JOIN pg_class cl ON cl.relnamespace = n.oid AND cl.relname = c.table_name \
             JOIN pg_attribute a ON a.attrelid = cl.oid AND a.attname = c.column_name \
             LEFT JOIN pg_index i ON i.indrelid = cl.oid AND i.indisprimary AND a.attnum = ANY(i.indkey) \
             WHERE c.table_schema = $1 AND c.table_name = $2 \
             ORDER BY c.ordinal_position",
        )
        .bind(SCHEMA)
        .bind(table_name)
        .fetch_all(&self.pool)
        .await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let is_nullable: String = row.try_get(3)?;
            columns.push(ColumnDef {
                name: row.try_get(0)?,
                data_type: row.try_get(1)?,
                is_nullable: is_nullable == "YES",
                is_primary_key: row.try_get(6)?,
                default: row.try_get(4)?,
                max_length: row.try_get(5)?,
                extra: row.try_get::<Option<String>, _>(2)?,
            });
        }
        Ok(columns)
    }

    /// Column names with their udt names, in ordinal order
    async fn column_types(&self, table_name: &str) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query(
            "SELECT column_name::text, udt_name::text FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 ORDER BY ordinal_position",
        )
        .bind(SCHEMA)
        .bind(table_name)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<(String, String)> { Ok((row.try_get(0)?, row.try_get(1)?)) })
            .collect()
    }

    /// Declared types of the destination columns, used as explicit casts on insert
    async fn declared_types(&self, table_name: &str) -> Result<HashMap<String, String>> {
        let rows = sqlx::query(
            "SELECT a.attname::text, format_type(a.atttypid, a.atttypmod) \
             FROM pg_attribute a \
             JOIN pg_class cl ON cl.oid = a.attrelid \
             JOIN pg_namespace n ON n.oid = cl.relnamespace \
             WHERE n.nspname = $1 AND cl.relname = $2 AND a.attnum > 0 AND NOT a.attisdropped",
        )
        .bind(SCHEMA)
        .bind(table_name)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<(String, String)> { Ok((row.try_get(0)?, row.try_get(1)?)) })
            .collect()
    }

    async fn insert_batches(&self, table_name: &str, rows: &[Row]) -> Result<usize> {
        let columns = row_columns(rows);
        let casts = self.declared_types(table_name).await?;
        let column_list = columns
            .iter()
            .map(|c| quote_ident(c, '"'))
            .collect::<Vec<_>>()
            .join(", ");
        let per_statement = rows_per_statement(columns.len(), INSERT_BATCH_SIZE, MAX_BIND_PARAMS);
        let mut inserted = 0;

        for batch in rows.chunks(INSERT_BATCH_SIZE) {
            let mut tx = self.pool.begin().await?;
            for chunk in batch.chunks(per_statement) {
                let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                    "INSERT INTO {} ({}) ",
                    quote_ident(table_name, '"'),
                    column_list
                ));
                builder.push_values(chunk, |mut b, row| {
                    for column in &columns {
                        bind_cell(&mut b, row.get(column).unwrap_or(&CellValue::Null));
                        if let Some(ty) = casts.get(column) {
                            b.push_unseparated(format!("::{}", ty));
                        }
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

    /// Columns whose default draws from a sequence
    async fn sequence_columns(&self, table_name: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT column_name::text FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 AND column_default LIKE 'nextval(%' \
             ORDER BY ordinal_position",
        )
        .bind(SCHEMA)
        .bind(table_name)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<String> { Ok(row.try_get(0)?) })
            .collect()
    }

    /// Move each owned sequence past the copied ids so later inserts do not collide
    async fn reset_sequences(&self, table_name: &str) -> Result<()> {
        for column in self.sequence_columns(table_name).await? {
            sqlx::query(&sequence_reset_sql(table_name, &column))
                .execute(&self.pool)
                .await?;
            tracing::debug!("{}: sequence of '{}' advanced", table_name, column);
        }
        Ok(())
    }
}

#[async_trait]
impl DatabaseAdapter for PostgresAdapter {
    fn backend(&self) -> DatabaseBackend {
        DatabaseBackend::Postgres
    }

    fn database_name(&self) -> &str {
        &self.database
    }

    async fn test_connection(&self) -> bool {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!("PostgreSQL connection test failed for {}: {}", self.database, e);
                false
            }
        }
    }

    async fn get_tables_info(&self, order_by_dependencies: bool) -> Result<Vec<TableInfo>> {
        if order_by_dependencies {
            tracing::debug!("dependency ordering is not applied to PostgreSQL listings");
        }

        let rows = sqlx::query(
            "SELECT t.table_name::text AS table_name, \
                    COALESCE(pg_relation_size(c.oid), 0)::bigint AS data_length, \
                    COALESCE(pg_total_relation_size(c.oid) - pg_relation_size(c.oid), 0)::bigint AS index_length \
             FROM information_schema.tables t \
             JOIN pg_namespace n ON n.nspname = t.table_schema \
             LEFT JOIN pg_class c ON c.relname = t.table_name AND c.relnamespace = n.oid \
             WHERE t.table_schema = $1 AND t.table_type = 'BASE TABLE' \
             ORDER BY t.table_name",
        )
        .bind(SCHEMA)
        .fetch_all(&self.pool)
        .await?;

        let mut tables = Vec::with_capacity(rows.len());
        for row in &rows {
            let table_name: String = row.try_get(0)?;
            let data_length: i64 = row.try_get(1)?;
            let index_length: i64 = row.try_get(2)?;

            let count_query = format!("SELECT COUNT(*) FROM {}", quote_ident(&table_name, '"'));
            let row_count: i64 = sqlx::query_scalar(&count_query).fetch_one(&self.pool).await?;

            tables.push(TableInfo::new(table_name, row_count, data_length, index_length));
        }
        Ok(tables)
    }

    fn connection_url(&self, user: &str, password: &str, host: &str, port: u16, database: &str) -> Result<String> {
        Self::build_url(user, password, host, port, database)
    }

    async fn get_table_structure(&self, table_name: &str, _remove_foreign_keys: bool) -> Result<TableStructure> {
        let columns = self.get_columns(table_name).await?;
        if columns.is_empty() {
            return Err(SyncError::NotFound(format!("table '{}' not found", table_name)));
        }

        Ok(TableStructure {
            table_name: table_name.to_string(),
            create_table_sql: synthesize_create_table(table_name, &columns),
            columns,
        })
    }

    async fn get_table_data(&self, table_name: &str, limit: Option<u64>) -> Result<Vec<Row>> {
        let columns = self.column_types(table_name).await?;
        if columns.is_empty() {
            return Err(SyncError::NotFound(format!("table '{}' not found", table_name)));
        }

        let select_list = columns
            .iter()
            .map(|(name, udt)| select_expression(name, udt))
            .collect::<Vec<_>>()
            .join(", ");

        let mut query = format!("SELECT {} FROM {}", select_list, quote_ident(table_name, '"'));
        if let Some(limit) = limit {
            query.push_str(&format!(" LIMIT {}", limit));
        }

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                columns
                    .iter()
                    .enumerate()
                    .map(|(i, (name, _))| -> Result<(String, CellValue)> {
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
                tracing::error!("failed to create PostgreSQL table {}: {}", table_name, e);
                false
            }
        }
    }

    async fn insert_data(&self, table_name: &str, rows: &[Row]) -> bool {
        if rows.is_empty() {
            return true;
        }
        let inserted = match self.insert_batches(table_name, rows).await {
            Ok(count) => self.reset_sequences(table_name).await.map(|_| count),
            Err(e) => Err(e),
        };
        match inserted {
            Ok(count) => {
                tracing::info!("{} rows inserted into '{}'", count, table_name);
                true
            }
            Err(e) => {
                tracing::error!("failed to insert into PostgreSQL table {}: {}", table_name, e);
                false
            }
        }
    }

    async fn table_exists(&self, table_name: &str) -> bool {
        let result: std::result::Result<i64, _> = sqlx::query_scalar(TABLE_EXISTS_QUERY)
        .bind(SCHEMA)
        .bind(table_name)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(count) => count > 0,
            Err(e) => {
                tracing::error!("failed to check PostgreSQL table {}: {}", table_name, e);
                false
            }
        }
    }

    async fn drop_table(&self, table_name: &str) -> bool {
        let query = format!("DROP TABLE IF EXISTS {}", quote_ident(table_name, '"'));
        match sqlx::query(&query).execute(&self.pool).await {
            Ok(_) => {
                tracing::info!("table '{}' dropped", table_name);
                true
            }
            Err(e) => {
                tracing::error!("failed to drop PostgreSQL table {}: {}", table_name, e);
                false
            }
        }
    }
}

/// Build a CREATE TABLE statement from catalog column definitions.
///
/// Integer columns fed by a sequence become `serial` types so the new table
/// owns its own sequence.
pub fn synthesize_create_table(table_name: &str, columns: &[ColumnDef]) -> String {
    let mut definitions: Vec<String> = columns
        .iter()
        .map(|col| {
            let sequence_fed = col
                .default
                .as_deref()
                .is_some_and(|d| d.trim_start().starts_with("nextval("));
            let serial = if sequence_fed { serial_type(&col.data_type) } else { None };

            let mut def = format!(
                "    {} {}",
                quote_ident(&col.name, '"'),
                serial.unwrap_or(col.data_type.as_str())
            );
            if !col.is_nullable {
                def.push_str(" NOT NULL");
            }
            if serial.is_none() {
                if let Some(default) = col.default.as_deref().filter(|d| !d.is_empty()) {
                    def.push_str(" DEFAULT ");
                    def.push_str(default);
                }
            }
            def
        })
        .collect();

    let primary_key: Vec<String> = columns
        .iter()
        .filter(|c| c.is_primary_key)
        .map(|c| quote_ident(&c.name, '"'))
        .collect();
    if !primary_key.is_empty() {
        definitions.push(format!("    PRIMARY KEY ({})", primary_key.join(", ")));
    }

    format!(
        "CREATE TABLE {} (\n{}\n);",
        quote_ident(table_name, '"'),
        definitions.join(",\n")
    )
}

/// `setval` statement that continues a column's sequence after its largest value.
/// An empty table resets the sequence so the next value is 1.
fn sequence_reset_sql(table_name: &str, column: &str) -> String {
    let column_ident = quote_ident(column, '"');
    format!(
        "SELECT setval(pg_get_serial_sequence('{}', '{}'), COALESCE(MAX({}), 1), MAX({}) IS NOT NULL) FROM {}",
        quote_ident(table_name, '"').replace('\'', "''"),
        column.replace('\'', "''"),
        column_ident,
        column_ident,
        quote_ident(table_name, '"')
    )
}

fn select_expression(name: &str, udt: &str) -> String {
    if NATIVE_UDT_NAMES.contains(&udt) {
        quote_ident(name, '"')
    } else {
        format!("{}::text", quote_ident(name, '"'))
    }
}

fn serial_type(data_type: &str) -> Option<&'static str> {
    match data_type {
        "smallint" => Some("smallserial"),
        "integer" => Some("serial"),
        "bigint" => Some("bigserial"),
        _ => None,
    }
}

// ---- Row decoding and parameter binding ----

fn cell<'r, T>(row: &'r PgRow, index: usize, map: impl FnOnce(T) -> CellValue) -> sqlx::Result<CellValue>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    Ok(row.try_get::<Option<T>, _>(index)?.map_or(CellValue::Null, map))
}

/// Decode one column. A value with no Rust counterpart fails the read
/// instead of turning into NULL.
fn extract_cell_value(row: &PgRow, index: usize, column: &str) -> Result<CellValue> {
    let type_name = row.columns()[index].type_info().name().to_uppercase();
    let value = match type_name.as_str() {
        "BOOL" => cell::<bool>(row, index, CellValue::Bool),
        "INT2" => cell::<i16>(row, index, |v| CellValue::Int(v as i64)),
        "INT4" => cell::<i32>(row, index, |v| CellValue::Int(v as i64)),
        "INT8" => cell::<i64>(row, index, CellValue::Int),
        "FLOAT4" => cell::<f32>(row, index, |v| CellValue::Float(v as f64)),
        "FLOAT8" => cell::<f64>(row, index, CellValue::Float),
        "DATE" => cell::<NaiveDate>(row, index, CellValue::Date),
        "TIME" => cell::<NaiveTime>(row, index, CellValue::Time),
        "TIMESTAMP" => cell::<NaiveDateTime>(row, index, CellValue::DateTime),
        "TIMESTAMPTZ" => cell::<DateTime<Utc>>(row, index, CellValue::Timestamp),
        "JSON" | "JSONB" => cell::<serde_json::Value>(row, index, CellValue::Json),
        "UUID" => cell::<uuid::Uuid>(row, index, CellValue::Uuid),
        "BYTEA" => cell::<Vec<u8>>(row, index, CellValue::Binary),
        _ => cell::<String>(row, index, CellValue::String),
    };

    value.map_err(|e| {
        SyncError::TransferFailure(format!("cannot decode {} column '{}': {}", type_name, column, e))
    })
}

fn bind_cell<Sep: std::fmt::Display>(b: &mut Separated<'_, '_, Postgres, Sep>, value: &CellValue) {
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
        CellValue::UInt(v) => match i64::try_from(*v) {
            Ok(v) => {
                b.push_bind(v);
            }
            Err(_) => {
                b.push_bind(Decimal::from(*v));
            }
        },
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
            b.push_bind(*v);
        }
        CellValue::Binary(v) => {
            b.push_bind(v.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, data_type: &str) -> ColumnDef {
        ColumnDef {
            name: name.to_string(),
            data_type: data_type.to_string(),
            is_nullable: true,
            is_primary_key: false,
            default: None,
            max_length: None,
            extra: None,
        }
    }

    #[test]
    fn test_build_url() {
        let url = PostgresAdapter::build_url("app", "s3cr3t", "pg", 5432, "shop").unwrap();
        assert_eq!(url, "postgres://app:s3cr3t@pg:5432/shop");

        let encoded = PostgresAdapter::build_url("app", "a@b/c", "pg", 5432, "shop").unwrap();
        assert!(!encoded.contains("a@b/c"));
        assert!(PgConnectOptions::from_str(&encoded).is_ok());
    }

    #[test]
    fn test_synthesize_create_table() {
        let mut id = column("id", "integer");
        id.is_nullable = false;
        id.is_primary_key = true;
        id.default = Some("nextval('orders_id_seq'::regclass)".to_string());

        let mut status = column("status", "character varying(20)");
        status.is_nullable = false;
        status.default = Some("'new'::character varying".to_string());

        let total = column("total", "numeric(10,2)");
        let tags = column("tags", "text[]");

        let sql = synthesize_create_table("orders", &[id, status, total, tags]);
        assert_eq!(
            sql,
            "CREATE TABLE \"orders\" (\n\
             \x20   \"id\" serial NOT NULL,\n\
             \x20   \"status\" character varying(20) NOT NULL DEFAULT 'new'::character varying,\n\
             \x20   \"total\" numeric(10,2),\n\
             \x20   \"tags\" text[],\n\
             \x20   PRIMARY KEY (\"id\")\n\
             );"
        );
    }

    #[test]
    fn test_sequence_default_on_non_integer_is_kept() {
        let mut code = column("code", "text");
        code.default = Some("nextval('codes')::text".to_string());

        let sql = synthesize_create_table("codes", &[code]);
        assert!(sql.contains("\"code\" text DEFAULT nextval('codes')::text"));
        assert!(!sql.contains("PRIMARY KEY"));
    }

    #[test]
    fn test_existence_check_ignores_views() {
        assert!(TABLE_EXISTS_QUERY.contains("table_type = 'BASE TABLE'"));
    }

    #[test]
    fn test_numeric_read_as_text() {
        assert_eq!(select_expression("amount", "numeric"), "\"amount\"::text");
        assert_eq!(select_expression("tags", "_text"), "\"tags\"::text");
        assert_eq!(select_expression("id", "int8"), "\"id\"");
        assert_eq!(select_expression("meta", "jsonb"), "\"meta\"");
    }

    #[test]
    fn test_sequence_reset_sql() {
        assert_eq!(
            sequence_reset_sql("orders", "id"),
            "SELECT setval(pg_get_serial_sequence('\"orders\"', 'id'), \
             COALESCE(MAX(\"id\"), 1), MAX(\"id\") IS NOT NULL) FROM \"orders\""
        );
        let quoted = sequence_reset_sql("O'Brien", "Id");
        assert!(quoted.contains("pg_get_serial_sequence('\"O''Brien\"', 'Id')"));
        assert!(quoted.ends_with("FROM \"O'Brien\""));
    }

    #[test]
    fn test_serial_mapping() {
        assert_eq!(serial_type("smallint"), Some("smallserial"));
        assert_eq!(serial_type("bigint"), Some("bigserial"));
        assert_eq!(serial_type("numeric(10,0)"), None);
    }
}
