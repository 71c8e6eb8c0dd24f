//! Database adapter abstraction trait
//!
//! Defines the capability set every engine adapter must implement, plus the
//! closed backend enum and the factory that maps configuration onto it.

use crate::config::{ConnectionConfig, PoolConfig};
use crate::db::mysql::MySqlAdapter;
use crate::db::postgres::PostgresAdapter;
use crate::db::{DatabaseSummary, Row, TableInfo, TableStructure};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

/// Rows per insert group; each group is committed on its own
pub const INSERT_BATCH_SIZE: usize = 1000;

/// Which database engine an adapter speaks
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    #[serde(rename = "mysql")]
    MySql,
    #[serde(rename = "postgresql")]
    Postgres,
}

impl DatabaseBackend {
    /// Identifier reported in summaries
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseBackend::MySql => "mysql",
            DatabaseBackend::Postgres => "postgresql",
        }
    }

    pub fn supported() -> &'static [&'static str] {
        &["mysql", "postgresql"]
    }
}

impl std::fmt::Display for DatabaseBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Default for DatabaseBackend {
    fn default() -> Self {
        DatabaseBackend::MySql
    }
}

impl FromStr for DatabaseBackend {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(DatabaseBackend::MySql),
            "postgresql" | "postgres" => Ok(DatabaseBackend::Postgres),
            other => Err(SyncError::Config(format!(
                "database type '{}' is not supported. Supported types: {}",
                other,
                DatabaseBackend::supported().join(", ")
            ))),
        }
    }
}

/// Trait that all database adapters must implement.
///
/// Operations that represent an expected outcome (connection down, DDL
/// rejected) return `bool` and log; introspection returns a typed error.
#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    /// Which backend this adapter represents
    fn backend(&self) -> DatabaseBackend;

    /// Database (MySQL) or catalog (Postgres) the adapter is bound to
    fn database_name(&self) -> &str;

    /// Round-trip a trivial query; never errors
    async fn test_connection(&self) -> bool;

    /// List base tables with exact row counts and storage sizes
    async fn get_tables_info(&self, order_by_dependencies: bool) -> Result<Vec<TableInfo>>;

    /// Tables plus aggregate totals
    async fn get_database_summary(&self, order_by_dependencies: bool) -> Result<DatabaseSummary> {
        let tables = self.get_tables_info(order_by_dependencies).await?;
        Ok(DatabaseSummary::new(
            self.backend().as_str(),
            self.database_name(),
            tables,
        ))
    }

    /// Engine-specific connection string
    fn connection_url(&self, user: &str, password: &str, host: &str, port: u16, database: &str) -> Result<String>;

    /// Capture or synthesize the CREATE TABLE statement
    async fn get_table_structure(&self, table_name: &str, remove_foreign_keys: bool) -> Result<TableStructure>;

    /// Dump rows, optionally limited, in catalog column order
    async fn get_table_data(&self, table_name: &str, limit: Option<u64>) -> Result<Vec<Row>>;

    /// Execute DDL verbatim
    async fn create_table(&self, table_name: &str, ddl: &str) -> bool;

    /// Batched insert; empty input is a successful no-op
    async fn insert_data(&self, table_name: &str, rows: &[Row]) -> bool;

    async fn table_exists(&self, table_name: &str) -> bool;

    /// Idempotent drop
    async fn drop_table(&self, table_name: &str) -> bool;
}

/// Build the adapter for one database role.
///
/// MySQL connections go through the charset-probing URL so the pool is
/// opened with the first character set the server accepts.
pub async fn connect_adapter(
    backend: DatabaseBackend,
    conn: &ConnectionConfig,
    pool: &PoolConfig,
    debug: bool,
) -> Result<Arc<dyn DatabaseAdapter>> {
    if !conn.is_valid() {
        return Err(SyncError::Config(format!(
            "incomplete connection settings for '{}'",
            conn.name
        )));
    }

    let adapter: Arc<dyn DatabaseAdapter> = match backend {
        DatabaseBackend::MySql => {
            let url = MySqlAdapter::connection_url_with_fallback(
                &conn.user,
                &conn.password,
                &conn.host,
                conn.port,
                &conn.database,
            )
            .await?;
            Arc::new(MySqlAdapter::connect(&url, &conn.database, pool, debug).await?)
        }
        DatabaseBackend::Postgres => {
            let url = PostgresAdapter::build_url(
                &conn.user,
                &conn.password,
                &conn.host,
                conn.port,
                &conn.database,
            )?;
            Arc::new(PostgresAdapter::connect(&url, &conn.database, pool, debug).await?)
        }
    };

    tracing::info!(
        role = %conn.name,
        backend = %backend,
        database = %conn.database,
        "database adapter ready"
    );
    Ok(adapter)
}

/// Replace the password portion of a connection URL for logging
pub fn mask_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("****"));
            }
            parsed.to_string()
        }
        Err(_) => "****".to_string(),
    }
}
