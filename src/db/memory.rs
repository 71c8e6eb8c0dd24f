//! In-memory adapter used by orchestrator, service and scheduler tests

use crate::db::driver::{DatabaseAdapter, DatabaseBackend};
use crate::db::query::Row;
use crate::db::schema::{TableInfo, TableStructure};
use crate::error::{Result, SyncError};
use crate::sync::dependency::{order_tables_info, DependencyGraph};
use crate::sync::transform::rewrite_create_table;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

#[derive(Clone, Debug, Default)]
struct MemoryTable {
    ddl: String,
    rows: Vec<Row>,
    references: Vec<String>,
}

#[derive(Default)]
struct Failures {
    offline: bool,
    listing: bool,
    create: HashSet<String>,
    insert: HashSet<String>,
    drop: HashSet<String>,
    data: HashSet<String>,
}

pub struct MemoryAdapter {
    database: String,
    tables: Mutex<BTreeMap<String, MemoryTable>>,
    failures: Mutex<Failures>,
    calls: Mutex<Vec<String>>,
}

impl MemoryAdapter {
    pub fn new(database: &str) -> Self {
        Self {
            database: database.to_string(),
            tables: Mutex::new(BTreeMap::new()),
            failures: Mutex::new(Failures::default()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_table(self, name: &str, rows: Vec<Row>) -> Self {
        let ddl = format!("CREATE TABLE `{}` (`id` int)", name);
        self.tables.lock().unwrap().insert(
            name.to_string(),
            MemoryTable {
                ddl,
                rows,
                references: Vec::new(),
            },
        );
        self
    }

    pub fn with_reference(self, table: &str, referenced: &str) -> Self {
        if let Some(t) = self.tables.lock().unwrap().get_mut(table) {
            t.references.push(referenced.to_string());
        }
        self
    }

    pub fn set_offline(&self) {
        self.failures.lock().unwrap().offline = true;
    }

    pub fn fail_listing(&self) {
        self.failures.lock().unwrap().listing = true;
    }

    pub fn fail_create(&self, table: &str) {
        self.failures.lock().unwrap().create.insert(table.to_string());
    }

    pub fn fail_insert(&self, table: &str) {
        self.failures.lock().unwrap().insert.insert(table.to_string());
    }

    pub fn fail_drop(&self, table: &str) {
        self.failures.lock().unwrap().drop.insert(table.to_string());
    }

    pub fn fail_data(&self, table: &str) {
        self.failures.lock().unwrap().data.insert(table.to_string());
    }

    pub fn rows(&self, table: &str) -> Option<Vec<Row>> {
        self.tables.lock().unwrap().get(table).map(|t| t.rows.clone())
    }

    pub fn ddl(&self, table: &str) -> Option<String> {
        self.tables.lock().unwrap().get(table).map(|t| t.ddl.clone())
    }

    /// Mutating calls in the order they were made, e.g. `drop:orders`
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &str, table: &str) {
        self.calls.lock().unwrap().push(format!("{}:{}", call, table));
    }
}

/// Rows `{id: 1..=count}`
pub fn numbered_rows(count: i64) -> Vec<Row> {
    (1..=count)
        .map(|i| {
            let mut row = Row::new();
            row.insert("id".to_string(), crate::db::CellValue::Int(i));
            row
        })
        .collect()
}

#[async_trait]
impl DatabaseAdapter for MemoryAdapter {
    fn backend(&self) -> DatabaseBackend {
        DatabaseBackend::MySql
    }

    fn database_name(&self) -> &str {
        &self.database
    }

    async fn test_connection(&self) -> bool {
        !self.failures.lock().unwrap().offline
    }

    async fn get_tables_info(&self, order_by_dependencies: bool) -> Result<Vec<TableInfo>> {
        if self.failures.lock().unwrap().listing {
            return Err(SyncError::TransferFailure("listing unavailable".to_string()));
        }

        let tables = self.tables.lock().unwrap();
        let infos: Vec<TableInfo> = tables
            .iter()
            .map(|(name, t)| TableInfo::new(name.clone(), t.rows.len() as i64, t.rows.len() as i64 * 1024, 0))
            .collect();

        if !order_by_dependencies {
            return Ok(infos);
        }
        let graph: DependencyGraph = tables
            .iter()
            .flat_map(|(name, t)| t.references.iter().map(move |r| (name.as_str(), r.as_str())))
            .collect();
        Ok(order_tables_info(infos, &graph))
    }

    fn connection_url(&self, user: &str, _password: &str, host: &str, port: u16, database: &str) -> Result<String> {
        Ok(format!("memory://{}@{}:{}/{}", user, host, port, database))
    }

    async fn get_table_structure(&self, table_name: &str, remove_foreign_keys: bool) -> Result<TableStructure> {
        let ddl = self
            .ddl(table_name)
            .ok_or_else(|| SyncError::NotFound(format!("table '{}' not found", table_name)))?;
        Ok(TableStructure {
            table_name: table_name.to_string(),
            create_table_sql: rewrite_create_table(&ddl, remove_foreign_keys),
            columns: Vec::new(),
        })
    }

    async fn get_table_data(&self, table_name: &str, limit: Option<u64>) -> Result<Vec<Row>> {
        if self.failures.lock().unwrap().data.contains(table_name) {
            return Err(SyncError::TransferFailure(format!("cannot read '{}'", table_name)));
        }
        let rows = self
            .rows(table_name)
            .ok_or_else(|| SyncError::NotFound(format!("table '{}' not found", table_name)))?;
        Ok(match limit {
            Some(limit) => rows.into_iter().take(limit as usize).collect(),
            None => rows,
        })
    }

    async fn create_table(&self, table_name: &str, ddl: &str) -> bool {
        self.record("create", table_name);
        if self.failures.lock().unwrap().create.contains(table_name) {
            return false;
        }
        let mut tables = self.tables.lock().unwrap();
        if tables.contains_key(table_name) {
            return false;
        }
        tables.insert(
            table_name.to_string(),
            MemoryTable {
                ddl: ddl.to_string(),
                ..MemoryTable::default()
            },
        );
        true
    }

    async fn insert_data(&self, table_name: &str, rows: &[Row]) -> bool {
        if rows.is_empty() {
            return true;
        }
        self.record("insert", table_name);
        if self.failures.lock().unwrap().insert.contains(table_name) {
            return false;
        }
        match self.tables.lock().unwrap().get_mut(table_name) {
            Some(t) => {
                t.rows.extend_from_slice(rows);
                true
            }
            None => false,
        }
    }

    async fn table_exists(&self, table_name: &str) -> bool {
        // Engines answer false when they cannot be queried
        !self.failures.lock().unwrap().offline && self.tables.lock().unwrap().contains_key(table_name)
    }

    async fn drop_table(&self, table_name: &str) -> bool {
        self.record("drop", table_name);
        if self.failures.lock().unwrap().drop.contains(table_name) {
            return false;
        }
        self.tables.lock().unwrap().remove(table_name);
        true
    }
}
