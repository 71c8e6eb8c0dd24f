//! Shared schema types produced by all database adapters

use serde::{Deserialize, Serialize};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Round to two decimal places, the precision sizes are reported with
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Per-table introspection figures
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub table_name: String,
    /// Exact `COUNT(*)`, never a catalog estimate
    pub row_count: i64,
    pub size_mb: f64,
    pub data_length: i64,
    pub index_length: i64,
}

impl TableInfo {
    /// Build from storage figures, deriving `size_mb` from data + index bytes
    pub fn new(table_name: impl Into<String>, row_count: i64, data_length: i64, index_length: i64) -> Self {
        Self {
            table_name: table_name.into(),
            row_count,
            size_mb: round2((data_length + index_length) as f64 / BYTES_PER_MB),
            data_length,
            index_length,
        }
    }
}

/// Database-level snapshot
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSummary {
    pub database_type: String,
    pub database_name: String,
    pub total_tables: usize,
    pub total_rows: i64,
    pub total_size_mb: f64,
    pub tables: Vec<TableInfo>,
}

impl DatabaseSummary {
    /// Totals are always derived here so they match the table sequence
    /// whatever order it is in.
    pub fn new(database_type: impl Into<String>, database_name: impl Into<String>, tables: Vec<TableInfo>) -> Self {
        let total_rows = tables.iter().map(|t| t.row_count).sum();
        let total_size_mb = round2(tables.iter().map(|t| t.size_mb).sum());
        Self {
            database_type: database_type.into(),
            database_name: database_name.into(),
            total_tables: tables.len(),
            total_rows,
            total_size_mb,
            tables,
        }
    }
}

/// Column definition as reported by the engine catalog
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub is_primary_key: bool,
    pub default: Option<String>,
    pub max_length: Option<i64>,
    /// Engine-specific extra flags (`auto_increment`, udt name, ...)
    pub extra: Option<String>,
}

/// Captured or synthesized table definition
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableStructure {
    pub table_name: String,
    pub create_table_sql: String,
    pub columns: Vec<ColumnDef>,
}

/// Result of probing both database roles
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub source: bool,
    pub destination: bool,
}

impl ConnectionStatus {
    pub fn is_healthy(&self) -> bool {
        self.source && self.destination
    }
}
