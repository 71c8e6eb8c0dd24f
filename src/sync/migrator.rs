//! Table migration from the source adapter to the destination adapter
//!
//! A single table goes through existence checks, structure capture, an
//! optional drop, create and a batched data copy. Every failure is folded into
//! a [`MigrationResult`]; nothing here panics or propagates per-table errors.

use crate::db::DatabaseAdapter;
use crate::error::{ErrorKind, Result, SyncError};
use crate::scheduler::BatchRunner;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Default number of tables a batch migrates
pub const DEFAULT_MAX_TABLES: usize = 10;

/// Outcome of migrating one table
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MigrationResult {
    pub success: bool,
    pub table_name: String,
    pub records_migrated: usize,
    pub overwritten: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub message: String,
}

impl MigrationResult {
    fn succeeded(table_name: &str, records_migrated: usize, overwritten: bool) -> Self {
        Self {
            success: true,
            table_name: table_name.to_string(),
            records_migrated,
            overwritten,
            error: None,
            error_kind: None,
            message: format!("Table '{}' migrated successfully", table_name),
        }
    }

    fn failed(table_name: &str, error: &SyncError) -> Self {
        Self {
            success: false,
            table_name: table_name.to_string(),
            records_migrated: 0,
            overwritten: false,
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            message: format!("Migration of table '{}' failed", table_name),
        }
    }
}

/// Outcome of a dependency-ordered batch
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchMigrationResult {
    /// The batch ran; per-table outcomes are in `results`
    pub success: bool,
    /// Tables in the source database
    pub total_tables: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub max_tables: usize,
    pub results: Vec<MigrationResult>,
    pub message: String,
}

impl BatchMigrationResult {
    pub fn failed(&self) -> usize {
        self.attempted - self.succeeded
    }
}

/// Drives both adapters to copy tables
pub struct Migrator {
    source: Arc<dyn DatabaseAdapter>,
    destination: Arc<dyn DatabaseAdapter>,
}

impl Migrator {
    pub fn new(source: Arc<dyn DatabaseAdapter>, destination: Arc<dyn DatabaseAdapter>) -> Self {
        Self { source, destination }
    }

    pub fn source(&self) -> &Arc<dyn DatabaseAdapter> {
        &self.source
    }

    pub fn destination(&self) -> &Arc<dyn DatabaseAdapter> {
        &self.destination
    }

    /// Copy one table. An existing destination table is replaced only when
    /// `overwrite` is set; otherwise the migration is refused.
    pub async fn migrate_table(&self, table_name: &str, overwrite: bool) -> MigrationResult {
        tracing::info!("starting migration of '{}' (overwrite={})", table_name, overwrite);

        match self.copy_table(table_name, overwrite).await {
            Ok((records, overwritten)) => {
                tracing::info!("migration of '{}' finished: {} records", table_name, records);
                MigrationResult::succeeded(table_name, records, overwritten)
            }
            Err(e) => {
                tracing::error!("migration of '{}' failed: {}", table_name, e);
                MigrationResult::failed(table_name, &e)
            }
        }
    }

    /// `table_exists` answers false when the engine cannot be queried, so an
    /// unreachable source surfaces here as `NotFound`; the adapter logs the
    /// underlying error.
    async fn copy_table(&self, table_name: &str, overwrite: bool) -> Result<(usize, bool)> {
        if !self.source.table_exists(table_name).await {
            tracing::warn!(
                "'{}' not found in the source database (or the source is unreachable)",
                table_name
            );
            return Err(SyncError::NotFound(format!(
                "table '{}' does not exist in the source database",
                table_name
            )));
        }

        let exists_at_destination = self.destination.table_exists(table_name).await;
        tracing::debug!("'{}' exists at destination: {}", table_name, exists_at_destination);
        if exists_at_destination && !overwrite {
            return Err(SyncError::Conflict(format!(
                "table '{}' already exists in the destination database; use overwrite to replace it",
                table_name
            )));
        }

        // Referential structure is kept; batches create referenced tables first
        let structure = self.source.get_table_structure(table_name, false).await?;

        if exists_at_destination {
            tracing::info!("dropping existing destination table '{}'", table_name);
            if !self.destination.drop_table(table_name).await {
                return Err(SyncError::TransferFailure(format!(
                    "could not drop existing table '{}' in the destination database",
                    table_name
                )));
            }
        }

        if !self
            .destination
            .create_table(table_name, &structure.create_table_sql)
            .await
        {
            return Err(SyncError::TransferFailure(format!(
                "could not create table '{}' in the destination database",
                table_name
            )));
        }

        let rows = self.source.get_table_data(table_name, None).await?;
        if !rows.is_empty() {
            tracing::info!("inserting {} records into '{}'", rows.len(), table_name);
            if !self.destination.insert_data(table_name, &rows).await {
                return Err(SyncError::TransferFailure(format!(
                    "could not insert data into table '{}' in the destination database",
                    table_name
                )));
            }
        }

        Ok((rows.len(), exists_at_destination))
    }

    /// Migrate up to `max_tables` source tables in dependency order.
    ///
    /// Per-table failures are recorded and the batch moves on; only a failed
    /// source listing is returned as an error.
    pub async fn migrate_batch(&self, overwrite: bool, max_tables: usize) -> Result<BatchMigrationResult> {
        let tables = self.source.get_tables_info(true).await?;
        let total_tables = tables.len();

        let mut results = Vec::with_capacity(max_tables.min(total_tables));
        for table in tables.iter().take(max_tables) {
            let result = self.migrate_table(&table.table_name, overwrite).await;
            if !result.success {
                tracing::warn!(
                    "batch: '{}' failed: {}",
                    table.table_name,
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
            results.push(result);
        }

        let attempted = results.len();
        let succeeded = results.iter().filter(|r| r.success).count();
        tracing::info!(
            "batch finished: {} of {} attempted tables migrated ({} in source)",
            succeeded,
            attempted,
            total_tables
        );

        Ok(BatchMigrationResult {
            success: true,
            total_tables,
            attempted,
            succeeded,
            max_tables,
            results,
            message: format!(
                "Batch migration finished: {} tables processed, {} migrated",
                attempted, succeeded
            ),
        })
    }
}

#[async_trait]
impl BatchRunner for Migrator {
    async fn run_batch(&self, overwrite: bool, max_tables: usize) -> Result<BatchMigrationResult> {
        self.migrate_batch(overwrite, max_tables).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::{numbered_rows, MemoryAdapter};

    fn migrator(source: MemoryAdapter, destination: MemoryAdapter) -> (Migrator, Arc<MemoryAdapter>, Arc<MemoryAdapter>) {
        let source = Arc::new(source);
        let destination = Arc::new(destination);
        (
            Migrator::new(source.clone(), destination.clone()),
            source,
            destination,
        )
    }

    #[tokio::test]
    async fn test_missing_source_table_is_not_found() {
        let (m, _, dest) = migrator(
            MemoryAdapter::new("src"),
            MemoryAdapter::new("dst").with_table("orders", numbered_rows(2)),
        );

        let result = m.migrate_table("ghost", true).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::NotFound));
        assert!(dest.calls().is_empty());
        assert_eq!(dest.rows("orders").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_existing_table_without_overwrite_is_conflict() {
        let (m, _, dest) = migrator(
            MemoryAdapter::new("src").with_table("orders", numbered_rows(5)),
            MemoryAdapter::new("dst").with_table("orders", numbered_rows(2)),
        );

        let result = m.migrate_table("orders", false).await;
        assert!(!result.success);
        assert!(!result.overwritten);
        assert_eq!(result.error_kind, Some(ErrorKind::Conflict));
        assert_eq!(result.error_kind.unwrap().http_status(), 400);
        assert!(dest.calls().is_empty());
        assert_eq!(dest.rows("orders").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_destination() {
        let (m, _, dest) = migrator(
            MemoryAdapter::new("src").with_table("orders", numbered_rows(5)),
            MemoryAdapter::new("dst").with_table("orders", numbered_rows(2)),
        );

        let result = m.migrate_table("orders", true).await;
        assert!(result.success, "{:?}", result.error);
        assert!(result.overwritten);
        assert_eq!(result.records_migrated, 5);
        assert_eq!(dest.rows("orders").unwrap().len(), 5);
        assert_eq!(dest.calls(), vec!["drop:orders", "create:orders", "insert:orders"]);
    }

    #[tokio::test]
    async fn test_empty_table_succeeds_with_zero_records() {
        let (m, _, dest) = migrator(
            MemoryAdapter::new("src").with_table("audit", Vec::new()),
            MemoryAdapter::new("dst"),
        );

        let result = m.migrate_table("audit", false).await;
        assert!(result.success);
        assert!(!result.overwritten);
        assert_eq!(result.records_migrated, 0);
        assert!(dest.rows("audit").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_structure_copied_with_foreign_keys() {
        let (m, src, dest) = migrator(
            MemoryAdapter::new("src").with_table("orders", numbered_rows(1)),
            MemoryAdapter::new("dst"),
        );

        m.migrate_table("orders", false).await;
        assert_eq!(dest.ddl("orders"), src.ddl("orders"));
    }

    #[tokio::test]
    async fn test_create_failure_is_transfer_failure() {
        let dest = MemoryAdapter::new("dst");
        dest.fail_create("orders");
        let (m, _, _) = migrator(MemoryAdapter::new("src").with_table("orders", numbered_rows(3)), dest);

        let result = m.migrate_table("orders", false).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::TransferFailure));
        assert_eq!(result.records_migrated, 0);
    }

    #[tokio::test]
    async fn test_source_read_failure_leaves_empty_destination_table() {
        let source = MemoryAdapter::new("src").with_table("orders", numbered_rows(3));
        source.fail_data("orders");
        let (m, _, dest) = migrator(source, MemoryAdapter::new("dst"));

        let result = m.migrate_table("orders", false).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::TransferFailure));
        assert_eq!(result.records_migrated, 0);
        assert_eq!(dest.calls(), vec!["create:orders"]);
        assert!(dest.rows("orders").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_source_reports_not_found() {
        let source = MemoryAdapter::new("src").with_table("orders", numbered_rows(3));
        source.set_offline();
        let (m, _, dest) = migrator(source, MemoryAdapter::new("dst"));

        let result = m.migrate_table("orders", false).await;
        assert_eq!(result.error_kind, Some(ErrorKind::NotFound));
        assert!(dest.calls().is_empty());
    }

    #[tokio::test]
    async fn test_single_table_ignores_dependencies() {
        let source = MemoryAdapter::new("src")
            .with_table("orders", numbered_rows(2))
            .with_table("customers", numbered_rows(1))
            .with_reference("orders", "customers");
        let (m, _, dest) = migrator(source, MemoryAdapter::new("dst"));

        let result = m.migrate_table("orders", false).await;
        assert!(result.success);
        assert_eq!(dest.calls(), vec!["create:orders", "insert:orders"]);
        assert!(dest.rows("customers").is_none());
    }

    #[tokio::test]
    async fn test_batch_with_cycle_falls_back_to_alphabetical() {
        // c_items would follow d_orders if ordering survived the cycle
        let source = MemoryAdapter::new("src")
            .with_table("a_left", numbered_rows(1))
            .with_table("b_right", numbered_rows(1))
            .with_table("c_items", numbered_rows(1))
            .with_table("d_orders", numbered_rows(1))
            .with_reference("a_left", "b_right")
            .with_reference("b_right", "a_left")
            .with_reference("c_items", "d_orders");
        let alphabetical = vec!["a_left", "b_right", "c_items", "d_orders"];

        let listed: Vec<String> = source
            .get_tables_info(true)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.table_name)
            .collect();
        assert_eq!(listed, alphabetical);

        let (m, _, _) = migrator(source, MemoryAdapter::new("dst"));
        let batch = m.migrate_batch(false, 10).await.unwrap();
        let order: Vec<&str> = batch.results.iter().map(|r| r.table_name.as_str()).collect();
        assert_eq!(order, alphabetical);
        assert_eq!(batch.succeeded, 4);
    }

    #[tokio::test]
    async fn test_drop_failure_stops_before_create() {
        let dest = MemoryAdapter::new("dst").with_table("orders", numbered_rows(1));
        dest.fail_drop("orders");
        let (m, _, dest) = migrator(MemoryAdapter::new("src").with_table("orders", numbered_rows(3)), dest);

        let result = m.migrate_table("orders", true).await;
        assert_eq!(result.error_kind, Some(ErrorKind::TransferFailure));
        assert_eq!(dest.calls(), vec!["drop:orders"]);
    }

    #[tokio::test]
    async fn test_insert_failure_is_reported() {
        let dest = MemoryAdapter::new("dst");
        dest.fail_insert("orders");
        let (m, _, _) = migrator(MemoryAdapter::new("src").with_table("orders", numbered_rows(3)), dest);

        let result = m.migrate_table("orders", false).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::TransferFailure));
        assert!(result.error.unwrap().contains("insert"));
    }

    #[tokio::test]
    async fn test_batch_follows_dependency_order_and_limit() {
        let source = MemoryAdapter::new("src")
            .with_table("order_items", numbered_rows(4))
            .with_table("orders", numbered_rows(2))
            .with_table("customers", numbered_rows(1))
            .with_table("zones", numbered_rows(1))
            .with_reference("order_items", "orders")
            .with_reference("orders", "customers");
        let (m, _, dest) = migrator(source, MemoryAdapter::new("dst"));

        let batch = m.migrate_batch(false, 3).await.unwrap();
        assert!(batch.success);
        assert_eq!(batch.total_tables, 4);
        assert_eq!(batch.max_tables, 3);
        assert_eq!(batch.attempted, 3);
        assert_eq!(batch.succeeded, 3);

        let order: Vec<&str> = batch.results.iter().map(|r| r.table_name.as_str()).collect();
        assert_eq!(order, vec!["customers", "orders", "order_items"]);
        assert!(dest.rows("zones").is_none());
    }

    #[tokio::test]
    async fn test_batch_continues_after_failure() {
        let source = MemoryAdapter::new("src")
            .with_table("a", numbered_rows(1))
            .with_table("b", numbered_rows(1))
            .with_table("c", numbered_rows(1));
        let dest = MemoryAdapter::new("dst").with_table("b", Vec::new());
        let (m, _, _) = migrator(source, dest);

        let batch = m.migrate_batch(false, DEFAULT_MAX_TABLES).await.unwrap();
        assert_eq!(batch.attempted, 3);
        assert_eq!(batch.succeeded, 2);
        assert_eq!(batch.failed(), 1);
        assert_eq!(batch.results[1].error_kind, Some(ErrorKind::Conflict));
        assert!(batch.results[2].success);
    }

    #[tokio::test]
    async fn test_batch_listing_failure_is_error() {
        let source = MemoryAdapter::new("src");
        source.fail_listing();
        let (m, _, _) = migrator(source, MemoryAdapter::new("dst"));

        assert!(m.migrate_batch(false, 10).await.is_err());
    }
}
