//! Application service: the operations a transport layer exposes
//!
//! Built once at startup and passed by reference; owns the migrator (and
//! through it both adapters) plus the job scheduler.

use crate::config::SyncConfig;
use crate::db::{connect_adapter, ConnectionStatus, DatabaseAdapter, DatabaseSummary};
use crate::error::Result;
use crate::scheduler::{FireOutcome, Job, JobRequest, Scheduler};
use crate::sync::{BatchMigrationResult, MigrationResult, Migrator, SyncComparison};
use std::sync::Arc;

pub struct SyncService {
    migrator: Arc<Migrator>,
    scheduler: Scheduler<Migrator>,
}

impl SyncService {
    pub fn new(migrator: Arc<Migrator>) -> Self {
        let scheduler = Scheduler::new(migrator.clone());
        Self { migrator, scheduler }
    }

    /// Open both adapters described by the configuration
    pub async fn connect(config: &SyncConfig) -> Result<Self> {
        let source = connect_adapter(config.database_type, &config.source, &config.pool, config.debug).await?;
        let destination =
            connect_adapter(config.database_type, &config.destination, &config.pool, config.debug).await?;
        Ok(Self::new(Arc::new(Migrator::new(source, destination))))
    }

    fn source(&self) -> &Arc<dyn DatabaseAdapter> {
        self.migrator.source()
    }

    fn destination(&self) -> &Arc<dyn DatabaseAdapter> {
        self.migrator.destination()
    }

    pub async fn health(&self) -> ConnectionStatus {
        let (source, destination) =
            futures::join!(self.source().test_connection(), self.destination().test_connection());
        ConnectionStatus { source, destination }
    }

    pub async fn source_summary(&self, order_by_dependencies: bool) -> Result<DatabaseSummary> {
        self.source().get_database_summary(order_by_dependencies).await
    }

    pub async fn destination_summary(&self, order_by_dependencies: bool) -> Result<DatabaseSummary> {
        self.destination().get_database_summary(order_by_dependencies).await
    }

    pub async fn compare(&self) -> Result<SyncComparison> {
        let (source, destination) =
            futures::try_join!(self.source_summary(false), self.destination_summary(false))?;
        let comparison = SyncComparison::new(source, destination);
        tracing::info!("comparison found {} differences", comparison.differences.len());
        Ok(comparison)
    }

    pub async fn migrate_table(&self, table_name: &str, overwrite: bool) -> MigrationResult {
        self.migrator.migrate_table(table_name, overwrite).await
    }

    pub async fn migrate_batch(&self, overwrite: bool, max_tables: usize) -> Result<BatchMigrationResult> {
        self.migrator.migrate_batch(overwrite, max_tables).await
    }

    pub async fn create_job(&self, request: JobRequest) -> Result<Job> {
        self.scheduler.register(request).await
    }

    pub async fn list_jobs(&self) -> Vec<Job> {
        self.scheduler.list().await
    }

    pub async fn delete_job(&self, id: &str) -> Result<()> {
        self.scheduler.delete(id).await
    }

    pub async fn job_count(&self) -> usize {
        self.scheduler.count().await
    }

    pub async fn run_job_now(&self, id: &str) -> Result<FireOutcome> {
        self.scheduler.fire(id).await
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::{numbered_rows, MemoryAdapter};
    use crate::error::ErrorKind;
    use crate::sync::DifferenceKind;

    fn service(source: MemoryAdapter, destination: MemoryAdapter) -> (SyncService, Arc<MemoryAdapter>) {
        let destination = Arc::new(destination);
        let migrator = Migrator::new(Arc::new(source), destination.clone());
        (SyncService::new(Arc::new(migrator)), destination)
    }

    #[tokio::test]
    async fn test_health_reports_each_role() {
        let destination = MemoryAdapter::new("dst");
        destination.set_offline();
        let (svc, _) = service(MemoryAdapter::new("src"), destination);

        let status = svc.health().await;
        assert!(status.source);
        assert!(!status.destination);
        assert!(!status.is_healthy());
    }

    #[tokio::test]
    async fn test_compare_after_migration() {
        let source = MemoryAdapter::new("src")
            .with_table("customers", numbered_rows(3))
            .with_table("orders", numbered_rows(5));
        let (svc, _) = service(source, MemoryAdapter::new("dst"));

        let before = svc.compare().await.unwrap();
        assert_eq!(before.differences.len(), 2);
        assert!(before
            .differences
            .iter()
            .all(|d| d.kind == DifferenceKind::MissingInDestination));

        let batch = svc.migrate_batch(false, 10).await.unwrap();
        assert_eq!(batch.succeeded, 2);

        let after = svc.compare().await.unwrap();
        assert!(after.in_sync(), "{:?}", after.differences);
        assert_eq!(after.destination_summary.total_rows, 8);
    }

    #[tokio::test]
    async fn test_dropping_one_table_yields_single_difference() {
        let source = MemoryAdapter::new("src")
            .with_table("a", numbered_rows(1))
            .with_table("b", numbered_rows(2));
        let (svc, destination) = service(source, MemoryAdapter::new("dst"));
        svc.migrate_batch(false, 10).await.unwrap();

        assert!(destination.drop_table("b").await);
        let comparison = svc.compare().await.unwrap();
        assert_eq!(comparison.differences.len(), 1);
        assert_eq!(comparison.differences[0].kind, DifferenceKind::MissingInDestination);
        assert_eq!(comparison.differences[0].table_name, "b");
    }

    #[tokio::test]
    async fn test_job_lifecycle_through_service() {
        let source = MemoryAdapter::new("src").with_table("a", numbered_rows(4));
        let (svc, destination) = service(source, MemoryAdapter::new("dst"));

        let job = svc
            .create_job(JobRequest::new("nightly", "0 3 * * *"))
            .await
            .unwrap();
        assert_eq!(svc.job_count().await, 1);

        let outcome = svc.run_job_now(&job.id).await.unwrap();
        assert_eq!(outcome, FireOutcome::Completed { attempted: 1, succeeded: 1 });
        assert_eq!(destination.rows("a").unwrap().len(), 4);
        assert!(svc.list_jobs().await[0].last_run.is_some());

        svc.delete_job(&job.id).await.unwrap();
        let err = svc.delete_job(&job.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(svc.job_count().await, 0);
    }

    #[tokio::test]
    async fn test_summary_ordering_flag() {
        let source = MemoryAdapter::new("src")
            .with_table("a_child", numbered_rows(1))
            .with_table("b_parent", numbered_rows(1))
            .with_reference("a_child", "b_parent");
        let (svc, _) = service(source, MemoryAdapter::new("dst"));

        let plain = svc.source_summary(false).await.unwrap();
        assert_eq!(plain.tables[0].table_name, "a_child");

        let ordered = svc.source_summary(true).await.unwrap();
        assert_eq!(ordered.tables[0].table_name, "b_parent");
        assert_eq!(ordered.total_rows, plain.total_rows);
    }
}
