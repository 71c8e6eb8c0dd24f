//! Table synchronization: ordering, DDL rewriting, migration and diffing

pub mod dependency;
pub mod diff;
pub mod migrator;
pub mod transform;

pub use dependency::{order_by_dependencies, order_tables_info, DependencyGraph};
pub use diff::{compare_summaries, DifferenceKind, SyncComparison, TableDifference, SIZE_TOLERANCE_MB};
pub use migrator::{BatchMigrationResult, MigrationResult, Migrator, DEFAULT_MAX_TABLES};
pub use transform::rewrite_create_table;
