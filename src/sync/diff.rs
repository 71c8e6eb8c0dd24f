//! Table-level comparison of two database summaries

use crate::db::{round2, DatabaseSummary, TableInfo};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Size differences at or below this many megabytes are noise
pub const SIZE_TOLERANCE_MB: f64 = 0.01;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifferenceKind {
    MissingInDestination,
    MissingInSource,
    DifferentData,
}

/// One table that differs between source and destination
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableDifference {
    #[serde(rename = "type")]
    pub kind: DifferenceKind,
    pub table_name: String,
    pub source_info: Option<TableInfo>,
    pub destination_info: Option<TableInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count_diff: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_diff_mb: Option<f64>,
}

/// Both summaries plus their differences
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncComparison {
    pub source_summary: DatabaseSummary,
    pub destination_summary: DatabaseSummary,
    pub differences: Vec<TableDifference>,
}

impl SyncComparison {
    pub fn new(source_summary: DatabaseSummary, destination_summary: DatabaseSummary) -> Self {
        let differences = compare_summaries(&source_summary, &destination_summary);
        Self {
            source_summary,
            destination_summary,
            differences,
        }
    }

    pub fn in_sync(&self) -> bool {
        self.differences.is_empty()
    }
}

/// Compare two summaries table by table.
///
/// Records come out grouped: tables missing in the destination (source
/// order), tables missing in the source (destination order), then tables
/// whose row count or size differ (source order).
pub fn compare_summaries(source: &DatabaseSummary, destination: &DatabaseSummary) -> Vec<TableDifference> {
    let source_tables: HashMap<&str, &TableInfo> =
        source.tables.iter().map(|t| (t.table_name.as_str(), t)).collect();
    let destination_tables: HashMap<&str, &TableInfo> =
        destination.tables.iter().map(|t| (t.table_name.as_str(), t)).collect();

    let mut differences = Vec::new();

    for table in &source.tables {
        if !destination_tables.contains_key(table.table_name.as_str()) {
            differences.push(TableDifference {
                kind: DifferenceKind::MissingInDestination,
                table_name: table.table_name.clone(),
                source_info: Some(table.clone()),
                destination_info: None,
                row_count_diff: None,
                size_diff_mb: None,
            });
        }
    }

    for table in &destination.tables {
        if !source_tables.contains_key(table.table_name.as_str()) {
            differences.push(TableDifference {
                kind: DifferenceKind::MissingInSource,
                table_name: table.table_name.clone(),
                source_info: None,
                destination_info: Some(table.clone()),
                row_count_diff: None,
                size_diff_mb: None,
            });
        }
    }

    for table in &source.tables {
        let Some(dest) = destination_tables.get(table.table_name.as_str()) else {
            continue;
        };
        let size_diff = table.size_mb - dest.size_mb;
        if table.row_count != dest.row_count || size_diff.abs() > SIZE_TOLERANCE_MB {
            differences.push(TableDifference {
                kind: DifferenceKind::DifferentData,
                table_name: table.table_name.clone(),
                source_info: Some(table.clone()),
                destination_info: Some((*dest).clone()),
                row_count_diff: Some(table.row_count - dest.row_count),
                size_diff_mb: Some(round2(size_diff)),
            });
        }
    }

    differences
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, rows: i64, size_mb: f64) -> TableInfo {
        TableInfo {
            table_name: name.to_string(),
            row_count: rows,
            size_mb,
            data_length: 0,
            index_length: 0,
        }
    }

    fn summary(tables: Vec<TableInfo>) -> DatabaseSummary {
        DatabaseSummary::new("mysql", "db", tables)
    }

    #[test]
    fn test_identical_summaries_have_no_differences() {
        let tables = vec![info("a", 10, 1.0), info("b", 0, 0.02)];
        let comparison = SyncComparison::new(summary(tables.clone()), summary(tables));
        assert!(comparison.in_sync());
    }

    #[test]
    fn test_emission_order() {
        let source = summary(vec![
            info("shared", 10, 1.0),
            info("only_src_b", 1, 0.0),
            info("only_src_a", 1, 0.0),
        ]);
        let destination = summary(vec![
            info("only_dst", 3, 0.0),
            info("shared", 7, 1.0),
        ]);

        let diffs = compare_summaries(&source, &destination);
        let kinds: Vec<(DifferenceKind, &str)> =
            diffs.iter().map(|d| (d.kind, d.table_name.as_str())).collect();
        assert_eq!(
            kinds,
            vec![
                (DifferenceKind::MissingInDestination, "only_src_b"),
                (DifferenceKind::MissingInDestination, "only_src_a"),
                (DifferenceKind::MissingInSource, "only_dst"),
                (DifferenceKind::DifferentData, "shared"),
            ]
        );
        assert_eq!(diffs[3].row_count_diff, Some(3));
        assert_eq!(diffs[2].source_info, None);
        assert_eq!(diffs[0].destination_info, None);
    }

    #[test]
    fn test_size_tolerance() {
        let source = summary(vec![info("t", 5, 1.50)]);

        let within = summary(vec![info("t", 5, 1.495)]);
        assert!(compare_summaries(&source, &within).is_empty());

        let beyond = summary(vec![info("t", 5, 1.47)]);
        let diffs = compare_summaries(&source, &beyond);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].kind, DifferenceKind::DifferentData);
        assert_eq!(diffs[0].row_count_diff, Some(0));
        assert_eq!(diffs[0].size_diff_mb, Some(0.03));
    }

    #[test]
    fn test_kind_serialized_as_type() {
        let diffs = compare_summaries(&summary(vec![info("t", 1, 0.0)]), &summary(Vec::new()));
        let json = serde_json::to_value(&diffs[0]).unwrap();
        assert_eq!(json["type"], "missing_in_destination");
        assert!(json.get("row_count_diff").is_none());
    }
}
