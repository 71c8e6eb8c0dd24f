//! Typed cell values moved between adapters
//!
//! Values keep their native type from decode to bind so that strict engines
//! (Postgres) accept them without implicit text casts.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::Serialize;

/// A single cell of a table row
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Decimal(Decimal),
    String(String),
    Date(NaiveDate),
    Time(NaiveTime),
    /// Timestamp without time zone
    DateTime(NaiveDateTime),
    /// Timestamp with time zone, normalized to UTC
    Timestamp(DateTime<Utc>),
    Json(serde_json::Value),
    Uuid(uuid::Uuid),
    Binary(Vec<u8>),
}

impl std::fmt::Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellValue::Null => write!(f, "NULL"),
            CellValue::Bool(v) => write!(f, "{}", if *v { "true" } else { "false" }),
            CellValue::Int(v) => write!(f, "{}", v),
            CellValue::UInt(v) => write!(f, "{}", v),
            CellValue::Float(v) => write!(f, "{}", v),
            CellValue::Decimal(v) => write!(f, "{}", v),
            CellValue::String(v) => write!(f, "{}", v),
            CellValue::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            CellValue::Time(v) => write!(f, "{}", v.format("%H:%M:%S")),
            CellValue::DateTime(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S")),
            CellValue::Timestamp(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S %:z")),
            CellValue::Json(v) => write!(f, "{}", v),
            CellValue::Uuid(v) => write!(f, "{}", v),
            CellValue::Binary(v) => {
                write!(f, "0x")?;
                v.iter().try_for_each(|b| write!(f, "{:02X}", b))
            }
        }
    }
}

/// One table row: column name to value, in the engine's column order
pub type Row = IndexMap<String, CellValue>;

/// Column names of a row set, taken from the first row
pub fn row_columns(rows: &[Row]) -> Vec<String> {
    rows.first()
        .map(|row| row.keys().cloned().collect())
        .unwrap_or_default()
}

/// Quote an identifier with the given quote character, doubling embedded quotes
pub fn quote_ident(name: &str, quote: char) -> String {
    let doubled: String = [quote, quote].iter().collect();
    format!("{q}{}{q}", name.replace(quote, &doubled), q = quote)
}

/// Rows per multi-row INSERT statement so the bound parameter count stays
/// under `max_params`, never more than `batch_size`.
pub fn rows_per_statement(column_count: usize, batch_size: usize, max_params: usize) -> usize {
    if column_count == 0 {
        return batch_size.max(1);
    }
    (max_params / column_count).clamp(1, batch_size.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_binary_as_hex() {
        assert_eq!(CellValue::Binary(vec![0xDE, 0xAD]).to_string(), "0xDEAD");
        assert_eq!(CellValue::Null.to_string(), "NULL");
    }

    #[test]
    fn test_quote_ident_escapes() {
        assert_eq!(quote_ident("orders", '`'), "`orders`");
        assert_eq!(quote_ident("we`ird", '`'), "`we``ird`");
        assert_eq!(quote_ident("Mixed\"Case", '"'), "\"Mixed\"\"Case\"");
    }

    #[test]
    fn test_rows_per_statement_respects_param_limit() {
        assert_eq!(rows_per_statement(3, 1000, 65_535), 1000);
        assert_eq!(rows_per_statement(100, 1000, 65_535), 655);
        assert_eq!(rows_per_statement(70_000, 1000, 65_535), 1);
        assert_eq!(rows_per_statement(0, 1000, 65_535), 1000);
    }

    #[test]
    fn test_row_columns_keep_order() {
        let mut row = Row::new();
        row.insert("id".into(), CellValue::Int(1));
        row.insert("name".into(), CellValue::String("a".into()));
        row.insert("created".into(), CellValue::Null);
        assert_eq!(row_columns(&[row]), vec!["id", "name", "created"]);
        assert!(row_columns(&[]).is_empty());
    }
}
