//! CREATE TABLE rewriting for MySQL DDL
//!
//! Strips foreign-key constraints (and the `fk_` indexes MySQL creates for
//! them) and normalizes the table options, so a table can be created on the
//! destination before the tables it references.

use regex::Regex;
use std::sync::LazyLock;

const REFERENTIAL_ACTION: &str = r"(?:CASCADE|RESTRICT|SET\s+NULL|SET\s+DEFAULT|NO\s+ACTION)";

static FOREIGN_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i),\s*CONSTRAINT\s+`[^`]+`\s+FOREIGN\s+KEY\s*\([^)]+\)\s+REFERENCES\s+(?:`[^`]+`\.)?`[^`]+`\s*\([^)]+\)(?:\s+ON\s+DELETE\s+{a})?(?:\s+ON\s+UPDATE\s+{a})?",
        a = REFERENTIAL_ACTION
    ))
    .expect("valid regex")
});
static FK_INDEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i),\s*KEY\s+`fk_[^`]+`\s*\([^)]+\)").expect("valid regex"));
static DOUBLE_COMMA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r",\s*,").expect("valid regex"));
static TRAILING_COMMA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r",\s*\)").expect("valid regex"));
static CHARSET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)DEFAULT\s+CHARSET=\w+").expect("valid regex"));
static TABLE_COLLATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+COLLATE=\w+").expect("valid regex"));
static ENGINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)ENGINE=\w+").expect("valid regex"));
static ENGINE_AFTER_PAREN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\)\s*ENGINE=").expect("valid regex"));

/// Rewrite a `SHOW CREATE TABLE` statement.
///
/// With `remove_foreign_keys` false the statement is returned as is.
pub fn rewrite_create_table(sql: &str, remove_foreign_keys: bool) -> String {
    if !remove_foreign_keys {
        return sql.to_string();
    }

    let sql = FOREIGN_KEY.replace_all(sql, "");
    let sql = FK_INDEX.replace_all(&sql, "");
    let sql = DOUBLE_COMMA.replace_all(&sql, ",");
    let sql = TRAILING_COMMA.replace_all(&sql, ")");

    let sql = CHARSET.replace_all(&sql, "DEFAULT CHARSET=utf8");
    // utf8 has its own collations; a utf8mb4 one would be rejected
    let sql = TABLE_COLLATE.replace_all(&sql, "");
    let sql = ENGINE.replace_all(&sql, "ENGINE=InnoDB");

    if ENGINE.is_match(&sql) {
        return ENGINE_AFTER_PAREN.replace_all(&sql, ") ENGINE=").into_owned();
    }

    let mut rewritten = sql.trim_end().trim_end_matches(';').trim_end().to_string();
    if CHARSET.is_match(&rewritten) {
        rewritten.push_str(" ENGINE=InnoDB");
    } else {
        rewritten.push_str(" ENGINE=InnoDB DEFAULT CHARSET=utf8");
    }
    rewritten
}
