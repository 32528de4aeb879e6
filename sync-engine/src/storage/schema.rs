//! SQL for the filing store, derived from the mapping table.
//!
//! Business columns come from [`filing_sync_core::FIELDS`], so a new
//! mapping entry is picked up here (and by the legacy upgrade) without
//! further edits.

use filing_sync_core::{FieldKind, FIELDS};

/// Columns the store maintains itself, besides the business columns.
pub(crate) const SYSTEM_COLUMNS: &[&str] = &[
    "record_id",
    "remote_modified_at",
    "created_at",
    "updated_at",
];

/// A secondary index on the filing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexDef {
    /// Index name.
    pub name: &'static str,
    /// Comma-separated column list.
    pub columns: &'static str,
}

/// The fixed index set restored after every merge.
pub const INDEXES: &[IndexDef] = &[
    IndexDef {
        name: "idx_state_product",
        columns: "state, product_line",
    },
    IndexDef {
        name: "idx_company",
        columns: "company, subsidiary",
    },
    IndexDef {
        name: "idx_effective_date",
        columns: "effective_date",
    },
];

pub(crate) const STAGING_TABLE: &str = "staging_filings";

pub(crate) const CREATE_SYNC_HISTORY: &str = r#"
    CREATE TABLE IF NOT EXISTS sync_history (
        sync_id INTEGER PRIMARY KEY AUTOINCREMENT,
        mode TEXT NOT NULL CHECK (mode IN ('full', 'incremental', 'manual')),
        status TEXT NOT NULL CHECK (status IN ('running', 'completed', 'failed')),
        started_at TEXT NOT NULL,
        completed_at TEXT,
        watermark TEXT,
        records_processed INTEGER NOT NULL DEFAULT 0,
        records_inserted INTEGER NOT NULL DEFAULT 0,
        records_updated INTEGER NOT NULL DEFAULT 0,
        records_skipped INTEGER NOT NULL DEFAULT 0,
        parsing_errors INTEGER NOT NULL DEFAULT 0,
        error_message TEXT
    )
"#;

pub(crate) const CREATE_SYNC_HISTORY_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_sync_history_status ON sync_history(status, completed_at)";

pub(crate) const RUN_COLUMNS: &str = "sync_id, mode, status, started_at, completed_at, watermark, \
     records_processed, records_inserted, records_updated, records_skipped, parsing_errors, \
     error_message";

/// SQLite storage class for a mapped column.
pub(crate) fn column_type(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Text | FieldKind::Date => "TEXT",
        FieldKind::Decimal => "REAL",
        FieldKind::Integer => "INTEGER",
    }
}

fn business_columns() -> impl Iterator<Item = &'static str> {
    FIELDS.iter().map(|f| f.column)
}

pub(crate) fn create_filings() -> String {
    let business: Vec<String> = FIELDS
        .iter()
        .map(|f| format!("{} {}", f.column, column_type(f.kind)))
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS filings (\n    record_id TEXT PRIMARY KEY NOT NULL,\n    {},\n    \
         remote_modified_at TEXT,\n    created_at TEXT NOT NULL,\n    updated_at TEXT NOT NULL\n)",
        business.join(",\n    ")
    )
}

/// Columns a pre-existing table may lack, with the type to add them as.
///
/// Bookkeeping columns are added nullable since existing rows have no value.
pub(crate) fn upgradable_columns() -> Vec<(&'static str, &'static str)> {
    FIELDS
        .iter()
        .map(|f| (f.column, column_type(f.kind)))
        .chain(
            SYSTEM_COLUMNS
                .iter()
                .filter(|c| **c != "record_id")
                .map(|c| (*c, "TEXT")),
        )
        .collect()
}

pub(crate) fn create_staging() -> String {
    let business: Vec<String> = FIELDS
        .iter()
        .map(|f| format!("{} {}", f.column, column_type(f.kind)))
        .collect();
    format!(
        "CREATE TEMP TABLE {STAGING_TABLE} (record_id TEXT PRIMARY KEY NOT NULL, {}, remote_modified_at TEXT)",
        business.join(", ")
    )
}

pub(crate) fn drop_staging() -> String {
    format!("DROP TABLE IF EXISTS temp.{STAGING_TABLE}")
}

/// Insert into staging: `record_id`, business columns in table order,
/// `remote_modified_at`.
pub(crate) fn insert_staging() -> String {
    let columns: Vec<&str> = business_columns().collect();
    let placeholders = vec!["?"; columns.len() + 2].join(", ");
    format!(
        "INSERT INTO {STAGING_TABLE} (record_id, {}, remote_modified_at) VALUES ({placeholders})",
        columns.join(", ")
    )
}

/// Last-writer-wins update. Must run before [`merge_insert`].
///
/// Binds `?1` = `updated_at`.
pub(crate) fn merge_update() -> String {
    let assignments: Vec<String> = business_columns()
        .chain(["remote_modified_at"])
        .map(|c| format!("{c} = s.{c}"))
        .collect();
    format!(
        "UPDATE filings SET {}, updated_at = ?1 \
         FROM {STAGING_TABLE} AS s \
         WHERE filings.record_id = s.record_id \
           AND (filings.remote_modified_at IS NULL \
                OR (s.remote_modified_at IS NOT NULL AND s.remote_modified_at > filings.remote_modified_at))",
        assignments.join(", ")
    )
}

/// Insert staged rows whose key is new. Binds `?1` = `created_at`/`updated_at`.
pub(crate) fn merge_insert() -> String {
    let columns: Vec<&str> = business_columns().collect();
    let selected: Vec<String> = columns.iter().map(|c| format!("s.{c}")).collect();
    format!(
        "INSERT INTO filings (record_id, {}, remote_modified_at, created_at, updated_at) \
         SELECT s.record_id, {}, s.remote_modified_at, ?1, ?1 \
         FROM {STAGING_TABLE} AS s \
         WHERE NOT EXISTS (SELECT 1 FROM filings f WHERE f.record_id = s.record_id)",
        columns.join(", "),
        selected.join(", ")
    )
}

pub(crate) fn create_index(index: &IndexDef) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {} ON filings({})",
        index.name, index.columns
    )
}

/// Quote an identifier read back from `sqlite_master`.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filings_ddl_has_every_column() {
        let ddl = create_filings();
        for field in FIELDS {
            assert!(ddl.contains(field.column), "missing {}", field.column);
        }
        assert!(ddl.contains("record_id TEXT PRIMARY KEY NOT NULL"));
        assert!(ddl.contains("premium_change_number REAL"));
        assert!(ddl.contains("policyholders_affected_number INTEGER"));
    }

    #[test]
    fn upgrade_covers_every_column_but_the_key() {
        let columns: Vec<_> = upgradable_columns().into_iter().map(|(c, _)| c).collect();
        assert_eq!(columns.len(), FIELDS.len() + SYSTEM_COLUMNS.len() - 1);
        assert!(!columns.contains(&"record_id"));
        assert!(columns.contains(&"remote_modified_at"));
        assert!(columns.contains(&"updated_at"));
    }

    #[test]
    fn staging_insert_placeholders_match_columns() {
        let sql = insert_staging();
        assert_eq!(sql.matches('?').count(), FIELDS.len() + 2);
    }

    #[test]
    fn update_guards_on_remote_timestamp() {
        let sql = merge_update();
        assert!(sql.contains("filings.remote_modified_at IS NULL"));
        assert!(sql.contains("s.remote_modified_at > filings.remote_modified_at"));
        assert!(!sql.contains("created_at"));
    }

    #[test]
    fn index_set_covers_lookup_columns() {
        let names: Vec<_> = INDEXES.iter().map(|i| i.name).collect();
        assert_eq!(names, ["idx_state_product", "idx_company", "idx_effective_date"]);
        assert_eq!(
            create_index(&INDEXES[2]),
            "CREATE INDEX IF NOT EXISTS idx_effective_date ON filings(effective_date)"
        );
    }

    #[test]
    fn quotes_identifiers() {
        assert_eq!(quote_ident("idx_adhoc"), "\"idx_adhoc\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
