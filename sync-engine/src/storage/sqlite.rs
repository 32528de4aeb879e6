//! SQLite storage backend for sync-engine.

use super::schema::{self, IndexDef, INDEXES, RUN_COLUMNS};
use super::{MergeOutcome, RunOutcome, SyncStore};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use filing_sync_core::{collapse_duplicates, FIELDS};
use filing_sync_types::time::{format_date, format_timestamp, parse_timestamp};
use filing_sync_types::{Cell, FilingRecord, SyncCounts, SyncMode, SyncRun, SyncStatus};
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteSynchronous,
};
use sqlx::Sqlite;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

/// SQLite-based filing store.
///
/// Uses WAL mode so downstream readers are not blocked by a merge.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the store at `path`.
    ///
    /// Creates the parent directory and the database file if missing, then
    /// brings the schema up to date and restores any missing index.
    pub async fn new(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StorageError::InvalidPath {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!(path = %path.display(), "Opened filing store");
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing).
    pub async fn in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str(":memory:").map_err(StorageError::Database)?;

        // The database lives only as long as its single connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> StorageResult<()> {
        sqlx::query(&schema::create_filings())
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        self.add_missing_columns().await?;

        sqlx::query(schema::CREATE_SYNC_HISTORY)
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        sqlx::query(schema::CREATE_SYNC_HISTORY_INDEX)
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        // Repairs a crash between index drop and rebuild.
        self.create_indexes(INDEXES).await
    }

    /// Upgrade a filing table created by an older schema.
    async fn add_missing_columns(&self) -> StorageResult<()> {
        let existing: Vec<String> =
            sqlx::query_scalar("SELECT name FROM pragma_table_info('filings')")
                .fetch_all(&self.pool)
                .await
                .map_err(StorageError::Database)?;

        for (column, sql_type) in schema::upgradable_columns() {
            if existing.iter().any(|c| c.eq_ignore_ascii_case(column)) {
                continue;
            }
            sqlx::query(&format!("ALTER TABLE filings ADD COLUMN {column} {sql_type}"))
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Migration(format!("adding column {column}: {e}")))?;
            info!(column, "Added missing filings column");
        }
        Ok(())
    }

    async fn create_indexes(&self, indexes: &[IndexDef]) -> StorageResult<()> {
        for index in indexes {
            sqlx::query(&schema::create_index(index))
                .execute(&self.pool)
                .await
                .map_err(StorageError::Database)?;
        }
        Ok(())
    }

    async fn fetch_runs(
        &self,
        sql: &str,
        bind: Option<String>,
    ) -> StorageResult<Vec<SyncRun>> {
        let mut query = sqlx::query_as::<_, RunRow>(sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::Database)?;
        rows.into_iter().map(SyncRun::try_from).collect()
    }
}

fn bind_cell<'q>(query: SqliteQuery<'q>, cell: Option<&Cell>) -> SqliteQuery<'q> {
    match cell {
        None | Some(Cell::Null) => query.bind(None::<String>),
        Some(Cell::Text(text)) => query.bind(text.clone()),
        Some(Cell::Decimal(value)) => query.bind(*value),
        Some(Cell::Integer(value)) => query.bind(*value),
        Some(Cell::Date(date)) => query.bind(format_date(date)),
    }
}

#[async_trait]
impl SyncStore for SqliteStore {
    async fn merge(
        &self,
        rows: &[FilingRecord],
        now: DateTime<Utc>,
    ) -> StorageResult<MergeOutcome> {
        if rows.is_empty() {
            return Ok(MergeOutcome {
                total: self.count_filings().await?,
                ..MergeOutcome::default()
            });
        }

        let collapsed = collapse_duplicates(rows.to_vec());
        let staged = collapsed.rows.len() as u64;
        let stamp = format_timestamp(&now);

        let mut tx = self.pool.begin().await.map_err(StorageError::Database)?;

        sqlx::query(&schema::drop_staging())
            .execute(&mut *tx)
            .await
            .map_err(StorageError::Database)?;
        sqlx::query(&schema::create_staging())
            .execute(&mut *tx)
            .await
            .map_err(StorageError::Database)?;

        let insert = schema::insert_staging();
        for row in &collapsed.rows {
            let mut query = sqlx::query(&insert).bind(row.record_id.clone());
            for field in FIELDS {
                query = bind_cell(query, row.get(field.column));
            }
            query
                .bind(row.remote_modified_at.as_ref().map(format_timestamp))
                .execute(&mut *tx)
                .await
                .map_err(StorageError::Database)?;
        }

        // Update before insert, so fresh inserts are never counted as updates.
        let updated = sqlx::query(&schema::merge_update())
            .bind(stamp.as_str())
            .execute(&mut *tx)
            .await
            .map_err(StorageError::Database)?
            .rows_affected();

        let inserted = sqlx::query(&schema::merge_insert())
            .bind(stamp.as_str())
            .execute(&mut *tx)
            .await
            .map_err(StorageError::Database)?
            .rows_affected();

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM filings")
            .fetch_one(&mut *tx)
            .await
            .map_err(StorageError::Database)?;

        sqlx::query(&schema::drop_staging())
            .execute(&mut *tx)
            .await
            .map_err(StorageError::Database)?;

        tx.commit().await.map_err(StorageError::Database)?;

        let outcome = MergeOutcome {
            inserted,
            updated,
            skipped: staged.saturating_sub(inserted + updated) + collapsed.dropped,
            total: total as u64,
        };
        debug!(
            staged,
            duplicates = collapsed.dropped,
            inserted = outcome.inserted,
            updated = outcome.updated,
            skipped = outcome.skipped,
            total = outcome.total,
            "Merge committed"
        );
        Ok(outcome)
    }

    async fn drop_secondary_indexes(&self) -> StorageResult<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT name FROM sqlite_master
            WHERE type = 'index' AND tbl_name = 'filings' AND sql IS NOT NULL
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        for name in &names {
            sqlx::query(&format!("DROP INDEX IF EXISTS {}", schema::quote_ident(name)))
                .execute(&self.pool)
                .await
                .map_err(StorageError::Database)?;
        }
        Ok(names)
    }

    async fn ensure_indexes(&self) -> StorageResult<()> {
        self.create_indexes(INDEXES).await
    }

    async fn count_filings(&self) -> StorageResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM filings")
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(count as u64)
    }

    async fn begin_run(
        &self,
        mode: SyncMode,
        watermark: Option<DateTime<Utc>>,
        started_at: DateTime<Utc>,
    ) -> StorageResult<i64> {
        let sync_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO sync_history (mode, status, started_at, watermark)
            VALUES (?1, 'running', ?2, ?3)
            RETURNING sync_id
            "#,
        )
        .bind(mode.as_str())
        .bind(format_timestamp(&started_at))
        .bind(watermark.as_ref().map(format_timestamp))
        .fetch_one(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(sync_id)
    }

    async fn finish_run(
        &self,
        sync_id: i64,
        outcome: &RunOutcome,
        counts: &SyncCounts,
        completed_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let (status, message) = match outcome {
            RunOutcome::Completed => (SyncStatus::Completed, None),
            RunOutcome::Failed(message) => (SyncStatus::Failed, Some(message.as_str())),
        };

        let result = sqlx::query(
            r#"
            UPDATE sync_history SET
                status = ?1,
                completed_at = ?2,
                records_processed = ?3,
                records_inserted = ?4,
                records_updated = ?5,
                records_skipped = ?6,
                parsing_errors = ?7,
                error_message = ?8
            WHERE sync_id = ?9 AND status = 'running'
            "#,
        )
        .bind(status.as_str())
        .bind(format_timestamp(&completed_at))
        .bind(counts.processed as i64)
        .bind(counts.inserted as i64)
        .bind(counts.updated as i64)
        .bind(counts.skipped as i64)
        .bind(counts.parsing_errors as i64)
        .bind(message)
        .bind(sync_id)
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        if result.rows_affected() == 0 {
            return match self.get_run(sync_id).await? {
                Some(_) => Err(StorageError::AlreadyFinalized { sync_id }),
                None => Err(StorageError::RunNotFound { sync_id }),
            };
        }
        Ok(())
    }

    async fn last_completed_at(&self) -> StorageResult<Option<DateTime<Utc>>> {
        let value: Option<Option<String>> = sqlx::query_scalar(
            r#"
            SELECT completed_at FROM sync_history
            WHERE status = 'completed'
            ORDER BY completed_at DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(value
            .flatten()
            .as_deref()
            .map(parse_timestamp)
            .transpose()?)
    }

    async fn stale_running_runs(
        &self,
        started_before: DateTime<Utc>,
    ) -> StorageResult<Vec<SyncRun>> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM sync_history \
             WHERE status = 'running' AND started_at < ?1 ORDER BY sync_id"
        );
        self.fetch_runs(&sql, Some(format_timestamp(&started_before)))
            .await
    }

    async fn get_run(&self, sync_id: i64) -> StorageResult<Option<SyncRun>> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM sync_history WHERE sync_id = ?1");
        let row = sqlx::query_as::<_, RunRow>(&sql)
            .bind(sync_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        match row {
            Some(r) => Ok(Some(r.try_into()?)),
            None => Ok(None),
        }
    }

    async fn recent_runs(&self, limit: u32) -> StorageResult<Vec<SyncRun>> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM sync_history ORDER BY sync_id DESC LIMIT {limit}"
        );
        self.fetch_runs(&sql, None).await
    }
}

/// Internal row type for SQLite queries.
#[derive(sqlx::FromRow)]
struct RunRow {
    sync_id: i64,
    mode: String,
    status: String,
    started_at: String,
    completed_at: Option<String>,
    watermark: Option<String>,
    records_processed: i64,
    records_inserted: i64,
    records_updated: i64,
    records_skipped: i64,
    parsing_errors: i64,
    error_message: Option<String>,
}

impl TryFrom<RunRow> for SyncRun {
    type Error = StorageError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        Ok(SyncRun {
            sync_id: row.sync_id,
            mode: row.mode.parse()?,
            status: row.status.parse()?,
            started_at: parse_timestamp(&row.started_at)?,
            completed_at: row.completed_at.as_deref().map(parse_timestamp).transpose()?,
            watermark: row.watermark.as_deref().map(parse_timestamp).transpose()?,
            counts: SyncCounts {
                processed: row.records_processed as u64,
                inserted: row.records_inserted as u64,
                updated: row.records_updated as u64,
                skipped: row.records_skipped as u64,
                parsing_errors: row.parsing_errors as u64,
            },
            error_message: row.error_message,
        })
    }
}
