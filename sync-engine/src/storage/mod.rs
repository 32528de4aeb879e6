//! Storage layer for sync-engine.
//!
//! Owns the local filing table and the sync history. Only
//! [`SyncStore::merge`] mutates business data, and it does so in a single
//! transaction.

mod schema;
mod sqlite;

pub use schema::INDEXES;
pub use sqlite::SqliteStore;

use crate::error::StorageResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use filing_sync_types::{FilingRecord, SyncCounts, SyncMode, SyncRun};

/// Row counts reported by a merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Rows whose `record_id` was new to the store.
    pub inserted: u64,
    /// Stored rows replaced by a newer incoming version.
    pub updated: u64,
    /// Incoming rows discarded by last-writer-wins, including in-batch
    /// duplicates.
    pub skipped: u64,
    /// Filing rows in the store once the merge committed, counted inside
    /// the merge transaction.
    pub total: u64,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Merge committed.
    Completed,
    /// Run aborted; carries the error note.
    Failed(String),
}

/// Trait for filing store backends.
#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Merge `rows` under last-writer-wins, all or nothing.
    ///
    /// `now` stamps the local `created_at`/`updated_at` columns.
    async fn merge(
        &self,
        rows: &[FilingRecord],
        now: DateTime<Utc>,
    ) -> StorageResult<MergeOutcome>;

    /// Drop every secondary index on the filing table.
    ///
    /// Returns the dropped index names.
    async fn drop_secondary_indexes(&self) -> StorageResult<Vec<String>>;

    /// Create the fixed index set if any of it is missing.
    async fn ensure_indexes(&self) -> StorageResult<()>;

    /// Number of filing rows.
    async fn count_filings(&self) -> StorageResult<u64>;

    /// Open an audit row in `running` state. Returns its `sync_id`.
    async fn begin_run(
        &self,
        mode: SyncMode,
        watermark: Option<DateTime<Utc>>,
        started_at: DateTime<Utc>,
    ) -> StorageResult<i64>;

    /// Finalize a `running` audit row exactly once.
    ///
    /// Returns [`AlreadyFinalized`](crate::error::StorageError::AlreadyFinalized)
    /// if the row is already terminal.
    async fn finish_run(
        &self,
        sync_id: i64,
        outcome: &RunOutcome,
        counts: &SyncCounts,
        completed_at: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// `completed_at` of the most recent completed run.
    async fn last_completed_at(&self) -> StorageResult<Option<DateTime<Utc>>>;

    /// `running` rows that started before `started_before`.
    async fn stale_running_runs(
        &self,
        started_before: DateTime<Utc>,
    ) -> StorageResult<Vec<SyncRun>>;

    /// Get a specific run by id.
    async fn get_run(&self, sync_id: i64) -> StorageResult<Option<SyncRun>>;

    /// Most recent runs, newest first.
    async fn recent_runs(&self, limit: u32) -> StorageResult<Vec<SyncRun>>;
}
