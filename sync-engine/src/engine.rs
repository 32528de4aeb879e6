//! Sync orchestration.
//!
//! [`SyncEngine::sync`] runs one pass end to end:
//!
//! ```text
//! resolve watermark ─► open audit row ─► fetch + map pages ─► drop indexes
//!                                                                  │
//!           finalize audit row ◄── restore indexes ◄── merge + count (one tx)
//! ```
//!
//! Any error after the audit row is opened finalizes it as `failed` with the
//! counters gathered so far. Runs on one engine are strictly sequential.

use chrono::{DateTime, Duration, Utc};
use filing_sync_client::{AirtableSource, PageFetcher, RemoteSource, MAX_PAGE_SIZE};
use filing_sync_core::{map_page, RetryPolicy, WatermarkResolver, DEFAULT_WATERMARK_SKEW_SECS};
use filing_sync_types::time::format_timestamp;
use filing_sync_types::{FilingRecord, SyncCounts, SyncMode, SyncResult};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::storage::{MergeOutcome, RunOutcome, SqliteStore, SyncStore};

/// Run parameters, taken from [`Config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Records requested per page.
    pub page_size: u32,
    /// Retry policy for each page request.
    pub retry: RetryPolicy,
    /// Backward shift of incremental watermarks in seconds.
    pub watermark_skew_secs: u64,
    /// Age after which a `running` audit row is reported as stale.
    pub stale_run_after_secs: u64,
}

impl EngineSettings {
    /// Settings described by `config`.
    pub fn from_config(config: &Config) -> Self {
        Self {
            page_size: config.source.page_size,
            retry: config.retry.policy(),
            watermark_skew_secs: config.sync.watermark_skew_secs,
            stale_run_after_secs: config.sync.stale_run_after_secs,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            page_size: MAX_PAGE_SIZE,
            retry: RetryPolicy::default(),
            watermark_skew_secs: DEFAULT_WATERMARK_SKEW_SECS,
            stale_run_after_secs: 6 * 60 * 60,
        }
    }
}

/// What a run has gathered so far, reported on failure.
#[derive(Debug, Default)]
struct Progress {
    sync_id: Option<i64>,
    mode: Option<SyncMode>,
    counts: SyncCounts,
}

/// The sync engine.
///
/// Generic over the remote source and the store so tests can drive it with
/// [`filing_sync_client::MockSource`] and an in-memory store.
pub struct SyncEngine<S: RemoteSource, D: SyncStore = SqliteStore> {
    source: S,
    store: D,
    settings: EngineSettings,
    resolver: WatermarkResolver,
}

impl SyncEngine<AirtableSource, SqliteStore> {
    /// Build an engine from a validated configuration.
    ///
    /// Opens (and if needed creates or upgrades) the store.
    pub async fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let source = AirtableSource::new(config.source.to_airtable()?)?;
        let store = SqliteStore::new(&config.storage.database).await?;
        Ok(Self::new(source, store, EngineSettings::from_config(config)))
    }
}

impl<S: RemoteSource, D: SyncStore> SyncEngine<S, D> {
    /// Create an engine over an already opened store.
    pub fn new(source: S, store: D, settings: EngineSettings) -> Self {
        Self {
            source,
            store,
            resolver: WatermarkResolver::new(settings.watermark_skew_secs),
            settings,
        }
    }

    /// The remote source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// The local store.
    pub fn store(&self) -> &D {
        &self.store
    }

    /// Run one sync pass.
    ///
    /// `since` forces a manual run from that cutoff. Otherwise the watermark
    /// comes from the last completed run, or the run is full.
    ///
    /// Never returns an error: failures are reported in the result and in
    /// the audit row.
    pub async fn sync(&self, since: Option<DateTime<Utc>>) -> SyncResult {
        let mut progress = Progress::default();

        match self.run(since, &mut progress).await {
            Ok(result) => result,
            Err(e) => {
                let message = e.to_string();
                error!(sync_id = ?progress.sync_id, error = %message, "Sync failed");

                if let Some(sync_id) = progress.sync_id {
                    let outcome = RunOutcome::Failed(message.clone());
                    if let Err(e) = self
                        .store
                        .finish_run(sync_id, &outcome, &progress.counts, Utc::now())
                        .await
                    {
                        error!(sync_id, error = %e, "Failed to record sync failure");
                    }
                }

                SyncResult::failed(progress.sync_id, progress.mode, progress.counts, message)
            }
        }
    }

    async fn run(
        &self,
        since: Option<DateTime<Utc>>,
        progress: &mut Progress,
    ) -> Result<SyncResult> {
        let last_completed = match since {
            Some(_) => None,
            None => self.store.last_completed_at().await?,
        };
        let watermark = self.resolver.resolve(since, last_completed);
        progress.mode = Some(watermark.mode);
        let cutoff = watermark
            .since
            .as_ref()
            .map(format_timestamp)
            .unwrap_or_else(|| "none".to_string());
        info!(mode = %watermark.mode, watermark = %cutoff, "Starting sync");

        self.report_stale_runs().await;

        let sync_id = self
            .store
            .begin_run(watermark.mode, watermark.since, Utc::now())
            .await?;
        progress.sync_id = Some(sync_id);

        let rows = self.collect(watermark.since, &mut progress.counts).await?;

        // The total comes from the merge transaction, so nothing but the
        // audit update can fail once the merge has committed.
        let total = if rows.is_empty() {
            self.store.count_filings().await?
        } else {
            let merged = self.merge(&rows).await?;
            progress.counts.inserted = merged.inserted;
            progress.counts.updated = merged.updated;
            progress.counts.skipped = merged.skipped;
            merged.total
        };
        self.store
            .finish_run(sync_id, &RunOutcome::Completed, &progress.counts, Utc::now())
            .await?;

        let counts = progress.counts;
        info!(
            sync_id,
            processed = counts.processed,
            inserted = counts.inserted,
            updated = counts.updated,
            skipped = counts.skipped,
            parsing_errors = counts.parsing_errors,
            total_records = total,
            "Sync completed"
        );
        Ok(SyncResult::completed(sync_id, watermark.mode, counts, total))
    }

    /// Fetch and map every page. Nothing is written until all pages are in.
    async fn collect(
        &self,
        since: Option<DateTime<Utc>>,
        counts: &mut SyncCounts,
    ) -> Result<Vec<FilingRecord>> {
        let mut fetcher = PageFetcher::new(
            &self.source,
            self.settings.retry,
            self.settings.page_size,
            since,
        );
        let mut rows = Vec::new();

        while let Some(page) = fetcher.next_page().await? {
            let page_number = fetcher.pages_fetched();
            let (mapped, diagnostics) = map_page(&page);
            counts.processed += page.len() as u64;
            counts.parsing_errors += diagnostics.len() as u64;
            info!(page = page_number, records = page.len(), "Fetched page");

            if !diagnostics.is_empty() {
                warn!(
                    page = page_number,
                    count = diagnostics.len(),
                    "Page has fields that could not be parsed"
                );
                for diagnostic in &diagnostics {
                    debug!(
                        record_id = %diagnostic.record_id,
                        field = %diagnostic.field_name,
                        raw_type = diagnostic.raw_type,
                        "{}",
                        diagnostic.reason
                    );
                }
            }

            rows.extend(mapped);
        }

        Ok(rows)
    }

    /// Merge with secondary indexes suspended.
    async fn merge(&self, rows: &[FilingRecord]) -> Result<MergeOutcome> {
        let dropped = self.store.drop_secondary_indexes().await?;
        debug!(indexes = ?dropped, "Dropped secondary indexes");

        let merged = self.store.merge(rows, Utc::now()).await;

        // Restore whether or not the merge committed. A failure here leaves
        // the data intact and is repaired on the next open.
        match self.store.ensure_indexes().await {
            Ok(()) => debug!("Restored secondary indexes"),
            Err(e) => warn!(error = %e, "Failed to restore secondary indexes"),
        }

        Ok(merged?)
    }

    /// Warn about audit rows stuck in `running`. They are left untouched.
    async fn report_stale_runs(&self) {
        let age = i64::try_from(self.settings.stale_run_after_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        match self.store.stale_running_runs(cutoff).await {
            Ok(runs) => {
                for run in runs {
                    warn!(
                        sync_id = run.sync_id,
                        mode = %run.mode,
                        started_at = %format_timestamp(&run.started_at),
                        "Found sync run still marked running"
                    );
                }
            }
            Err(e) => warn!(error = %e, "Could not check for stale sync runs"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::storage::INDEXES;
    use filing_sync_client::{modified_since_formula, MockSource, SourceError};
    use filing_sync_core::FIELDS;
    use filing_sync_types::{RemoteRecord, SyncStatus};
    use serde_json::{json, Value};

    fn settings() -> EngineSettings {
        EngineSettings {
            retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff: std::time::Duration::from_millis(1),
                multiplier: 2,
                max_backoff: std::time::Duration::from_millis(4),
            },
            ..EngineSettings::default()
        }
    }

    fn remote(id: &str, modified: Option<&str>, company: &str) -> RemoteRecord {
        let mut fields = json!({
            "Parent Company": company,
            "Impacted State": "TX",
            "Product Line": "Homeowners",
            "Overall Rate Change Number": 0.12,
            "Effective Date": "2024-07-01",
        });
        if let Some(ts) = modified {
            fields["Last Modified"] = Value::from(ts);
        }
        match fields {
            Value::Object(map) => RemoteRecord::new(id, map),
            _ => unreachable!(),
        }
    }

    fn page(ids: &[&str]) -> Vec<RemoteRecord> {
        ids.iter()
            .map(|id| remote(id, Some("2024-03-01T10:00:00.000Z"), "Acme Mutual"))
            .collect()
    }

    async fn engine(pages: Vec<Vec<RemoteRecord>>) -> SyncEngine<MockSource> {
        let store = SqliteStore::in_memory().await.unwrap();
        SyncEngine::new(MockSource::with_pages(pages), store, settings())
    }

    async fn company_of(engine: &SyncEngine<MockSource>, id: &str) -> Option<String> {
        let value: Option<Option<String>> =
            sqlx::query_scalar("SELECT company FROM filings WHERE record_id = ?1")
                .bind(id)
                .fetch_optional(engine.store().pool())
                .await
                .unwrap();
        value.flatten()
    }

    /// Every business column of every row, in key order.
    async fn snapshot(engine: &SyncEngine<MockSource>) -> Option<String> {
        let row = std::iter::once("record_id")
            .chain(FIELDS.iter().map(|f| f.column))
            .chain(["remote_modified_at"])
            .map(|c| format!("quote({c})"))
            .collect::<Vec<_>>()
            .join(" || ',' || ");
        let sql = format!(
            "SELECT group_concat(r, '\n') FROM (SELECT {row} AS r FROM filings ORDER BY record_id)"
        );
        sqlx::query_scalar(&sql)
            .fetch_one(engine.store().pool())
            .await
            .unwrap()
    }

    // ===========================================
    // Full and incremental runs
    // ===========================================

    #[tokio::test]
    async fn full_sync_into_empty_store() {
        let engine = engine(vec![page(&["r1", "r2", "r3"]), page(&["r4", "r5"])]).await;

        let result = engine.sync(None).await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.mode, Some(SyncMode::Full));
        assert_eq!(result.counts.processed, 5);
        assert_eq!(result.counts.inserted, 5);
        assert_eq!(result.counts.skipped, 0);
        assert_eq!(result.total_records, Some(5));

        let runs = engine.store().recent_runs(10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, SyncStatus::Completed);
        assert_eq!(runs[0].mode, SyncMode::Full);
        assert_eq!(runs[0].counts, result.counts);
        assert_eq!(Some(runs[0].sync_id), result.sync_id);
    }

    #[tokio::test]
    async fn second_run_without_changes_is_idempotent() {
        let engine = engine(vec![page(&["r1", "r2", "r3"])]).await;
        assert!(engine.sync(None).await.success);
        let before = snapshot(&engine).await;

        engine.source().queue_page(page(&["r1", "r2", "r3"]));
        let result = engine.sync(None).await;

        assert!(result.success);
        assert_eq!(result.mode, Some(SyncMode::Incremental));
        assert_eq!(result.counts.inserted, 0);
        assert_eq!(result.counts.updated, 0);
        assert_eq!(result.counts.skipped, 3);
        assert_eq!(snapshot(&engine).await, before);
    }

    #[tokio::test]
    async fn incremental_watermark_is_skewed_back() {
        let engine = engine(vec![page(&["r1"])]).await;
        engine.sync(None).await;
        let completed = engine.store().last_completed_at().await.unwrap().unwrap();

        engine.sync(None).await;

        let requests = engine.source().requests();
        let last = requests.last().unwrap();
        let expected = modified_since_formula(completed - Duration::minutes(5));
        assert_eq!(last.filter.as_deref(), Some(expected.as_str()));
        assert_eq!(requests[0].filter, None);
    }

    #[tokio::test]
    async fn manual_cutoff_is_used_as_is() {
        let engine = engine(vec![page(&["r1"])]).await;
        let since = "2024-02-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();

        let result = engine.sync(Some(since)).await;

        assert_eq!(result.mode, Some(SyncMode::Manual));
        assert_eq!(
            engine.source().requests()[0].filter.as_deref(),
            Some("LAST_MODIFIED_TIME() > '2024-02-01T00:00:00Z'")
        );
        let run = engine.store().get_run(result.sync_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(run.watermark, Some(since));
    }

    #[tokio::test]
    async fn empty_fetch_completes_without_writes() {
        let engine = engine(vec![]).await;

        let result = engine.sync(None).await;

        assert!(result.success);
        assert_eq!(result.counts, SyncCounts::default());
        assert_eq!(result.total_records, Some(0));
        assert!(engine.store().last_completed_at().await.unwrap().is_some());
    }

    // ===========================================
    // Conflict resolution
    // ===========================================

    #[tokio::test]
    async fn older_remote_version_does_not_overwrite() {
        let engine = engine(vec![vec![remote(
            "r1",
            Some("2024-03-02T00:00:00Z"),
            "Current",
        )]])
        .await;
        engine.sync(None).await;

        engine
            .source()
            .queue_page(vec![remote("r1", Some("2024-03-01T00:00:00Z"), "Stale")]);
        let result = engine.sync(None).await;

        assert_eq!(result.counts.skipped, 1);
        assert_eq!(result.counts.updated, 0);
        assert_eq!(company_of(&engine, "r1").await.as_deref(), Some("Current"));
    }

    #[tokio::test]
    async fn newer_remote_version_is_applied() {
        let engine = engine(vec![vec![remote("r1", Some("2024-03-01T00:00:00Z"), "Old")]]).await;
        engine.sync(None).await;

        engine
            .source()
            .queue_page(vec![remote("r1", Some("2024-03-02T00:00:00Z"), "New")]);
        let result = engine.sync(None).await;

        assert_eq!(result.counts.updated, 1);
        assert_eq!(company_of(&engine, "r1").await.as_deref(), Some("New"));
    }

    #[tokio::test]
    async fn row_without_timestamp_is_replaced() {
        let engine = engine(vec![vec![remote("r1", None, "Undated")]]).await;
        engine.sync(None).await;

        engine
            .source()
            .queue_page(vec![remote("r1", Some("2020-01-01T00:00:00Z"), "Dated")]);
        let result = engine.sync(None).await;

        assert_eq!(result.counts.updated, 1);
        assert_eq!(company_of(&engine, "r1").await.as_deref(), Some("Dated"));
    }

    #[tokio::test]
    async fn repeated_record_across_pages_keeps_newest() {
        let engine = engine(vec![
            vec![remote("r1", Some("2024-03-01T00:00:00Z"), "First")],
            vec![remote("r1", Some("2024-03-02T00:00:00Z"), "Second")],
        ])
        .await;

        let result = engine.sync(None).await;

        assert_eq!(result.counts.processed, 2);
        assert_eq!(result.counts.inserted, 1);
        assert_eq!(result.counts.skipped, 1);
        assert_eq!(company_of(&engine, "r1").await.as_deref(), Some("Second"));
    }

    // ===========================================
    // Diagnostics
    // ===========================================

    #[tokio::test]
    async fn bad_field_nulls_the_field_not_the_record() {
        let mut records = page(&["r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8"]);
        let mut bad = remote("bad", Some("2024-03-01T10:00:00Z"), "Bad Data Co");
        bad.fields
            .insert("Overall Rate Change Number".into(), json!("not a number"));
        records.push(bad);
        let engine = engine(vec![records]).await;

        let result = engine.sync(None).await;

        assert!(result.success);
        assert_eq!(result.counts.processed, 10);
        assert_eq!(result.counts.parsing_errors, 1);
        assert_eq!(result.total_records, Some(10));
        assert_eq!(result.warning.as_deref(), Some("1 parsing errors"));

        let rate: Option<f64> = sqlx::query_scalar(
            "SELECT premium_change_number FROM filings WHERE record_id = 'bad'",
        )
        .fetch_one(engine.store().pool())
        .await
        .unwrap();
        assert_eq!(rate, None);
        assert_eq!(company_of(&engine, "bad").await.as_deref(), Some("Bad Data Co"));
    }

    // ===========================================
    // Failures
    // ===========================================

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let engine = engine(vec![page(&["r1", "r2"])]).await;
        engine.source().fail_next(SourceError::Timeout);

        let result = engine.sync(None).await;

        assert!(result.success);
        assert_eq!(result.counts.inserted, 2);
        assert_eq!(engine.source().call_count(), 2);
    }

    #[tokio::test]
    async fn fetch_failure_records_failed_run() {
        let engine = engine(vec![page(&["r1"])]).await;
        engine
            .source()
            .fail_next(SourceError::from_status(401, "invalid token"));

        let result = engine.sync(None).await;

        assert!(!result.success);
        assert_eq!(result.mode, Some(SyncMode::Full));
        assert!(result.error.as_deref().unwrap().contains("401"));
        assert_eq!(engine.store().count_filings().await.unwrap(), 0);

        let run = engine.store().get_run(result.sync_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(run.status, SyncStatus::Failed);
        assert!(run.error_message.is_some());
        assert_eq!(engine.store().last_completed_at().await.unwrap(), None);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_run() {
        let engine = engine(vec![page(&["r1"])]).await;
        for _ in 0..3 {
            engine.source().fail_next(SourceError::RateLimited);
        }

        let result = engine.sync(None).await;

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("after 3 attempts"));
    }

    #[tokio::test]
    async fn merge_failure_leaves_store_untouched() {
        let original = remote("r1", Some("2024-03-01T00:00:00Z"), "Original");
        let engine = engine(vec![vec![original]]).await;
        engine.sync(None).await;
        let before = snapshot(&engine).await;

        sqlx::query(
            "CREATE TRIGGER poison_insert BEFORE INSERT ON filings \
             WHEN NEW.record_id = 'poison' BEGIN SELECT RAISE(ABORT, 'poisoned record'); END",
        )
        .execute(engine.store().pool())
        .await
        .unwrap();
        engine.source().queue_page(vec![
            remote("r1", Some("2024-03-05T00:00:00Z"), "Changed"),
            remote("r2", Some("2024-03-05T00:00:00Z"), "New"),
            remote("poison", Some("2024-03-05T00:00:00Z"), "Bad"),
        ]);

        let result = engine.sync(None).await;

        assert!(!result.success);
        assert_eq!(result.counts.processed, 3);
        assert_eq!(result.counts.inserted, 0);
        assert_eq!(snapshot(&engine).await, before);

        // Indexes come back even though the merge rolled back.
        let indexes: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND tbl_name = 'filings' \
             AND sql IS NOT NULL",
        )
        .fetch_one(engine.store().pool())
        .await
        .unwrap();
        assert_eq!(indexes as usize, INDEXES.len());

        let run = engine.store().get_run(result.sync_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(run.status, SyncStatus::Failed);
        assert_eq!(run.counts.processed, 3);
    }

    #[tokio::test]
    async fn stale_running_rows_are_left_alone() {
        let engine = engine(vec![page(&["r1"])]).await;
        let stale_id = engine
            .store()
            .begin_run(SyncMode::Full, None, Utc::now() - Duration::hours(7))
            .await
            .unwrap();

        let result = engine.sync(None).await;

        assert!(result.success);
        let stale = engine.store().get_run(stale_id).await.unwrap().unwrap();
        assert_eq!(stale.status, SyncStatus::Running);
        assert!(result.sync_id.unwrap() > stale_id);
    }

    #[tokio::test]
    async fn from_config_validates_first() {
        let err = SyncEngine::from_config(&Config::default()).await.err().unwrap();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
