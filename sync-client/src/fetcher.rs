//! Page fetcher: a lazy, finite sequence of remote pages.
//!
//! Each call to [`PageFetcher::next_page`] performs one remote list call,
//! retried under the configured [`RetryPolicy`]. The sequence cannot be
//! resumed mid-run; a new run starts again from a watermark.

use chrono::{DateTime, SecondsFormat, Utc};
use filing_sync_core::RetryPolicy;
use filing_sync_types::RemoteRecord;
use thiserror::Error;
use tracing::{debug, warn};

use crate::source::{Page, PageRequest, RemoteSource, SourceError};

/// Fetch errors. All of them abort the run.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Non-transient source failure, not retried.
    #[error("remote fetch failed: {0}")]
    Source(#[from] SourceError),

    /// Transient failures persisted through every attempt.
    #[error("remote fetch failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Attempts made, including the first.
        attempts: u32,
        /// Error of the final attempt.
        #[source]
        last: SourceError,
    },
}

/// Server-side filter selecting records modified after `since`.
pub fn modified_since_formula(since: DateTime<Utc>) -> String {
    format!(
        "LAST_MODIFIED_TIME() > '{}'",
        since.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}

/// Pulls pages from a [`RemoteSource`] one at a time.
pub struct PageFetcher<'a, S: RemoteSource + ?Sized> {
    source: &'a S,
    policy: RetryPolicy,
    request: PageRequest,
    pages_fetched: u32,
    done: bool,
}

impl<'a, S: RemoteSource + ?Sized> PageFetcher<'a, S> {
    /// Create a fetcher. `since` scopes every request to records modified
    /// after it; `None` fetches the whole table.
    pub fn new(
        source: &'a S,
        policy: RetryPolicy,
        page_size: u32,
        since: Option<DateTime<Utc>>,
    ) -> Self {
        let request = PageRequest::first(page_size).with_filter(since.map(modified_since_formula));
        Self {
            source,
            policy,
            request,
            pages_fetched: 0,
            done: false,
        }
    }

    /// Pages returned so far.
    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    /// Fetch the next page. Returns `Ok(None)` once the source is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<RemoteRecord>>, FetchError> {
        if self.done {
            return Ok(None);
        }

        let page = self.fetch_with_retry().await?;
        self.pages_fetched += 1;

        match page.offset {
            Some(offset) => self.request.offset = Some(offset),
            None => self.done = true,
        }

        Ok(Some(page.records))
    }

    async fn fetch_with_retry(&self) -> Result<Page, FetchError> {
        let mut attempt = 1;
        loop {
            match self.source.list_page(&self.request).await {
                Ok(page) => {
                    if attempt > 1 {
                        debug!(attempt, page = self.pages_fetched + 1, "Remote fetch recovered");
                    }
                    return Ok(page);
                }
                Err(e) if !e.is_transient() => return Err(FetchError::Source(e)),
                Err(e) if self.policy.should_retry(attempt) => {
                    let delay = self.policy.delay_after(attempt);
                    warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Remote fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(FetchError::RetriesExhausted {
                        attempts: attempt,
                        last: e,
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockSource;
    use chrono::TimeZone;
    use std::time::Duration;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(1),
            multiplier: 2,
            max_backoff: Duration::from_millis(4),
        }
    }

    fn records(ids: &[&str]) -> Vec<RemoteRecord> {
        ids.iter()
            .map(|id| RemoteRecord::new(*id, Default::default()))
            .collect()
    }

    async fn drain<S: RemoteSource>(fetcher: &mut PageFetcher<'_, S>) -> Vec<Vec<RemoteRecord>> {
        let mut pages = Vec::new();
        while let Some(page) = fetcher.next_page().await.unwrap() {
            pages.push(page);
        }
        pages
    }

    // ===========================================
    // Pagination
    // ===========================================

    #[tokio::test]
    async fn walks_all_pages_then_stops() {
        let source = MockSource::with_pages(vec![records(&["a", "b", "c"]), records(&["d", "e"])]);
        let mut fetcher = PageFetcher::new(&source, fast_policy(), 100, None);

        let pages = drain(&mut fetcher).await;
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].len(), 3);
        assert_eq!(pages[1].len(), 2);
        assert_eq!(fetcher.pages_fetched(), 2);

        // Exhausted fetchers make no further calls.
        assert!(fetcher.next_page().await.unwrap().is_none());
        assert_eq!(source.call_count(), 2);
    }

    #[tokio::test]
    async fn passes_continuation_offset() {
        let source = MockSource::with_pages(vec![records(&["a"]), records(&["b"])]);
        let mut fetcher = PageFetcher::new(&source, fast_policy(), 100, None);
        drain(&mut fetcher).await;

        let requests = source.requests();
        assert_eq!(requests[0].offset, None);
        assert_eq!(requests[1].offset.as_deref(), Some("page1"));
    }

    #[tokio::test]
    async fn full_sync_has_no_filter() {
        let source = MockSource::with_pages(vec![records(&["a"])]);
        let mut fetcher = PageFetcher::new(&source, fast_policy(), 100, None);
        drain(&mut fetcher).await;

        assert_eq!(source.requests()[0].filter, None);
    }

    #[tokio::test]
    async fn watermark_scopes_every_request() {
        let since = Utc.with_ymd_and_hms(2024, 3, 1, 11, 55, 0).unwrap();
        let source = MockSource::with_pages(vec![records(&["a"]), records(&["b"])]);
        let mut fetcher = PageFetcher::new(&source, fast_policy(), 100, Some(since));
        drain(&mut fetcher).await;

        for request in source.requests() {
            assert_eq!(
                request.filter.as_deref(),
                Some("LAST_MODIFIED_TIME() > '2024-03-01T11:55:00Z'")
            );
        }
    }

    #[tokio::test]
    async fn empty_source_yields_one_empty_page() {
        let source = MockSource::new();
        let mut fetcher = PageFetcher::new(&source, fast_policy(), 100, None);

        assert_eq!(fetcher.next_page().await.unwrap(), Some(vec![]));
        assert_eq!(fetcher.next_page().await.unwrap(), None);
    }

    // ===========================================
    // Retry
    // ===========================================

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let source = MockSource::with_pages(vec![records(&["a"])]);
        source.fail_next(SourceError::Timeout);
        source.fail_next(SourceError::RateLimited);

        let mut fetcher = PageFetcher::new(&source, fast_policy(), 100, None);
        let page = fetcher.next_page().await.unwrap().unwrap();

        assert_eq!(page.len(), 1);
        assert_eq!(source.call_count(), 3);
    }

    #[tokio::test]
    async fn retries_are_per_page() {
        let source = MockSource::with_pages(vec![records(&["a"]), records(&["b"])]);
        let mut fetcher = PageFetcher::new(&source, fast_policy(), 100, None);

        fetcher.next_page().await.unwrap();
        for _ in 0..4 {
            source.fail_next(SourceError::from_status(503, ""));
        }
        let second = fetcher.next_page().await.unwrap().unwrap();

        assert_eq!(second[0].id, "b");
        // The retried request still carries the continuation offset.
        assert!(source.requests()[1..]
            .iter()
            .all(|r| r.offset.as_deref() == Some("page1")));
    }

    #[tokio::test]
    async fn exhausted_retries_are_fatal() {
        let source = MockSource::with_pages(vec![records(&["a"])]);
        for _ in 0..5 {
            source.fail_next(SourceError::from_status(500, "boom"));
        }

        let mut fetcher = PageFetcher::new(&source, fast_policy(), 100, None);
        let err = fetcher.next_page().await.unwrap_err();

        assert!(matches!(err, FetchError::RetriesExhausted { attempts: 5, .. }));
        assert_eq!(source.call_count(), 5);
    }

    #[tokio::test]
    async fn fatal_errors_fail_fast() {
        let source = MockSource::with_pages(vec![records(&["a"])]);
        source.fail_next(SourceError::from_status(401, "unauthorized"));

        let mut fetcher = PageFetcher::new(&source, fast_policy(), 100, None);
        let err = fetcher.next_page().await.unwrap_err();

        assert!(matches!(err, FetchError::Source(SourceError::Rejected { status: 401, .. })));
        assert_eq!(source.call_count(), 1);
    }

    #[tokio::test]
    async fn single_attempt_policy_does_not_retry() {
        let source = MockSource::with_pages(vec![records(&["a"])]);
        source.fail_next(SourceError::Timeout);

        let mut fetcher = PageFetcher::new(&source, RetryPolicy::none(), 100, None);
        let err = fetcher.next_page().await.unwrap_err();

        assert!(matches!(err, FetchError::RetriesExhausted { attempts: 1, .. }));
    }
}
