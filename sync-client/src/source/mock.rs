//! Mock source for testing.
//!
//! Allows queueing pages and failures, and captures requests for verification.

use super::{Page, PageRequest, RemoteSource, SourceError};
use async_trait::async_trait;
use filing_sync_types::RemoteRecord;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Mock source for testing.
///
/// Pages are served in queue order. Each served page's `offset` is set
/// automatically so the fetcher keeps paging until the queue is empty.
#[derive(Debug, Default)]
pub struct MockSource {
    inner: Arc<Mutex<MockSourceInner>>,
}

#[derive(Debug, Default)]
struct MockSourceInner {
    pages: VecDeque<Vec<RemoteRecord>>,
    failures: VecDeque<SourceError>,
    requests: Vec<PageRequest>,
    served: usize,
}

impl MockSource {
    /// Create a new mock source with no pages.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock source serving the given pages in order.
    pub fn with_pages(pages: Vec<Vec<RemoteRecord>>) -> Self {
        let source = Self::new();
        for page in pages {
            source.queue_page(page);
        }
        source
    }

    /// Queue a page to be returned after those already queued.
    pub fn queue_page(&self, records: Vec<RemoteRecord>) {
        let mut inner = self.lock();
        inner.pages.push_back(records);
    }

    /// Cause the next `list_page()` call to fail with `error`.
    ///
    /// Several failures may be queued; each is consumed by one call.
    pub fn fail_next(&self, error: SourceError) {
        let mut inner = self.lock();
        inner.failures.push_back(error);
    }

    /// Every request received, including failed ones.
    pub fn requests(&self) -> Vec<PageRequest> {
        self.lock().requests.clone()
    }

    /// Number of `list_page()` calls received.
    pub fn call_count(&self) -> usize {
        self.lock().requests.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockSourceInner> {
        // A poisoned lock only means another test thread panicked.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Clone for MockSource {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl RemoteSource for MockSource {
    async fn list_page(&self, request: &PageRequest) -> Result<Page, SourceError> {
        let mut inner = self.lock();
        inner.requests.push(request.clone());

        // Check for forced failure
        if let Some(error) = inner.failures.pop_front() {
            return Err(error);
        }

        let records = inner.pages.pop_front().unwrap_or_default();
        inner.served += 1;
        let offset = (!inner.pages.is_empty()).then(|| format!("page{}", inner.served));
        Ok(Page { records, offset })
    }
}
