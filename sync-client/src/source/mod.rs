//! Remote source abstraction for filing-sync.
//!
//! This module provides a pluggable source layer that abstracts the
//! remote paginated table (HTTP table API, mock for testing).
//!
//! # Design
//!
//! The source trait is a single async list operation:
//! - `list_page()` fetches one page, given a page size, an optional
//!   server-side filter and the continuation offset of the previous page
//!
//! Retrying is not the source's job. [`crate::PageFetcher`] wraps each call.
//!
//! # Example
//!
//! ```ignore
//! let source = MockSource::new();
//! source.queue_page(records);
//! let page = source.list_page(&PageRequest::first(100)).await?;
//! ```

mod airtable;
mod mock;

pub use airtable::{AirtableConfig, AirtableSource, DEFAULT_API_URL};
pub use mock::MockSource;

use async_trait::async_trait;
use filing_sync_types::RemoteRecord;
use thiserror::Error;

/// Largest page the remote API accepts.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Source errors.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Connection could not be established.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Request timed out.
    #[error("request timed out")]
    Timeout,

    /// Remote rate limit hit (HTTP 429).
    #[error("rate limited")]
    RateLimited,

    /// Remote server error (HTTP 5xx).
    #[error("server error: HTTP {status}: {body}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Response body, for the log.
        body: String,
    },

    /// Request rejected (HTTP 4xx other than 429).
    #[error("request rejected: HTTP {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body, for the log.
        body: String,
    },

    /// Response body was not a valid page.
    #[error("invalid response: {0}")]
    Decode(String),

    /// Endpoint could not be built from the configuration.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Any other HTTP client failure.
    #[error("http error: {0}")]
    Http(String),
}

impl SourceError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            429 => SourceError::RateLimited,
            500..=599 => SourceError::Server { status, body },
            _ => SourceError::Rejected { status, body },
        }
    }

    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SourceError::ConnectionFailed(_)
                | SourceError::Timeout
                | SourceError::RateLimited
                | SourceError::Server { .. }
        )
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SourceError::Timeout
        } else if e.is_connect() {
            SourceError::ConnectionFailed(e.to_string())
        } else if e.is_decode() {
            SourceError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            SourceError::from_status(status.as_u16(), e.to_string())
        } else {
            SourceError::Http(e.to_string())
        }
    }
}

/// Parameters of one list call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Maximum records to return (at most [`MAX_PAGE_SIZE`]).
    pub page_size: u32,
    /// Server-side filter expression; `None` lists everything.
    pub filter: Option<String>,
    /// Continuation token from the previous page.
    pub offset: Option<String>,
}

impl PageRequest {
    /// Request for the first page.
    pub fn first(page_size: u32) -> Self {
        Self {
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
            filter: None,
            offset: None,
        }
    }

    /// Scope the request with a server-side filter.
    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.filter = filter;
        self
    }
}

/// One page of remote records.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Page {
    /// Records in source order.
    pub records: Vec<RemoteRecord>,
    /// Continuation token; `None` on the last page.
    pub offset: Option<String>,
}

/// Paginated list operation over the remote table.
///
/// Implementations handle the underlying access mechanism
/// (HTTP table API, mock, etc).
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Fetch a single page.
    async fn list_page(&self, request: &PageRequest) -> Result<Page, SourceError>;
}
