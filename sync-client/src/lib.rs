//! # sync-client
//!
//! Remote source access for filing-sync.
//!
//! ## Features
//!
//! - **Source Abstraction**: Pluggable [`RemoteSource`] (HTTP table API, mock)
//! - **Lazy Pagination**: [`PageFetcher`] yields one bounded page at a time
//! - **Retry With Backoff**: Transient failures are retried per page using
//!   the pure [`filing_sync_core::RetryPolicy`]
//!
//! ## Example
//!
//! ```ignore
//! use filing_sync_client::{AirtableConfig, AirtableSource, PageFetcher};
//!
//! let source = AirtableSource::new(AirtableConfig::new(base_id, table, api_key))?;
//! let mut pages = PageFetcher::new(&source, RetryPolicy::default(), 100, None);
//! while let Some(records) = pages.next_page().await? {
//!     // map and accumulate
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod fetcher;
pub mod source;

pub use fetcher::{modified_since_formula, FetchError, PageFetcher};
pub use source::{
    AirtableConfig, AirtableSource, MockSource, Page, PageRequest, RemoteSource, SourceError,
    DEFAULT_API_URL, MAX_PAGE_SIZE,
};
