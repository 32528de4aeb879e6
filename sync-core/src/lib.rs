//! # sync-core
//!
//! Pure logic for filing-sync (no I/O, instant tests).
//!
//! This crate implements the decisions of a sync run without any network
//! or disk I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - One place that couples to remote field names ([`mapper::FIELDS`])
//!
//! The actual I/O (HTTP, SQLite) is performed by `sync-client` and
//! `sync-engine`, which act on the values produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod mapper;
pub mod retry;
pub mod watermark;

pub use batch::{collapse_duplicates, Collapsed};
pub use mapper::{
    map_page, map_record, numeric_field_stats, FieldKind, FieldSpec, FieldStats, MappedRecord,
    FIELDS, LAST_MODIFIED_FIELD,
};
pub use retry::RetryPolicy;
pub use watermark::{Watermark, WatermarkResolver, DEFAULT_WATERMARK_SKEW_SECS};
