//! # sync-types
//!
//! Domain types for the filing synchronization engine.
//!
//! This crate provides the foundational types used across all filing-sync crates:
//! - [`RemoteRecord`], [`FieldBag`] - Records as delivered by the remote source
//! - [`FilingRecord`], [`Cell`] - Canonical rows matching the local schema
//! - [`SyncMode`], [`SyncStatus`], [`SyncCounts`], [`SyncRun`], [`SyncResult`] - Run bookkeeping
//! - [`ParseDiagnostic`] - Field-level parsing failures
//! - [`TypesError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod diagnostic;
mod error;
mod record;
mod run;
pub mod time;

pub use diagnostic::{json_type_name, ParseDiagnostic};
pub use error::TypesError;
pub use record::{Cell, FieldBag, FilingRecord, RemoteRecord};
pub use run::{SyncCounts, SyncMode, SyncResult, SyncRun, SyncStatus};
