//! # sync-engine
//!
//! Incremental filing synchronization for filing-sync.
//!
//! This crate owns the local filing store and runs sync passes that:
//! - Resolve a watermark from the sync history (full, incremental, manual)
//! - Pull the remote table page by page, with retry
//! - Map loosely typed records to canonical rows, isolating bad fields
//! - Merge all rows in one transaction under last-writer-wins
//! - Record one audit row per run
//!
//! ## Architecture
//!
//! ```text
//!   Remote table (HTTP)
//!          │   pages of field bags
//!          ▼
//!   ┌────────────────────────────────┐
//!   │          sync-engine           │
//!   │  fetch ─► map ─► merge (1 tx)  │
//!   │  ┌──────────────────────────┐  │
//!   │  │ SQLite (filings, history)│  │
//!   │  └──────────────────────────┘  │
//!   └────────────────────────────────┘
//!          ▲
//!          │   plain SQL reads
//!   Reports / auditors
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use filing_sync_engine::{config::Config, SyncEngine};
//!
//! let mut config = Config::from_file(Path::new("filing-sync.toml"))?;
//! config.apply_env();
//! let engine = SyncEngine::from_config(&config).await?;
//! let result = engine.sync(None).await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod engine;
pub mod error;
pub mod storage;

pub use engine::{EngineSettings, SyncEngine};
pub use error::{EngineError, Result, StorageError};
pub use storage::{MergeOutcome, RunOutcome, SqliteStore, SyncStore};
