//! # Fundscope Store
//!
//! File-based storage layer for fund holdings.
//!
//! ## Overview
//!
//! Everything the ingestion pipeline persists lives under a single data home
//! and follows one partition layout:
//!
//! | Store | Layout | Written by |
//! |-------|--------|------------|
//! | [`SnapshotStore`] | `gold_holdings/fund_id=<F>/as_of=<D>/version=<N>/` | orchestrator |
//! | [`QaReportStore`] | `qa/fund_id=<F>/as_of=<D>/qa_report.json` | QA gate |
//! | [`RawDocumentStore`] | `raw/source=<S>/fund_id=<F>/as_of=<D>/<sha256>.<ext>` | downloader |
//!
//! Snapshots are append-only: a new ingestion for an existing `(fund, as_of)`
//! creates `version=N+1` and never touches earlier versions. Snapshot handles
//! are derived by scanning directories at read time and are never persisted.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fundscope_store::{SnapshotStore, StoreConfig};
//!
//! let config = StoreConfig::default();
//! let store = SnapshotStore::new(&config.gold_root);
//! let fund_root = store.fund_root("SPY", None).expect("valid fund id");
//! if let Some(latest) = store.latest(&fund_root, "SPY").expect("scan") {
//!     println!("{} v{} at {}", latest.as_of, latest.version, latest.path.display());
//! }
//! ```

pub mod dates;
pub mod layout;
pub mod qa_reports;
pub mod raw;
pub mod snapshot;
pub mod table;

use std::env;
use std::path::PathBuf;

use thiserror::Error;

pub use qa_reports::QaReportStore;
pub use raw::{RawDocumentMetadata, RawDocumentRequest, RawDocumentStore, StoredDocument};
pub use snapshot::{SnapshotHandle, SnapshotStore};
pub use table::{SnapshotFormat, SnapshotTable};

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error (file system operations).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("parquet error: {0}")]
    Parquet(String),

    /// File extension is not one of csv, parquet or json.
    #[error("unsupported snapshot format '{extension}'")]
    UnsupportedFormat { extension: String },

    /// A partition key would escape its parent directory.
    #[error("invalid partition value '{0}'")]
    InvalidLayout(String),
}

/// Storage roots for a fundscope data home.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root directory for fundscope data.
    pub home: PathBuf,
    /// Versioned, enriched holdings snapshots.
    pub gold_root: PathBuf,
    /// QA reports keyed by fund and as-of date.
    pub qa_root: PathBuf,
    /// Raw downloaded documents keyed by content hash.
    pub raw_root: PathBuf,
}

impl StoreConfig {
    /// Builds all roots beneath `home`.
    pub fn under(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            gold_root: home.join("gold_holdings"),
            qa_root: home.join("qa"),
            raw_root: home.join("raw"),
            home,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::under(resolve_fundscope_home())
    }
}

/// Resolves the data home from `FUNDSCOPE_HOME`, then `$HOME/.fundscope`.
pub fn resolve_fundscope_home() -> PathBuf {
    if let Some(path) = env::var_os("FUNDSCOPE_HOME") {
        return PathBuf::from(path);
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".fundscope");
    }

    PathBuf::from(".fundscope")
}
