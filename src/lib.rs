//! # Strata
//!
//! Versioned storage for tables and arrays on top of a document store.
//!
//! ## Features
//!
//! - **Immutable versions**: every write creates a numbered version; any
//!   past version stays readable by number, snapshot or time
//! - **Chunked and deduplicated**: data is split into content-addressed
//!   chunks shared between versions, so appends only store new rows
//! - **Date chunking**: tables partitioned by day, month or year support
//!   range reads and range updates that rewrite only touched periods
//! - **Snapshots**: named, consistent pins across symbols that survive
//!   pruning and deletion
//! - **Pluggable backing stores**: in-memory and SQLite
//!
//! ## Modules
//!
//! - [`storage`]: `VersionStore`, values, options and errors
//! - [`handlers`]: per-type write/read strategies
//! - [`chunker`]: table partitioning
//! - [`codec`]: array and table binary format
//! - [`backend`]: backing store trait and implementations
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use strata::backend::SqliteStore;
//! use strata::chunker::{ChunkerSpec, Frequency};
//! use strata::codec::{Array, Column, Table};
//! use strata::storage::{DateRange, ReadOptions, VersionStore, WriteOptions};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = SqliteStore::open("./strata.db", Duration::from_secs(5))?;
//!     let store = VersionStore::new(Arc::new(backend), "research");
//!
//!     let prices = Table::new(vec![
//!         Column::new("date", Array::timestamps(vec![1_704_153_600_000, 1_706_832_000_000])),
//!         Column::new("px", Array::from_f64(vec![101.5, 102.25])),
//!     ])?
//!     .set_index(&["date"])?;
//!
//!     let options = WriteOptions::new().chunker(ChunkerSpec::date(Frequency::Month));
//!     store.write("AAPL", prices, None, &options)?;
//!
//!     // Read February only
//!     let feb = DateRange::between(1_706_745_600_000, 1_709_251_200_000);
//!     let item = store.read("AAPL", &ReadOptions::new().range(feb))?;
//!     println!("v{}: {:?}", item.version, item.data);
//!
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod chunker;
pub mod codec;
pub mod config;
pub mod handlers;
pub mod import;
pub mod storage;

// Re-export top-level types for convenience
pub use storage::{
    Data, DateRange, FsckReport, QuotaStatus, ReadOptions, StoreError, StoreResult, StoreStats,
    VersionInfo, VersionStore, VersionedItem, WriteOptions,
};

pub use backend::{BackingStore, InMemoryStore, SqliteStore};

pub use chunker::{Chunker, ChunkerSpec, Frequency, RangeToken, SegmentFilter};

pub use codec::{Array, ArrayData, Column, DType, Table};

pub use handlers::{HandlerRegistry, TypeHandler};

pub use config::{Config, ConfigError, EngineConfig, LoggingConfig, StoreConfig};

pub use import::{CsvImportResult, CsvImporter};
