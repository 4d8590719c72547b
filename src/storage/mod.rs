//! Strata Version Store
//!
//! This module provides the symbol-level storage API:
//!
//! - **types**: Values and options (Data, VersionedItem, DateRange, ...)
//! - **engine**: `VersionStore`, orchestrating handlers and the backing store
//! - **fsck**: Orphaned chunk and snapshot reference repair
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//!   Data → TypeHandler → Chunker → Codec → chunks (deduplicated)
//!        → next version number → version document
//!
//! Read Path:
//!   Selector → version document → TypeHandler → chunks → Data
//! ```
//!
//! A version is visible once its document exists. Chunks are written first
//! and carry the new version id in their parent set, so a crash in between
//! leaves only orphaned references for `fsck` to collect.
//!
//! # Example
//!
//! ```rust,no_run
//! use strata::backend::InMemoryStore;
//! use strata::codec::Array;
//! use strata::storage::{ReadOptions, VersionStore, WriteOptions};
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = VersionStore::new(Arc::new(InMemoryStore::new()), "research");
//!
//!     store.write("prices", Array::from_f64(vec![1.0, 2.0]), None, &WriteOptions::default())?;
//!     store.append("prices", Array::from_f64(vec![3.0]), None, &WriteOptions::default())?;
//!
//!     let first = store.read("prices", &ReadOptions::new().version(1))?;
//!     println!("v{}: {:?}", first.version, first.data);
//!
//!     Ok(())
//! }
//! ```

pub mod engine;
pub mod error;
pub mod fsck;
pub mod types;

// Re-export commonly used types
pub use engine::VersionStore;
pub use error::{StoreError, StoreResult};
pub use fsck::FsckReport;
pub use types::{
    Data, DateRange, QuotaStatus, ReadOptions, StoreStats, VersionInfo, VersionedItem,
    WriteOptions,
};
