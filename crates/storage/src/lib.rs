//! Persistence for the experiment engine
//!
//! Everything is stored through the byte-oriented [`BlobStore`] trait. Two
//! typed stores sit on top of it and are meant to be backed by separate
//! blob stores:
//!
//! 1. [`ExperimentStore`]: experiment definitions, final results and the
//!    single active-experiment record (low volume, written on every
//!    lifecycle transition)
//! 2. [`EventLog`]: the append-only per-experiment event log (high volume,
//!    written in batches by the recorder and pruned by age)
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use storage::{BlobStore, MemoryBlobStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(MemoryBlobStore::new());
//!     store.set("experiments/123", b"{}").await?;
//!     assert!(store.get("experiments/123").await?.is_some());
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod event_log;
pub mod experiment_store;
pub mod file;
pub mod memory;

pub use backend::BlobStore;
pub use error::{StorageError, StorageResult};
pub use event_log::{AppendOutcome, EventLog};
pub use experiment_store::ExperimentStore;
pub use file::FileBlobStore;
pub use memory::{MemoryBlobStore, MemoryStoreStats};
