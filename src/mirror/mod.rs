//! Read access to the persisted local mirror.
//!
//! The mirror store records the last synchronized state of every path under
//! the sync root. The analysis engine only reads it: point lookups by path,
//! one recursive listing at start-up, and a change cursor.

mod memory;

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

use crate::metadata::Metadata;

pub use memory::InMemoryMirror;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store backend error: {reason}")]
    Backend { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Key-value view of the mirror plus a monotonic change cursor.
#[async_trait]
pub trait MirrorStore: Send + Sync {
    /// Record for `path`, or `None` when unknown.
    async fn get(&self, path: &Path) -> StoreResult<Option<Metadata>>;

    /// All records at or under `prefix`. An empty prefix lists everything.
    async fn list_recursive(&self, prefix: &Path) -> StoreResult<Vec<Metadata>>;

    /// Sequence number of the latest recorded change.
    async fn last_seq(&self) -> StoreResult<u64>;
}
