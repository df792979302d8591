//! Interface to the synchronization layer and the lock shared with it.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::metadata::Metadata;

/// Which side of the synchronization observed a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Local,
    Remote,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Local => f.write_str("local"),
            Side::Remote => f.write_str("remote"),
        }
    }
}

/// Receiver of analysed changes, one operation per change kind.
///
/// Each call is awaited on its own and may fail on its own; the watcher keeps
/// submitting the rest of the batch after a failure.
#[async_trait]
pub trait Synchronizer: Send + Sync {
    async fn add_file(&self, side: Side, doc: Metadata) -> anyhow::Result<()>;

    async fn update_file(&self, side: Side, doc: Metadata) -> anyhow::Result<()>;

    async fn move_file(&self, side: Side, doc: Metadata, old: Metadata) -> anyhow::Result<()>;

    async fn put_directory(&self, side: Side, doc: Metadata) -> anyhow::Result<()>;

    async fn move_directory(&self, side: Side, doc: Metadata, old: Metadata)
    -> anyhow::Result<()>;

    async fn trash_file(&self, side: Side, doc: Metadata) -> anyhow::Result<()>;

    async fn trash_directory(&self, side: Side, doc: Metadata) -> anyhow::Result<()>;
}

/// Mutual exclusion between the local watcher and the remote pass.
///
/// Cloning shares the same lock.
#[derive(Debug, Clone, Default)]
pub struct SyncLock {
    inner: Arc<Mutex<()>>,
}

impl SyncLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the lock. It is released when the guard is dropped.
    pub async fn acquire(&self, owner: &'static str) -> SyncLockGuard {
        tracing::trace!("[lock] {owner} waiting");
        let guard = self.inner.clone().lock_owned().await;
        tracing::trace!("[lock] {owner} acquired");
        SyncLockGuard {
            _guard: guard,
            owner,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

pub struct SyncLockGuard {
    _guard: OwnedMutexGuard<()>,
    owner: &'static str,
}

impl Drop for SyncLockGuard {
    fn drop(&mut self) {
        tracing::trace!("[lock] {} released", self.owner);
    }
}
