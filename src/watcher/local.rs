//! Local watcher: batches raw events, analyses them and submits the result.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::anyhow;
use futures::stream::{self, StreamExt};
use tokio::sync::{Notify, mpsc};
use tokio::time::{Duration, MissedTickBehavior, interval, sleep};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::analysis::{
    self, ChangeBuilder, Checksummer, LocalChange, Move, PendingChanges, Put, RawEvent,
    RawEventKind, Sha256Checksummer,
};
use crate::config::WatcherConfig;
use crate::metadata::Metadata;
use crate::mirror::MirrorStore;

use super::buffer::{BufferMode, EventBuffer};
use super::error::{SubmissionFailure, WatchError};
use super::notifications::{NotificationBroadcaster, WatcherEvent};
use super::sync::{Side, SyncLock, Synchronizer};

/// How often the run loop checks whether the buffer went quiet.
const BUFFER_POLL: Duration = Duration::from_millis(100);

/// Watches one sync root.
///
/// Owns the pending set and runs at most one flush cycle at a time: `flush`
/// borrows the watcher mutably for the whole cycle.
pub struct LocalWatcher {
    sync_path: PathBuf,
    builder: ChangeBuilder,
    store: Arc<dyn MirrorStore>,
    synchronizer: Arc<dyn Synchronizer>,
    lock: SyncLock,
    broadcaster: Arc<NotificationBroadcaster>,
    buffer: EventBuffer,
    pending: PendingChanges,
    /// Paths seen as added since start-up, until the first cycle completes.
    initial_scan: Option<HashSet<PathBuf>>,
    config: WatcherConfig,
    span: tracing::Span,
    handle: WatcherHandle,
}

/// Remote control for a running [`LocalWatcher`].
#[derive(Clone, Default)]
pub struct WatcherHandle {
    stop: CancellationToken,
    force: Arc<AtomicBool>,
    scan_complete: Arc<Notify>,
}

impl WatcherHandle {
    /// The event source finished its initial scan; batches may now flush.
    pub fn scan_complete(&self) {
        self.scan_complete.notify_one();
    }

    /// Ask the run loop to stop. Unless `force`d, it waits the grace period
    /// before returning.
    pub fn stop(&self, force: bool) {
        if force {
            self.force.store(true, Ordering::SeqCst);
        }
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }
}

impl LocalWatcher {
    pub fn builder() -> LocalWatcherBuilder {
        LocalWatcherBuilder::new()
    }

    pub fn handle(&self) -> WatcherHandle {
        self.handle.clone()
    }

    pub fn pending(&self) -> &PendingChanges {
        &self.pending
    }

    pub fn sync_path(&self) -> &Path {
        &self.sync_path
    }

    /// Main loop.
    ///
    /// Buffers events from `events` until they go quiet, then flushes them.
    /// Returns when stopped, or with [`WatchError::RootUnlinked`] once the
    /// sync root disappears. Other cycle failures are logged and the loop
    /// carries on with the next batch.
    pub async fn run(&mut self, mut events: mpsc::Receiver<RawEvent>) -> Result<(), WatchError> {
        self.ensure_root().await?;
        crate::log_event!("watcher", "started", "{}", self.sync_path.display());

        let stop = self.handle.stop.clone();
        let scan_complete = self.handle.scan_complete.clone();
        let mut poll = interval(BUFFER_POLL);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut root_check = interval(Duration::from_millis(self.config.root_check_interval_ms));
        root_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut source_open = true;

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,

                _ = scan_complete.notified(), if self.buffer.mode() == BufferMode::Idle => {
                    crate::log_event!(
                        "watcher",
                        "initial scan complete",
                        "{} event(s) buffered",
                        self.buffer.len()
                    );
                    self.buffer.switch_mode(BufferMode::Timeout);
                }

                received = events.recv(), if source_open => match received {
                    Some(event) => self.record(event),
                    None => {
                        crate::debug_event!("watcher", "event source closed");
                        source_open = false;
                    }
                },

                _ = poll.tick() => {
                    if let Some(batch) = self.buffer.take_if_quiet() {
                        match self.flush(batch).await {
                            Err(e @ WatchError::RootUnlinked { .. }) => return Err(e),
                            Err(e) => tracing::error!("[watcher] cycle failed: {e}"),
                            Ok(()) => {}
                        }
                    }
                }

                _ = root_check.tick() => self.ensure_root().await?,
            }
        }

        self.shutdown().await;
        Ok(())
    }

    fn record(&mut self, event: RawEvent) {
        crate::debug_event!("watcher", event.kind.as_str(), "{}", event.path.display());
        if self.buffer.push(event) {
            self.broadcaster.send(WatcherEvent::BufferingStart);
        }
    }

    async fn shutdown(&mut self) {
        self.buffer.switch_mode(BufferMode::Idle);
        if !self.handle.force.load(Ordering::SeqCst) {
            // Let in-flight write stabilization settle.
            sleep(Duration::from_millis(self.config.stop_grace_ms)).await;
        }
        if !self.buffer.is_empty() {
            crate::log_event!(
                "watcher",
                "stopped",
                "{} unflushed event(s) left",
                self.buffer.len()
            );
        } else {
            crate::log_event!("watcher", "stopped");
        }
    }

    /// Run one cycle over a closed batch of raw events.
    pub async fn flush(&mut self, events: Vec<RawEvent>) -> Result<(), WatchError> {
        let span = self.span.clone();
        self.cycle(events).instrument(span).await
    }

    async fn cycle(&mut self, events: Vec<RawEvent>) -> Result<(), WatchError> {
        crate::debug_event!("watcher", "flushed", "{} event(s)", events.len());
        self.broadcaster.send(WatcherEvent::BufferingEnd);
        self.ensure_root().await?;
        self.broadcaster.send(WatcherEvent::CycleStart);

        let result = self.analyse_and_submit(events).await;
        self.broadcaster.send(WatcherEvent::CycleEnd);
        result?;

        if self.initial_scan.take().is_some() {
            crate::log_event!("watcher", "initial scan done");
            self.broadcaster.send(WatcherEvent::InitialScanDone);
        }
        Ok(())
    }

    async fn analyse_and_submit(&mut self, events: Vec<RawEvent>) -> Result<(), WatchError> {
        let events: Vec<RawEvent> = events.into_iter().filter(|e| !e.is_root()).collect();

        if let Some(seen) = self.initial_scan.as_mut() {
            seen.extend(
                events
                    .iter()
                    .filter(|e| e.kind.is_addition())
                    .map(|e| e.path.clone()),
            );
        }
        let events = self.prepend_offline_unlinks(events).await?;

        let candidates = self.build_candidates(events).await;
        let changes = analysis::analyse(candidates, &mut self.pending)?;
        self.persist_pending()?;
        crate::debug_event!(
            "watcher",
            "analysed",
            "{} change(s), {} pending",
            changes.len(),
            self.pending.len()
        );

        let guard = self.lock.acquire("local").await;
        let failures = self.submit(changes).await;
        let target = match self.store.last_seq().await {
            Ok(seq) => Some(seq),
            Err(e) => {
                tracing::error!("[watcher] cannot read store cursor: {e}");
                None
            }
        };
        self.broadcaster.send(WatcherEvent::SyncTarget(target));
        drop(guard);

        if failures.is_empty() {
            Ok(())
        } else {
            Err(WatchError::Submission { failures })
        }
    }

    /// Synthesize deletions for recorded paths the initial scan never saw.
    async fn prepend_offline_unlinks(
        &self,
        events: Vec<RawEvent>,
    ) -> Result<Vec<RawEvent>, WatchError> {
        let Some(seen) = self.initial_scan.as_ref() else {
            return Ok(events);
        };
        let docs = self.store.list_recursive(Path::new("")).await?;

        let mut offline: Vec<RawEvent> = docs
            .into_iter()
            .filter(|doc| !doc.trashed && !doc.path.as_os_str().is_empty())
            .filter(|doc| !seen.contains(&doc.path))
            .map(|doc| {
                let kind = if doc.is_folder() {
                    RawEventKind::UnlinkDir
                } else {
                    RawEventKind::Unlink
                };
                crate::debug_event!("watcher", "offline", "{kind} {}", doc.path.display());
                RawEvent::new(kind, doc.path.clone()).with_previous(doc)
            })
            .collect();

        if !offline.is_empty() {
            crate::log_event!("watcher", "offline deletions", "{}", offline.len());
        }
        offline.extend(events);
        Ok(offline)
    }

    /// Build candidates with bounded concurrency, keeping arrival order.
    async fn build_candidates(&self, events: Vec<RawEvent>) -> Vec<LocalChange> {
        let builder = &self.builder;
        stream::iter(events)
            .map(|event| builder.build(event))
            .buffered(self.config.checksum_concurrency.max(1))
            .filter_map(futures::future::ready)
            .collect()
            .await
    }

    fn persist_pending(&self) -> Result<(), WatchError> {
        let Some(path) = self.config.pending_file.as_ref() else {
            return Ok(());
        };
        self.pending
            .save(path)
            .map_err(|e| WatchError::PendingPersist {
                path: path.clone(),
                reason: e.to_string(),
            })
    }

    /// Submit changes one after the other, in order, collecting failures.
    async fn submit(&self, changes: Vec<LocalChange>) -> Vec<SubmissionFailure> {
        let mut failures = Vec::new();
        for change in changes {
            let path = change.path().to_path_buf();
            let label = change.to_string();
            crate::log_event!("watcher", "submit", "{label}");
            if let Err(source) = self.apply(change).await {
                tracing::error!("[watcher] {label} failed: {source:#}");
                failures.push(SubmissionFailure {
                    path,
                    change: label,
                    source,
                });
            }
        }
        failures
    }

    async fn apply(&self, change: LocalChange) -> anyhow::Result<()> {
        let sync = &self.synchronizer;
        match change {
            LocalChange::FileAddition(put) => sync.add_file(Side::Local, file_doc(put)).await,
            LocalChange::FileUpdate(put) => sync.update_file(Side::Local, file_doc(put)).await,
            LocalChange::DirAddition(put) => {
                sync.put_directory(Side::Local, folder_doc(put)).await
            }
            LocalChange::FileDeletion(d) => {
                let doc = d.previous.unwrap_or_else(|| Metadata::file(d.path, None, None));
                sync.trash_file(Side::Local, doc).await
            }
            LocalChange::DirDeletion(d) => {
                let doc = d.previous.unwrap_or_else(|| Metadata::folder(d.path, None));
                sync.trash_directory(Side::Local, doc).await
            }
            LocalChange::FileMove(m) => {
                let old = self.source_of(&m).await?;
                let mut doc = Metadata::file(
                    m.path,
                    m.stats.as_ref(),
                    m.checksum.or_else(|| old.checksum.clone()),
                );
                doc.ino = m.ino.or(doc.ino);
                sync.move_file(Side::Local, doc, old).await
            }
            LocalChange::DirMove(m) => {
                let old = self.source_of(&m).await?;
                let mut doc = Metadata::folder(m.path, m.stats.as_ref());
                doc.ino = m.ino.or(doc.ino);
                sync.move_directory(Side::Local, doc, old).await
            }
        }
    }

    /// Record a move starts from, re-read when squashing rebased it.
    async fn source_of(&self, m: &Move) -> anyhow::Result<Metadata> {
        if !m.needs_refetch {
            return Ok(m.previous.clone());
        }
        crate::debug_event!("watcher", "refetch", "{}", m.previous.path.display());
        self.store
            .get(&m.previous.path)
            .await?
            .ok_or_else(|| anyhow!("no record at {} to move", m.previous.path.display()))
    }

    async fn ensure_root(&self) -> Result<(), WatchError> {
        match tokio::fs::metadata(&self.sync_path).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            _ => {
                tracing::error!("[watcher] sync root {} is gone", self.sync_path.display());
                self.broadcaster.send(WatcherEvent::RootUnlinked);
                Err(WatchError::RootUnlinked {
                    path: self.sync_path.clone(),
                })
            }
        }
    }
}

fn file_doc(put: Put) -> Metadata {
    let mut doc = Metadata::file(put.path, put.stats.as_ref(), put.checksum);
    doc.ino = put.ino.or(doc.ino);
    doc
}

fn folder_doc(put: Put) -> Metadata {
    let mut doc = Metadata::folder(put.path, put.stats.as_ref());
    doc.ino = put.ino.or(doc.ino);
    doc
}

/// Builder for constructing a LocalWatcher.
pub struct LocalWatcherBuilder {
    sync_path: Option<PathBuf>,
    store: Option<Arc<dyn MirrorStore>>,
    synchronizer: Option<Arc<dyn Synchronizer>>,
    checksummer: Option<Arc<dyn Checksummer>>,
    lock: Option<SyncLock>,
    broadcaster: Option<Arc<NotificationBroadcaster>>,
    config: WatcherConfig,
    span: Option<tracing::Span>,
    offline_detection: bool,
}

impl LocalWatcherBuilder {
    pub fn new() -> Self {
        Self {
            sync_path: None,
            store: None,
            synchronizer: None,
            checksummer: None,
            lock: None,
            broadcaster: None,
            config: WatcherConfig::default(),
            span: None,
            offline_detection: true,
        }
    }

    /// Set the directory to watch.
    pub fn sync_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.sync_path = Some(path.into());
        self
    }

    /// Set the mirror store read during analysis.
    pub fn store(mut self, store: Arc<dyn MirrorStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the receiver of analysed changes.
    pub fn synchronizer(mut self, synchronizer: Arc<dyn Synchronizer>) -> Self {
        self.synchronizer = Some(synchronizer);
        self
    }

    /// Replace the default SHA-256 checksummer.
    pub fn checksummer(mut self, checksummer: Arc<dyn Checksummer>) -> Self {
        self.checksummer = Some(checksummer);
        self
    }

    /// Share a lock with the remote side.
    pub fn lock(mut self, lock: SyncLock) -> Self {
        self.lock = Some(lock);
        self
    }

    pub fn broadcaster(mut self, broadcaster: Arc<NotificationBroadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn config(mut self, config: WatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Span every flush cycle runs under.
    pub fn span(mut self, span: tracing::Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Whether the first cycle trashes mirror records its events never
    /// mention. Turn off when replaying a partial batch; the watcher then
    /// never reports `InitialScanDone`.
    pub fn offline_detection(mut self, enabled: bool) -> Self {
        self.offline_detection = enabled;
        self
    }

    /// Build the LocalWatcher.
    ///
    /// Loads the pending set from `pending_file` when one is configured.
    pub fn build(self) -> Result<LocalWatcher, WatchError> {
        let sync_path = self.sync_path.ok_or_else(|| WatchError::InitFailed {
            reason: "Sync path is required".to_string(),
        })?;
        let store = self.store.ok_or_else(|| WatchError::InitFailed {
            reason: "Mirror store is required".to_string(),
        })?;
        let synchronizer = self.synchronizer.ok_or_else(|| WatchError::InitFailed {
            reason: "Synchronizer is required".to_string(),
        })?;

        let pending = match self.config.pending_file.as_deref() {
            Some(path) => PendingChanges::load(path).map_err(|e| WatchError::InitFailed {
                reason: e.to_string(),
            })?,
            None => PendingChanges::new(),
        };
        if !pending.is_empty() {
            crate::log_event!("watcher", "restored", "{} pending change(s)", pending.len());
        }

        let checksummer = self
            .checksummer
            .unwrap_or_else(|| Arc::new(Sha256Checksummer::new()));
        let span = self.span.unwrap_or_else(
            || tracing::info_span!("local_watcher", root = %sync_path.display()),
        );

        Ok(LocalWatcher {
            builder: ChangeBuilder::new(sync_path.clone(), store.clone(), checksummer),
            sync_path,
            store,
            synchronizer,
            lock: self.lock.unwrap_or_default(),
            broadcaster: self.broadcaster.unwrap_or_default(),
            buffer: EventBuffer::new(self.config.flush_timeout_ms),
            pending,
            initial_scan: self.offline_detection.then(HashSet::new),
            config: self.config,
            span,
            handle: WatcherHandle::default(),
        })
    }
}

impl Default for LocalWatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::InMemoryMirror;
    use tempfile::TempDir;

    #[test]
    fn test_builder_requires_store() {
        let result = LocalWatcher::builder().sync_path("/tmp").build();
        assert!(matches!(result, Err(WatchError::InitFailed { .. })));
    }

    #[tokio::test]
    async fn test_stop_before_scan_completes() {
        let temp_dir = TempDir::new().unwrap();
        let mirror = Arc::new(InMemoryMirror::new());
        let mut watcher = LocalWatcher::builder()
            .sync_path(temp_dir.path())
            .store(mirror.clone())
            .synchronizer(mirror)
            .build()
            .unwrap();

        let (tx, rx) = mpsc::channel(8);
        tx.send(RawEvent::new(RawEventKind::AddDir, "d")).await.unwrap();
        let handle = watcher.handle();
        handle.stop(true);

        watcher.run(rx).await.unwrap();
        assert!(handle.is_stopped());
    }
}
