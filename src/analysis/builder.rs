//! Turns raw notifications into candidate changes.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use super::change::{Deletion, LocalChange, Put};
use super::checksum::Checksummer;
use super::event::{RawEvent, RawEventKind};
use crate::mirror::MirrorStore;

/// Builds one candidate [`LocalChange`] per raw event.
///
/// Looks up prior metadata for deletions, fixes the watcher's known
/// file/folder mix-ups, computes checksums for file content and verifies that
/// added directories still exist. I/O problems only ever drop the event.
#[derive(Clone)]
pub struct ChangeBuilder {
    sync_path: PathBuf,
    store: Arc<dyn MirrorStore>,
    checksummer: Arc<dyn Checksummer>,
}

impl ChangeBuilder {
    pub fn new(
        sync_path: PathBuf,
        store: Arc<dyn MirrorStore>,
        checksummer: Arc<dyn Checksummer>,
    ) -> Self {
        Self {
            sync_path,
            store,
            checksummer,
        }
    }

    pub async fn build(&self, event: RawEvent) -> Option<LocalChange> {
        let event = reclassify(self.with_previous(event).await);
        let abspath = self.sync_path.join(&event.path);

        match event.kind {
            RawEventKind::Add | RawEventKind::Change => {
                let (checksum, wip) = match self.checksummer.checksum(&abspath).await {
                    Ok(sum) => (Some(sum), false),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        crate::debug_event!(
                            "builder",
                            "file does not exist anymore",
                            "{}",
                            event.path.display()
                        );
                        (None, true)
                    }
                    Err(e) => {
                        tracing::error!(
                            "[builder] could not compute checksum of {}: {e}",
                            event.path.display()
                        );
                        return None;
                    }
                };
                let put = Put {
                    ino: event.ino(),
                    path: event.path,
                    stats: event.stats,
                    checksum,
                    wip,
                };
                Some(match event.kind {
                    RawEventKind::Add => LocalChange::FileAddition(put),
                    _ => LocalChange::FileUpdate(put),
                })
            }

            RawEventKind::AddDir => match tokio::fs::metadata(&abspath).await {
                Ok(meta) if meta.is_dir() => Some(LocalChange::DirAddition(Put {
                    ino: event.ino(),
                    path: event.path,
                    stats: event.stats,
                    checksum: None,
                    wip: false,
                })),
                Ok(_) => {
                    crate::debug_event!(
                        "builder",
                        "not a directory anymore",
                        "{}",
                        event.path.display()
                    );
                    None
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    crate::debug_event!(
                        "builder",
                        "dir does not exist anymore",
                        "{}",
                        event.path.display()
                    );
                    None
                }
                Err(e) => {
                    tracing::error!("[builder] cannot stat {}: {e}", event.path.display());
                    None
                }
            },

            RawEventKind::Unlink | RawEventKind::UnlinkDir => {
                let deletion = Deletion {
                    ino: event.ino(),
                    path: event.path,
                    previous: event.previous,
                    wip: false,
                };
                Some(match event.kind {
                    RawEventKind::Unlink => LocalChange::FileDeletion(deletion),
                    _ => LocalChange::DirDeletion(deletion),
                })
            }
        }
    }

    /// Attach the mirror record of a deleted path, unless the event has one.
    async fn with_previous(&self, event: RawEvent) -> RawEvent {
        if event.previous.is_some() || !event.kind.is_deletion() {
            return event;
        }
        match self.store.get(&event.path).await {
            Ok(Some(doc)) => event.with_previous(doc),
            Ok(None) => event,
            Err(e) => {
                tracing::error!(
                    "[builder] cannot read metadata of {}: {e}",
                    event.path.display()
                );
                event
            }
        }
    }
}

/// The watcher sometimes reports a file deletion as a directory one and the
/// other way around; the prior record tells which is right.
fn reclassify(event: RawEvent) -> RawEvent {
    let Some(previous) = event.previous.as_ref() else {
        return event;
    };
    match event.kind {
        RawEventKind::UnlinkDir if previous.is_file() => event.reclassified(RawEventKind::Unlink),
        RawEventKind::Unlink if previous.is_folder() => event.reclassified(RawEventKind::UnlinkDir),
        _ => event,
    }
}
