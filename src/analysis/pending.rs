//! Changes deferred to the next cycle because they are still in progress.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::change::LocalChange;
use super::error::{AnalysisError, AnalysisResult};

/// Wip changes carried over from one cycle to the next.
///
/// Owned by the watcher and consumed at the start of the next correlation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PendingChanges {
    changes: Vec<LocalChange>,
}

impl PendingChanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LocalChange> {
        self.changes.iter()
    }

    /// Empty the set, handing its changes to the caller.
    pub fn take(&mut self) -> Vec<LocalChange> {
        std::mem::take(&mut self.changes)
    }

    /// Move the leading wip run of `ordered` here and return the rest.
    pub fn split_off_wip(&mut self, ordered: Vec<LocalChange>) -> Vec<LocalChange> {
        let wip_run = ordered.iter().take_while(|c| c.is_wip()).count();
        let mut ordered = ordered.into_iter();
        for change in ordered.by_ref().take(wip_run) {
            crate::debug_event!("pending", "incomplete change", "{change}");
            self.changes.push(change);
        }
        let ready: Vec<LocalChange> = ordered.collect();
        tracing::debug!(
            "[pending] {} change(s) ready, {} pending",
            ready.len(),
            self.changes.len()
        );
        ready
    }

    /// Load a set saved by [`save`](Self::save). A missing file is an empty set.
    pub fn load(path: &Path) -> AnalysisResult<Self> {
        let json = match std::fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => {
                return Err(AnalysisError::Decode {
                    reason: format!("cannot read {}: {e}", path.display()),
                });
            }
        };
        serde_json::from_str(&json).map_err(|e| AnalysisError::Decode {
            reason: format!("invalid pending changes in {}: {e}", path.display()),
        })
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

impl From<Vec<LocalChange>> for PendingChanges {
    fn from(changes: Vec<LocalChange>) -> Self {
        Self { changes }
    }
}
