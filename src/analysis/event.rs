//! Raw filesystem notifications as delivered by the event source.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use super::error::AnalysisError;
use crate::metadata::Metadata;

/// Kind of a raw notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawEventKind {
    Add,
    AddDir,
    Change,
    Unlink,
    UnlinkDir,
}

impl RawEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RawEventKind::Add => "add",
            RawEventKind::AddDir => "addDir",
            RawEventKind::Change => "change",
            RawEventKind::Unlink => "unlink",
            RawEventKind::UnlinkDir => "unlinkDir",
        }
    }

    pub fn is_addition(&self) -> bool {
        matches!(self, RawEventKind::Add | RawEventKind::AddDir)
    }

    pub fn is_deletion(&self) -> bool {
        matches!(self, RawEventKind::Unlink | RawEventKind::UnlinkDir)
    }
}

impl fmt::Display for RawEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RawEventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(RawEventKind::Add),
            "addDir" => Ok(RawEventKind::AddDir),
            "change" => Ok(RawEventKind::Change),
            "unlink" => Ok(RawEventKind::Unlink),
            "unlinkDir" => Ok(RawEventKind::UnlinkDir),
            other => Err(other.to_string()),
        }
    }
}

/// Filesystem stats captured with a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub ino: u64,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime: Option<SystemTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctime: Option<SystemTime>,
}

impl Stats {
    pub fn new(ino: u64, size: u64) -> Self {
        Self {
            ino,
            size,
            mtime: None,
            ctime: None,
        }
    }

    /// Latest of mtime and ctime.
    pub fn updated_at(&self) -> Option<SystemTime> {
        match (self.mtime, self.ctime) {
            (Some(m), Some(c)) => Some(m.max(c)),
            (m, c) => m.or(c),
        }
    }
}

/// One raw notification. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireEvent", into = "WireEvent")]
pub struct RawEvent {
    pub kind: RawEventKind,
    /// Path relative to the sync root; empty for the root itself.
    pub path: PathBuf,
    pub stats: Option<Stats>,
    /// Prior mirror record, when the source already knows it.
    pub previous: Option<Metadata>,
}

impl RawEvent {
    pub fn new(kind: RawEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            stats: None,
            previous: None,
        }
    }

    pub fn with_stats(mut self, stats: Stats) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn with_previous(mut self, previous: Metadata) -> Self {
        self.previous = Some(previous);
        self
    }

    /// Same event under another kind. Used when the source misclassified it.
    pub fn reclassified(&self, kind: RawEventKind) -> Self {
        Self {
            kind,
            ..self.clone()
        }
    }

    /// Inode from stats, falling back to the prior record.
    pub fn ino(&self) -> Option<u64> {
        self.stats
            .as_ref()
            .map(|s| s.ino)
            .or_else(|| self.previous.as_ref().and_then(|p| p.ino))
    }

    pub fn is_root(&self) -> bool {
        self.path.as_os_str().is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decode a recorded batch of events.
    ///
    /// An unrecognized event type aborts the whole batch.
    pub fn decode_batch(json: &str) -> Result<Vec<RawEvent>, AnalysisError> {
        let wire: Vec<WireEvent> =
            serde_json::from_str(json).map_err(|e| AnalysisError::Decode {
                reason: e.to_string(),
            })?;
        wire.into_iter().map(RawEvent::try_from).collect()
    }
}

/// Serialized form of a [`RawEvent`], with the kind as a plain string.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireEvent {
    #[serde(rename = "type")]
    kind: String,
    path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stats: Option<Stats>,
    #[serde(default, rename = "old", skip_serializing_if = "Option::is_none")]
    previous: Option<Metadata>,
}

impl TryFrom<WireEvent> for RawEvent {
    type Error = AnalysisError;

    fn try_from(wire: WireEvent) -> Result<Self, Self::Error> {
        let kind = wire
            .kind
            .parse::<RawEventKind>()
            .map_err(|kind| AnalysisError::UnknownEventKind {
                kind,
                path: wire.path.clone(),
            })?;
        Ok(RawEvent {
            kind,
            path: wire.path,
            stats: wire.stats,
            previous: wire.previous,
        })
    }
}

impl From<RawEvent> for WireEvent {
    fn from(event: RawEvent) -> Self {
        WireEvent {
            kind: event.kind.as_str().to_string(),
            path: event.path,
            stats: event.stats,
            previous: event.previous,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::DocType;

    #[test]
    fn test_decode_batch() {
        let json = r#"[
            {"type": "addDir", "path": "dst", "stats": {"ino": 4, "size": 4096}},
            {"type": "unlink", "path": "src/file", "old": {"path": "src/file", "docType": "file", "ino": 2}}
        ]"#;

        let events = RawEvent::decode_batch(json).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, RawEventKind::AddDir);
        assert_eq!(events[0].ino(), Some(4));
        assert_eq!(events[1].kind, RawEventKind::Unlink);
        assert_eq!(events[1].ino(), Some(2));
        assert_eq!(
            events[1].previous.as_ref().map(|p| p.doc_type),
            Some(DocType::File)
        );
    }

    #[test]
    fn test_unknown_kind_aborts_batch() {
        let json = r#"[
            {"type": "add", "path": "a"},
            {"type": "rename", "path": "b"}
        ]"#;

        match RawEvent::decode_batch(json) {
            Err(AnalysisError::UnknownEventKind { kind, path }) => {
                assert_eq!(kind, "rename");
                assert_eq!(path, PathBuf::from("b"));
            }
            other => panic!("expected unknown kind error, got {other:?}"),
        }
    }

    #[test]
    fn test_reclassified_keeps_payload() {
        let event = RawEvent::new(RawEventKind::UnlinkDir, "foo").with_stats(Stats::new(9, 0));
        let fixed = event.reclassified(RawEventKind::Unlink);

        assert_eq!(fixed.kind, RawEventKind::Unlink);
        assert_eq!(fixed.path, event.path);
        assert_eq!(fixed.ino(), Some(9));
        assert_eq!(event.kind, RawEventKind::UnlinkDir);
    }

    #[test]
    fn test_root_event() {
        assert!(RawEvent::new(RawEventKind::AddDir, "").is_root());
        assert!(!RawEvent::new(RawEventKind::AddDir, "a").is_root());
    }
}
