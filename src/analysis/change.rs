//! Typed local changes produced by the analysis.
//!
//! A [`LocalChange`] is the semantic description of what happened to one
//! path during a flush cycle. Changes are built from raw events by the
//! [`ChangeBuilder`](super::builder::ChangeBuilder), merged by the
//! correlator, and finally submitted to the synchronization layer.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::event::Stats;
use crate::metadata::Metadata;

/// A path gaining content: addition or update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Put {
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ino: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<Stats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default)]
    pub wip: bool,
}

/// A path that disappeared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deletion {
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ino: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<Metadata>,
    #[serde(default)]
    pub wip: bool,
}

/// A file or directory relocated from `previous.path` to `path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Move {
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ino: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<Stats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Record at the source path.
    pub previous: Metadata,
    /// Set when `previous.path` was rewritten and the record must be re-read.
    #[serde(default)]
    pub needs_refetch: bool,
    #[serde(default)]
    pub wip: bool,
}

impl Move {
    /// Build a move out of a deletion's record and the creation that follows.
    pub fn between(previous: Metadata, put: Put) -> Self {
        Self {
            path: put.path,
            ino: put.ino.or(previous.ino),
            stats: put.stats,
            checksum: put.checksum,
            previous,
            needs_refetch: false,
            wip: put.wip,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LocalChange {
    FileAddition(Put),
    FileUpdate(Put),
    FileDeletion(Deletion),
    DirAddition(Put),
    DirDeletion(Deletion),
    FileMove(Move),
    DirMove(Move),
}

impl LocalChange {
    pub fn kind_name(&self) -> &'static str {
        match self {
            LocalChange::FileAddition(_) => "FileAddition",
            LocalChange::FileUpdate(_) => "FileUpdate",
            LocalChange::FileDeletion(_) => "FileDeletion",
            LocalChange::DirAddition(_) => "DirAddition",
            LocalChange::DirDeletion(_) => "DirDeletion",
            LocalChange::FileMove(_) => "FileMove",
            LocalChange::DirMove(_) => "DirMove",
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            LocalChange::FileAddition(p)
            | LocalChange::FileUpdate(p)
            | LocalChange::DirAddition(p) => &p.path,
            LocalChange::FileDeletion(d) | LocalChange::DirDeletion(d) => &d.path,
            LocalChange::FileMove(m) | LocalChange::DirMove(m) => &m.path,
        }
    }

    pub fn ino(&self) -> Option<u64> {
        match self {
            LocalChange::FileAddition(p)
            | LocalChange::FileUpdate(p)
            | LocalChange::DirAddition(p) => p.ino,
            LocalChange::FileDeletion(d) | LocalChange::DirDeletion(d) => d.ino,
            LocalChange::FileMove(m) | LocalChange::DirMove(m) => m.ino,
        }
    }

    pub fn is_wip(&self) -> bool {
        match self {
            LocalChange::FileAddition(p)
            | LocalChange::FileUpdate(p)
            | LocalChange::DirAddition(p) => p.wip,
            LocalChange::FileDeletion(d) | LocalChange::DirDeletion(d) => d.wip,
            LocalChange::FileMove(m) | LocalChange::DirMove(m) => m.wip,
        }
    }

    pub fn set_wip(&mut self, wip: bool) {
        match self {
            LocalChange::FileAddition(p)
            | LocalChange::FileUpdate(p)
            | LocalChange::DirAddition(p) => p.wip = wip,
            LocalChange::FileDeletion(d) | LocalChange::DirDeletion(d) => d.wip = wip,
            LocalChange::FileMove(m) | LocalChange::DirMove(m) => m.wip = wip,
        }
    }

    /// Path this change makes exist, if any.
    pub fn added_path(&self) -> Option<&Path> {
        match self {
            LocalChange::FileDeletion(_) | LocalChange::DirDeletion(_) => None,
            _ => Some(self.path()),
        }
    }

    /// Path this change clears, if any.
    pub fn vacated_path(&self) -> Option<&Path> {
        match self {
            LocalChange::FileDeletion(d) | LocalChange::DirDeletion(d) => Some(&d.path),
            LocalChange::FileMove(m) | LocalChange::DirMove(m) => Some(&m.previous.path),
            _ => None,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(
            self,
            LocalChange::DirAddition(_) | LocalChange::DirDeletion(_) | LocalChange::DirMove(_)
        )
    }

    pub fn as_move(&self) -> Option<&Move> {
        match self {
            LocalChange::FileMove(m) | LocalChange::DirMove(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_move_mut(&mut self) -> Option<&mut Move> {
        match self {
            LocalChange::FileMove(m) | LocalChange::DirMove(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_move(&self) -> bool {
        self.as_move().is_some()
    }
}

impl fmt::Display for LocalChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_move() {
            Some(m) => write!(
                f,
                "{} {} -> {}",
                self.kind_name(),
                m.previous.path.display(),
                m.path.display()
            ),
            None => write!(f, "{} {}", self.kind_name(), self.path().display()),
        }?;
        if self.is_wip() {
            f.write_str(" (wip)")?;
        }
        Ok(())
    }
}

/// `child` nests strictly under `parent`.
pub fn is_child_of(parent: &Path, child: &Path) -> bool {
    child != parent && child.starts_with(parent)
}
