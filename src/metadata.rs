//! Persisted metadata records of the local mirror.
//!
//! A [`Metadata`] is the last known state of one path as recorded by the
//! mirror store. The analysis engine only reads these records; writes go
//! through the synchronization layer.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::analysis::event::Stats;

/// Kind of document stored in the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    File,
    Folder,
}

/// Last synchronized record for a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Path relative to the sync root.
    pub path: PathBuf,

    #[serde(rename = "docType")]
    pub doc_type: DocType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ino: Option<u64>,

    /// Content checksum (files only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<SystemTime>,

    #[serde(default)]
    pub trashed: bool,
}

impl Metadata {
    /// Build a file record from observed stats and checksum.
    pub fn file(path: impl Into<PathBuf>, stats: Option<&Stats>, checksum: Option<String>) -> Self {
        Self {
            path: path.into(),
            doc_type: DocType::File,
            ino: stats.map(|s| s.ino),
            checksum,
            size: stats.map(|s| s.size),
            updated_at: stats.and_then(Stats::updated_at),
            trashed: false,
        }
    }

    /// Build a folder record from observed stats.
    pub fn folder(path: impl Into<PathBuf>, stats: Option<&Stats>) -> Self {
        Self {
            path: path.into(),
            doc_type: DocType::Folder,
            ino: stats.map(|s| s.ino),
            checksum: None,
            size: None,
            updated_at: stats.and_then(Stats::updated_at),
            trashed: false,
        }
    }

    pub fn is_file(&self) -> bool {
        self.doc_type == DocType::File
    }

    pub fn is_folder(&self) -> bool {
        self.doc_type == DocType::Folder
    }

    /// Copy of this record relocated to `path`.
    pub fn moved_to(&self, path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            ..self.clone()
        }
    }
}
