//! Error types for the local watcher.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::analysis::AnalysisError;
use crate::mirror::StoreError;

/// Errors from watcher operations.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Failed to initialize watcher: {reason}")]
    InitFailed { reason: String },

    #[error("Sync root {path} was removed")]
    RootUnlinked { path: PathBuf },

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error("Mirror store error: {0}")]
    Store(#[from] StoreError),

    #[error("{} change(s) could not be submitted: {}", .failures.len(), summary(.failures))]
    Submission { failures: Vec<SubmissionFailure> },

    #[error("Failed to persist pending changes to {path}: {reason}")]
    PendingPersist { path: PathBuf, reason: String },
}

/// One change the synchronization layer refused.
#[derive(Debug)]
pub struct SubmissionFailure {
    pub path: PathBuf,
    /// Display form of the refused change.
    pub change: String,
    pub source: anyhow::Error,
}

impl fmt::Display for SubmissionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:#}", self.change, self.source)
    }
}

fn summary(failures: &[SubmissionFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
