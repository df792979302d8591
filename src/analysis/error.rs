//! Error types for change analysis.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors that abort an analysis cycle.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Unknown event type '{kind}' for {path}")]
    UnknownEventKind { kind: String, path: PathBuf },

    #[error(
        "Cannot have both a move and a {event} event for inode {ino} at {path} \
         (existing change: {existing})"
    )]
    IncompatibleChanges {
        event: String,
        path: PathBuf,
        ino: u64,
        existing: String,
    },

    #[error("Failed to decode events: {reason}")]
    Decode { reason: String },
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;
