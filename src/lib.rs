//! Local change analysis for a bidirectional file synchronization client.
//!
//! Raw filesystem notifications for one sync root are turned into an ordered
//! list of semantic changes (additions, updates, deletions, moves) and handed
//! to a synchronization layer.

pub mod logging;

pub mod analysis;
pub mod config;
pub mod metadata;
pub mod mirror;
pub mod watcher;

pub use analysis::{AnalysisError, LocalChange, PendingChanges, RawEvent, RawEventKind, analyse};
pub use config::Settings;
pub use metadata::{DocType, Metadata};
pub use mirror::{InMemoryMirror, MirrorStore};
pub use watcher::{LocalWatcher, WatchError, WatcherEvent};
