//! Local watcher for one sync root.
//!
//! Raw filesystem notifications are buffered until quiet, analysed into an
//! ordered list of changes, and submitted to the synchronization layer under
//! a lock shared with the remote side.
//!
//! # Architecture
//!
//! ```text
//! mpsc::Receiver<RawEvent>
//!         |
//!    EventBuffer (Idle until the initial scan completes, then Timeout)
//!         |
//!    LocalWatcher::flush
//!      - offline deletions (first cycle)
//!      - ChangeBuilder, bounded fan-out
//!      - analysis::analyse
//!      - SyncLock + Synchronizer, one change at a time
//!         |
//!    NotificationBroadcaster -> WatcherEvent subscribers
//! ```

mod buffer;
mod error;
mod local;
mod notifications;
mod sync;

pub use buffer::{BufferMode, EventBuffer};
pub use error::{SubmissionFailure, WatchError};
pub use local::{LocalWatcher, LocalWatcherBuilder, WatcherHandle};
pub use notifications::{NotificationBroadcaster, WatcherEvent};
pub use sync::{Side, SyncLock, SyncLockGuard, Synchronizer};
