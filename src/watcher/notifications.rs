//! Signals emitted by the watcher for external consumers.
//!
//! A broadcast channel, so any number of observers (a UI, the remote side,
//! tests) can follow the watcher's progress without the watcher knowing them.

use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherEvent {
    /// First raw event of a new batch arrived.
    BufferingStart,
    /// The batch is closed and handed to analysis.
    BufferingEnd,
    CycleStart,
    CycleEnd,
    /// Store cursor once the cycle's changes were submitted.
    SyncTarget(Option<u64>),
    RootUnlinked,
    /// The first cycle after start-up completed.
    InitialScanDone,
}

/// Fans watcher events out to every subscriber.
#[derive(Clone)]
pub struct NotificationBroadcaster {
    sender: broadcast::Sender<WatcherEvent>,
}

impl NotificationBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn send(&self, event: WatcherEvent) {
        match self.sender.send(event.clone()) {
            Ok(count) => {
                crate::debug_event!("broadcast", "sent", "{event:?} to {count} subscribers");
            }
            Err(_) => {
                // No receivers, this is fine
                crate::debug_event!("broadcast", "dropped", "no subscribers for {event:?}");
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WatcherEvent> {
        self.sender.subscribe()
    }
}

impl Default for NotificationBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}
