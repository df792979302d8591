//! Batches raw events until the filesystem goes quiet.
//!
//! A burst of notifications (a copy, an unpacked archive, an IDE saving
//! several files) should be analysed as one cycle, so moves can be paired
//! across it. The buffer only releases its batch once no event arrived for
//! the configured timeout.

use std::time::{Duration, Instant};

use crate::analysis::RawEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferMode {
    /// Accumulate without ever releasing. Used during the initial scan and
    /// after a stop request.
    Idle,
    /// Release the batch once it has been quiet for the timeout.
    Timeout,
}

/// Raw event accumulator with a quiescence timeout.
#[derive(Debug)]
pub struct EventBuffer {
    events: Vec<RawEvent>,
    mode: BufferMode,
    /// Start of the current quiet period.
    last_activity: Instant,
    timeout: Duration,
}

impl EventBuffer {
    /// Create an idle buffer with the given timeout in milliseconds.
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            events: Vec::new(),
            mode: BufferMode::Idle,
            last_activity: Instant::now(),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    /// Record an event and restart the quiet period.
    ///
    /// Returns `true` when the event opens a new batch.
    pub fn push(&mut self, event: RawEvent) -> bool {
        let opens_batch = self.events.is_empty();
        self.events.push(event);
        self.last_activity = Instant::now();
        opens_batch
    }

    pub fn switch_mode(&mut self, mode: BufferMode) {
        if mode == self.mode {
            return;
        }
        crate::debug_event!("buffer", "mode", "{:?} -> {mode:?}", self.mode);
        self.mode = mode;
        if mode == BufferMode::Timeout {
            self.last_activity = Instant::now();
        }
    }

    pub fn mode(&self) -> BufferMode {
        self.mode
    }

    /// Take the batch if it has been quiet long enough.
    pub fn take_if_quiet(&mut self) -> Option<Vec<RawEvent>> {
        if self.mode != BufferMode::Timeout || self.events.is_empty() {
            return None;
        }
        if self.last_activity.elapsed() < self.timeout {
            return None;
        }
        Some(self.take())
    }

    /// Take the batch regardless of mode and timing.
    pub fn take(&mut self) -> Vec<RawEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
