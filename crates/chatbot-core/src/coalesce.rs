//! Coalescing of high-frequency text deltas.
//!
//! Deltas are buffered and released at most once per interval so that a
//! renderer re-reading the store is not woken for every token. Nothing is
//! dropped: the buffer only ever grows until it is flushed or reset.

use std::time::Duration;

use tokio::time::Instant;

/// Roughly one animation frame.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Debug)]
pub struct Coalescer {
    interval: Duration,
    pending: String,
    /// Armed by the first push after a flush.
    deadline: Option<Instant>,
}

impl Coalescer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            pending: String::new(),
            deadline: None,
        }
    }

    /// Buffer `delta`. Returns the whole buffer when it is due.
    ///
    /// With a zero interval every push is due immediately.
    pub fn push(&mut self, delta: &str, now: Instant) -> Option<String> {
        self.pending.push_str(delta);
        if self.interval.is_zero() {
            return self.flush();
        }
        let deadline = *self.deadline.get_or_insert(now + self.interval);
        if now >= deadline { self.flush() } else { None }
    }

    /// Flush if the armed deadline has passed.
    pub fn take_due(&mut self, now: Instant) -> Option<String> {
        match self.deadline {
            Some(deadline) if now >= deadline => self.flush(),
            _ => None,
        }
    }

    /// Drain the buffer and disarm the timer. An empty buffer yields `None`.
    pub fn flush(&mut self) -> Option<String> {
        self.deadline = None;
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }

    /// Drop buffered text and disarm the timer.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for Coalescer {
    fn default() -> Self {
        Self::new(DEFAULT_FLUSH_INTERVAL)
    }
}
