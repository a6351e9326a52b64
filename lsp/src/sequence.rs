//! Request id generation.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic request id source shared by every caller of a session.
///
/// Never reset while the session lives, so an id is never reused even across
/// an explicit restart.
#[derive(Debug)]
pub struct Sequence {
    next: AtomicU64,
}

impl Sequence {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// A fresh id, strictly greater than every id returned before it.
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new()
    }
}
