//! Monotonic id sources.
//!
//! Edgebound falls back to a local id when no id service is online, and
//! servicebound issues ids to services that did not ask for one. Both take
//! an `Arc<dyn IdSource>` so tests can substitute [`SequenceIdSource`].

use std::sync::atomic::{AtomicU64, Ordering};

mod sealed {
    pub trait Sealed {}
}

/// Process-local generator of strictly increasing ids
pub trait IdSource: sealed::Sealed + Send + Sync + std::fmt::Debug {
    /// Next id, strictly greater than every id returned before
    fn next(&self) -> u64;
}

/// Time-seeded monotonic source.
///
/// Ids start at the current unix time in microseconds so that a restarted
/// process does not reissue ids from its previous life, and then advance by
/// at least one per call.
#[derive(Debug, Default)]
pub struct MonotonicIdSource {
    last: AtomicU64,
}

impl MonotonicIdSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl sealed::Sealed for MonotonicIdSource {}

impl IdSource for MonotonicIdSource {
    fn next(&self) -> u64 {
        let now = chrono::Utc::now().timestamp_micros().max(1) as u64;
        let mut last = self.last.load(Ordering::Acquire);
        loop {
            let candidate = now.max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return candidate,
                Err(actual) => last = actual,
            }
        }
    }
}

/// Deterministic source counting up from a fixed start
#[derive(Debug)]
pub struct SequenceIdSource {
    next: AtomicU64,
}

impl SequenceIdSource {
    /// First call returns `start`
    pub fn starting_at(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }
}

impl sealed::Sealed for SequenceIdSource {}

impl IdSource for SequenceIdSource {
    fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}
