//! In-flight counter for concurrency assertions.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Counters {
    current: AtomicUsize,
    max: AtomicUsize,
    total: AtomicUsize,
}

/// Tracks current and peak concurrency. Clones share counters.
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyProbe {
    counters: Arc<Counters>,
}

/// Marks one task as in flight until dropped.
#[derive(Debug)]
pub struct ProbeGuard {
    counters: Arc<Counters>,
}

impl ConcurrencyProbe {
    /// Creates a probe with zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enters the measured section.
    #[must_use]
    pub fn enter(&self) -> ProbeGuard {
        let now = self.counters.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max.fetch_max(now, Ordering::SeqCst);
        self.counters.total.fetch_add(1, Ordering::SeqCst);
        ProbeGuard {
            counters: self.counters.clone(),
        }
    }

    /// Tasks in flight right now.
    #[must_use]
    pub fn current(&self) -> usize {
        self.counters.current.load(Ordering::SeqCst)
    }

    /// Peak number of tasks in flight.
    #[must_use]
    pub fn max(&self) -> usize {
        self.counters.max.load(Ordering::SeqCst)
    }

    /// Number of times the section was entered.
    #[must_use]
    pub fn total(&self) -> usize {
        self.counters.total.load(Ordering::SeqCst)
    }
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        self.counters.current.fetch_sub(1, Ordering::SeqCst);
    }
}
