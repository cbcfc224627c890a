//! Process-wide count of worker invocations currently in flight.
//!
//! Purely observational: nothing in the pipeline reads the counter to make
//! decisions. It has its own mutex, separate from the listener's locks.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Counts {
    active: usize,
    peak: usize,
}

/// Shared counter of concurrently executing conversions.
///
/// Cloning yields another handle to the same count.
#[derive(Debug, Clone, Default)]
pub struct InstanceCounter {
    counts: Arc<Mutex<Counts>>,
}

impl InstanceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        let mut counts = self.guard();
        counts.active += 1;
        counts.peak = counts.peak.max(counts.active);
    }

    pub fn decrement(&self) {
        let mut counts = self.guard();
        counts.active = counts.active.saturating_sub(1);
    }

    /// Increment now and decrement when the returned guard is dropped,
    /// including when the surrounding future is cancelled.
    pub fn enter(&self) -> InstanceGuard {
        self.increment();
        InstanceGuard {
            counter: self.clone(),
        }
    }

    /// Number of invocations running right now.
    pub fn active(&self) -> usize {
        self.guard().active
    }

    /// Highest value `active` has reached since creation.
    pub fn peak(&self) -> usize {
        self.guard().peak
    }

    fn guard(&self) -> MutexGuard<'_, Counts> {
        self.counts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Decrements its [`InstanceCounter`] on drop.
#[derive(Debug)]
pub struct InstanceGuard {
    counter: InstanceCounter,
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        self.counter.decrement();
    }
}
