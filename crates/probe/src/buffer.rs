//! Bounded measurement buffer shared by the sampler and the orchestrator.
//!
//! Overflow evicts the oldest entry (queue discipline) while reads take the
//! newest entry (stack discipline). After an outage the freshest reading is
//! published first, then the backlog newest-to-oldest; anything pushed off the
//! head in the meantime is gone.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::measurement::Measurement;

/// Number of measurements retained while the broker is unreachable.
pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Clone)]
pub struct MeasurementBuffer {
    inner: Arc<Mutex<VecDeque<Measurement>>>,
    capacity: usize,
}

impl MeasurementBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::new())),
            capacity,
        }
    }

    /// Append at the tail, dropping the head if that takes us over capacity.
    pub fn push(&self, m: Measurement) {
        let mut q = self.lock();
        q.push_back(m);
        if q.len() > self.capacity {
            q.pop_front();
        }
    }

    /// Remove and return the most recently pushed measurement.
    pub fn take_latest(&self) -> Option<Measurement> {
        self.lock().pop_back()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // Both sides only ever hold the lock for a single push/pop, so a panic
    // while holding it cannot leave the queue half-modified.
    fn lock(&self) -> MutexGuard<'_, VecDeque<Measurement>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn snapshot(&self) -> Vec<Measurement> {
        self.lock().iter().copied().collect()
    }
}

impl Default for MeasurementBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
