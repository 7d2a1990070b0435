//! Wall clock corrected by the most recent time sync.
//!
//! The probe cannot set the host clock without privileges, so a successful
//! SNTP exchange records an offset instead and timestamps are taken through
//! this clock.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use time::OffsetDateTime;

#[derive(Clone, Default)]
pub struct SyncedClock {
    offset_s: Arc<AtomicI64>,
    synced: Arc<AtomicBool>,
}

impl SyncedClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current unix time in seconds, offset-corrected.
    pub fn now_unix(&self) -> i64 {
        system_unix() + self.offset_s.load(Ordering::Relaxed)
    }

    /// Align this clock with a reference reading taken just now.
    /// Returns the new offset.
    pub fn align_to(&self, reference_unix: i64) -> i64 {
        let offset = reference_unix - system_unix();
        self.offset_s.store(offset, Ordering::Relaxed);
        self.synced.store(true, Ordering::Relaxed);
        offset
    }

    #[cfg(test)]
    pub fn offset(&self) -> i64 {
        self.offset_s.load(Ordering::Relaxed)
    }

    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Relaxed)
    }
}

pub fn system_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

// ===========================================================================
// Tests
// ===========================================================================
