//! Wall clock collaborator
//!
//! The wall clock holds local time as seconds since the Unix epoch, with
//! the timezone offset already applied by whoever set it.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;

use crate::CalendarTime;

/// Settable source of local wall time
pub trait WallClock: Send + Sync {
    fn set_epoch_seconds(&self, secs: i64);

    fn epoch_seconds(&self) -> i64;

    fn calendar(&self) -> CalendarTime {
        CalendarTime::from_epoch_seconds(self.epoch_seconds())
    }
}

/// Host clock adjusted by the last value set.
///
/// The host clock itself is never changed; setting records an offset.
#[derive(Debug, Default)]
pub struct SystemWallClock {
    offset: Mutex<i64>,
}

impl SystemWallClock {
    pub fn new() -> Self {
        Self::default()
    }

    fn host_seconds() -> i64 {
        Utc::now().timestamp()
    }
}

impl WallClock for SystemWallClock {
    fn set_epoch_seconds(&self, secs: i64) {
        *self.offset.lock() = secs - Self::host_seconds();
    }

    fn epoch_seconds(&self) -> i64 {
        Self::host_seconds() + *self.offset.lock()
    }
}

/// Wall clock that only moves when told to. Clones share the value.
#[derive(Clone, Debug, Default)]
pub struct FixedWallClock {
    secs: Arc<AtomicI64>,
}

impl FixedWallClock {
    pub fn new(secs: i64) -> Self {
        FixedWallClock {
            secs: Arc::new(AtomicI64::new(secs)),
        }
    }

    pub fn advance(&self, secs: i64) {
        self.secs.fetch_add(secs, Ordering::SeqCst);
    }
}

impl WallClock for FixedWallClock {
    fn set_epoch_seconds(&self, secs: i64) {
        self.secs.store(secs, Ordering::SeqCst);
    }

    fn epoch_seconds(&self) -> i64 {
        self.secs.load(Ordering::SeqCst)
    }
}
