//! Time primitives for the device spine
//!
//! The device measures time with a 32-bit millisecond counter that wraps
//! roughly every 49.7 days. All comparisons go through wrapping
//! subtraction; an unsigned difference larger than half the counter range
//! is read as "in the past".

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Half of the counter range. Differences above this are negative.
pub const HALF_RANGE: u32 = 0x7FFF_FFFF;

/// Monotonic instant - milliseconds since an arbitrary epoch, wrapping
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Millis(pub u32);

impl Millis {
    pub const ZERO: Millis = Millis(0);
    pub const MAX: Millis = Millis(u32::MAX);

    #[inline]
    pub fn new(ms: u32) -> Self {
        Millis(ms)
    }

    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Instant `ms` later, wrapping past the counter maximum
    #[inline]
    pub fn wrapping_add(self, ms: u32) -> Self {
        Millis(self.0.wrapping_add(ms))
    }

    /// Milliseconds elapsed since `earlier`, assuming less than one full wrap
    #[inline]
    pub fn elapsed_since(self, earlier: Millis) -> u32 {
        self.0.wrapping_sub(earlier.0)
    }

    /// Has at least `interval` passed since `earlier`?
    #[inline]
    pub fn has_elapsed(self, earlier: Millis, interval: u32) -> bool {
        self.elapsed_since(earlier) >= interval
    }

    /// Time left until `deadline`, or `None` once it has passed.
    ///
    /// `deadline - self` is computed with wrapping subtraction. Zero or a
    /// value above [`HALF_RANGE`] means the deadline is now or behind us.
    #[inline]
    pub fn remaining_until(self, deadline: Millis) -> Option<u32> {
        let remaining = deadline.0.wrapping_sub(self.0);
        if remaining == 0 || remaining > HALF_RANGE {
            None
        } else {
            Some(remaining)
        }
    }

    #[inline]
    pub fn to_le_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    #[inline]
    pub fn from_le_bytes(bytes: [u8; 4]) -> Self {
        Millis(u32::from_le_bytes(bytes))
    }
}

impl std::fmt::Debug for Millis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t({}ms)", self.0)
    }
}

/// Source of monotonic time for every service
///
/// `delay` is the only blocking primitive in the core; the time
/// synchronizer uses it while polling for a reply.
pub trait MonotonicClock: Send + Sync {
    /// Current counter value
    fn now(&self) -> Millis;

    /// Block the caller for `ms` milliseconds
    fn delay(&self, ms: u32);
}

/// Wall-time backed clock
pub struct SystemClock {
    /// Process-local reference point
    reference: Instant,
    /// Counter value at `reference`
    origin: Millis,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::with_origin(Millis::ZERO)
    }

    /// Start counting from `origin` instead of zero
    pub fn with_origin(origin: Millis) -> Self {
        SystemClock {
            reference: Instant::now(),
            origin,
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock for SystemClock {
    fn now(&self) -> Millis {
        // Truncation to 32 bits is the wrap.
        let elapsed = self.reference.elapsed().as_millis() as u32;
        self.origin.wrapping_add(elapsed)
    }

    fn delay(&self, ms: u32) {
        std::thread::sleep(Duration::from_millis(ms as u64));
    }
}

/// Hand-driven clock for deterministic tests
///
/// Clones share the same counter. `delay` advances the counter instead of
/// sleeping.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    value: Arc<AtomicU32>,
}

impl ManualClock {
    pub fn new(start: Millis) -> Self {
        ManualClock {
            value: Arc::new(AtomicU32::new(start.0)),
        }
    }

    /// Move the counter forward, wrapping
    pub fn advance(&self, ms: u32) -> Millis {
        let prev = self.value.fetch_add(ms, Ordering::SeqCst);
        Millis(prev.wrapping_add(ms))
    }

    pub fn set(&self, at: Millis) {
        self.value.store(at.0, Ordering::SeqCst);
    }
}

impl MonotonicClock for ManualClock {
    fn now(&self) -> Millis {
        Millis(self.value.load(Ordering::SeqCst))
    }

    fn delay(&self, ms: u32) {
        self.advance(ms);
    }
}
