//! Shared network link flag

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Whether the network link is currently up.
///
/// Owned by whatever manages connectivity; transports only read it.
/// Clones share the flag.
#[derive(Clone, Debug)]
pub struct LinkState {
    up: Arc<AtomicBool>,
}

impl LinkState {
    pub fn new(up: bool) -> Self {
        LinkState {
            up: Arc::new(AtomicBool::new(up)),
        }
    }

    pub fn connected() -> Self {
        Self::new(true)
    }

    pub fn disconnected() -> Self {
        Self::new(false)
    }

    #[inline]
    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::Acquire)
    }

    pub fn set(&self, up: bool) {
        self.up.store(up, Ordering::Release);
    }
}

impl Default for LinkState {
    fn default() -> Self {
        Self::connected()
    }
}
