//! Kestrel Bus - In-process publish/subscribe broker
//!
//! This crate provides:
//! - A fixed-capacity FIFO event queue that rejects on overflow
//! - A per-kind subscriber arena with explicit slot occupancy
//! - Deferred, synchronous dispatch driven by `EventBus::update`

pub mod queue;
pub mod bus;

pub use queue::*;
pub use bus::*;
