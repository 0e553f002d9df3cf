//! Kestrel Runtime - Device wiring and the cooperative main loop
//!
//! One `Device` owns the four services and advances them from `tick()`
//! in a fixed order:
//! 1. Drain the event bus
//! 2. Run the time synchronizer (may block for the reply wait)
//! 3. Periodic cache cleanup

pub mod config;
pub mod device;
pub mod logging;

pub use config::*;
pub use device::*;
pub use logging::*;
