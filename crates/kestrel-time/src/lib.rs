//! Kestrel Time - Wall clock and network time synchronization
//!
//! This crate provides:
//! - The wall clock collaborator (`WallClock`) with system and fixed backends
//! - Calendar breakdown of epoch seconds and the formatted renderers
//! - The NTP request/reply codec
//! - `TimeSynchronizer`: the Idle/Syncing/Synced state machine driving
//!   periodic synchronization over a `DatagramTransport`

pub mod calendar;
pub mod clock;
pub mod format;
pub mod ntp;
pub mod sync;

pub use calendar::*;
pub use clock::*;
pub use format::*;
pub use sync::*;
