//! Kestrel Core - Fundamental types shared by the device services
//!
//! This crate defines the types used throughout the device spine:
//! - Error taxonomy (KestrelError, KestrelResult)
//! - Wrapping monotonic time (Millis) and the clock abstraction
//! - Event kinds and bus events

pub mod time;
pub mod event;
pub mod error;

pub use time::*;
pub use event::*;
pub use error::*;
