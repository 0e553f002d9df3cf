//! Kestrel Test Harness - Deterministic device simulation
//!
//! This crate provides:
//! - `DeviceHarness`: a fully wired device on in-memory storage, a
//!   hand-driven clock and a scripted time server
//! - `EventLog`: a recording bus subscriber
//! - End-to-end scenarios covering the cross-service properties

pub mod harness;
pub mod scenarios;

pub use harness::*;
