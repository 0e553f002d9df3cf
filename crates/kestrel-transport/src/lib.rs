//! Kestrel Transport - Datagram collaborator for the time synchronizer
//!
//! This crate provides:
//! - The poll-based `DatagramTransport` interface
//! - `LinkState`: the shared "network is up" flag
//! - `UdpTransport` on a non-blocking UDP socket
//! - `ScriptedTransport`: an in-process peer for deterministic tests

pub mod link;
pub mod udp;
pub mod scripted;

pub use link::LinkState;
pub use udp::UdpTransport;
pub use scripted::{Responder, ScriptedTransport, SentDatagram};

use kestrel_core::KestrelResult;

/// Largest datagram buffered by the transports
pub const MAX_DATAGRAM_SIZE: usize = 512;

/// Unreliable, connectionless datagram transport.
///
/// Polling never blocks: `poll_incoming` reports the size of a waiting
/// datagram (zero if none) and `receive` hands it over.
pub trait DatagramTransport: Send {
    /// Is the underlying network link up?
    fn is_connected(&self) -> bool;

    /// Bind a local port; zero picks an ephemeral one
    fn open(&mut self, local_port: u16) -> KestrelResult<()>;

    fn send(&mut self, host: &str, port: u16, bytes: &[u8]) -> KestrelResult<()>;

    /// Size of the next waiting datagram, or zero
    fn poll_incoming(&mut self) -> usize;

    /// Copy the waiting datagram into `buf`, truncating. Returns bytes copied.
    fn receive(&mut self, buf: &mut [u8]) -> usize;

    fn close(&mut self);
}
