//! UDP transport on a non-blocking socket

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use tracing::{debug, warn};

use kestrel_core::{KestrelError, KestrelResult};

use crate::{DatagramTransport, LinkState, MAX_DATAGRAM_SIZE};

/// UDP transport for the device
pub struct UdpTransport {
    link: LinkState,
    socket: Option<UdpSocket>,
    /// Datagram read by `poll_incoming`, waiting for `receive`
    pending: Option<Vec<u8>>,
}

impl UdpTransport {
    pub fn new(link: LinkState) -> Self {
        UdpTransport {
            link,
            socket: None,
            pending: None,
        }
    }

    /// Local address, once open
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    fn resolve(host: &str, port: u16) -> KestrelResult<SocketAddr> {
        (host, port)
            .to_socket_addrs()
            .map_err(|e| KestrelError::TransportError(format!("resolve {}: {}", host, e)))?
            .find(|addr| addr.is_ipv4())
            .ok_or_else(|| KestrelError::TransportError(format!("no IPv4 address for {}", host)))
    }
}

impl DatagramTransport for UdpTransport {
    fn is_connected(&self) -> bool {
        self.link.is_up()
    }

    fn open(&mut self, local_port: u16) -> KestrelResult<()> {
        let socket = UdpSocket::bind(("0.0.0.0", local_port))
            .map_err(|e| KestrelError::TransportError(e.to_string()))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| KestrelError::TransportError(e.to_string()))?;

        debug!(local = ?socket.local_addr().ok(), "udp transport open");
        self.socket = Some(socket);
        self.pending = None;
        Ok(())
    }

    fn send(&mut self, host: &str, port: u16, bytes: &[u8]) -> KestrelResult<()> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| KestrelError::TransportError("socket not open".into()))?;
        let dest = Self::resolve(host, port)?;

        socket
            .send_to(bytes, dest)
            .map_err(|e| KestrelError::TransportError(e.to_string()))?;
        Ok(())
    }

    fn poll_incoming(&mut self) -> usize {
        if let Some(pending) = &self.pending {
            return pending.len();
        }
        let Some(socket) = &self.socket else {
            return 0;
        };

        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        match socket.recv_from(&mut buf) {
            Ok((len, from)) => {
                debug!(%from, len, "datagram received");
                self.pending = Some(buf[..len].to_vec());
                len
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => 0,
            Err(e) => {
                warn!(error = %e, "udp receive failed");
                0
            }
        }
    }

    fn receive(&mut self, buf: &mut [u8]) -> usize {
        match self.pending.take() {
            Some(datagram) => {
                let n = datagram.len().min(buf.len());
                buf[..n].copy_from_slice(&datagram[..n]);
                n
            }
            None => 0,
        }
    }

    fn close(&mut self) {
        self.socket = None;
        self.pending = None;
    }
}
