//! Scripted in-process peer for deterministic tests

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use kestrel_core::{KestrelError, KestrelResult};

use crate::{DatagramTransport, LinkState};

/// Produces the peer's reply to a sent datagram, or `None` to stay silent
pub type Responder = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;

/// A datagram the code under test sent
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentDatagram {
    pub host: String,
    pub port: u16,
    pub bytes: Vec<u8>,
}

struct Script {
    open: bool,
    fail_open: bool,
    fail_send: bool,
    /// Polls that report nothing before a queued reply becomes visible
    reply_delay_polls: u32,
    responder: Option<Responder>,
    inbox: VecDeque<(u32, Vec<u8>)>,
    sent: Vec<SentDatagram>,
    opens: u32,
}

/// Transport whose peer is a closure.
///
/// Clones share the script, so a test keeps one handle to steer and
/// inspect the transport after moving the other into the code under test.
#[derive(Clone)]
pub struct ScriptedTransport {
    link: LinkState,
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    /// A connected transport whose peer never answers
    pub fn silent() -> Self {
        Self::with_link(LinkState::connected())
    }

    pub fn with_link(link: LinkState) -> Self {
        ScriptedTransport {
            link,
            script: Arc::new(Mutex::new(Script {
                open: false,
                fail_open: false,
                fail_send: false,
                reply_delay_polls: 0,
                responder: None,
                inbox: VecDeque::new(),
                sent: Vec::new(),
                opens: 0,
            })),
        }
    }

    /// A connected transport that answers with `responder`
    pub fn responding<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static,
    {
        let transport = Self::silent();
        transport.set_responder(responder);
        transport
    }

    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static,
    {
        self.script.lock().responder = Some(Box::new(responder));
    }

    /// Stop answering
    pub fn silence(&self) {
        self.script.lock().responder = None;
    }

    pub fn set_reply_delay(&self, polls: u32) {
        self.script.lock().reply_delay_polls = polls;
    }

    pub fn fail_open(&self, fail: bool) {
        self.script.lock().fail_open = fail;
    }

    pub fn fail_send(&self, fail: bool) {
        self.script.lock().fail_send = fail;
    }

    /// Queue an unsolicited datagram
    pub fn inject(&self, bytes: Vec<u8>) {
        self.script.lock().inbox.push_back((0, bytes));
    }

    pub fn link(&self) -> &LinkState {
        &self.link
    }

    pub fn sent(&self) -> Vec<SentDatagram> {
        self.script.lock().sent.clone()
    }

    pub fn sent_count(&self) -> usize {
        self.script.lock().sent.len()
    }

    pub fn open_count(&self) -> u32 {
        self.script.lock().opens
    }

    pub fn is_open(&self) -> bool {
        self.script.lock().open
    }
}

impl DatagramTransport for ScriptedTransport {
    fn is_connected(&self) -> bool {
        self.link.is_up()
    }

    fn open(&mut self, _local_port: u16) -> KestrelResult<()> {
        let mut script = self.script.lock();
        if script.fail_open {
            return Err(KestrelError::TransportError("scripted open failure".into()));
        }
        script.open = true;
        script.opens += 1;
        Ok(())
    }

    fn send(&mut self, host: &str, port: u16, bytes: &[u8]) -> KestrelResult<()> {
        let mut script = self.script.lock();
        if !script.open {
            return Err(KestrelError::TransportError("socket not open".into()));
        }
        if script.fail_send {
            return Err(KestrelError::TransportError("scripted send failure".into()));
        }
        script.sent.push(SentDatagram {
            host: host.to_string(),
            port,
            bytes: bytes.to_vec(),
        });

        let delay = script.reply_delay_polls;
        if let Some(reply) = script.responder.as_mut().and_then(|respond| respond(bytes)) {
            script.inbox.push_back((delay, reply));
        }
        Ok(())
    }

    fn poll_incoming(&mut self) -> usize {
        let mut script = self.script.lock();
        if !script.open {
            return 0;
        }
        match script.inbox.front_mut() {
            Some((0, datagram)) => datagram.len(),
            Some((wait, _)) => {
                *wait -= 1;
                0
            }
            None => 0,
        }
    }

    fn receive(&mut self, buf: &mut [u8]) -> usize {
        let mut script = self.script.lock();
        match script.inbox.front() {
            Some((0, _)) => {}
            _ => return 0,
        }
        match script.inbox.pop_front() {
            Some((_, datagram)) => {
                let n = datagram.len().min(buf.len());
                buf[..n].copy_from_slice(&datagram[..n]);
                n
            }
            None => 0,
        }
    }

    fn close(&mut self) {
        let mut script = self.script.lock();
        script.open = false;
        script.inbox.clear();
    }
}
