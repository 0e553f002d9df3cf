//! NTP request/reply codec
//!
//! Only what the synchronizer needs: a 48-byte client request carrying a
//! random transmit timestamp, and validation of the server's reply.

use kestrel_core::{KestrelError, KestrelResult};

/// NTP packet size without extensions
pub const NTP_PACKET_SIZE: usize = 48;

/// Well-known NTP port
pub const NTP_PORT: u16 = 123;

/// Seconds from 1900-01-01 (NTP era 0) to 1970-01-01
pub const NTP_UNIX_OFFSET: i64 = 2_208_988_800;

/// LI = 3 (unsynchronized), VN = 4, Mode = 3 (client)
const CLIENT_LI_VN_MODE: u8 = 0b1110_0011;
const POLL_INTERVAL: u8 = 6;
const PRECISION: u8 = 0xEC;

const MODE_SERVER: u8 = 4;
const MODE_BROADCAST: u8 = 5;

const ORIGINATE_OFFSET: usize = 24;
const TRANSMIT_OFFSET: usize = 40;

/// Build a client request whose transmit timestamp is `nonce`.
///
/// The server copies it into the reply's originate field, which ties the
/// reply to this request.
pub fn build_request(nonce: u64) -> [u8; NTP_PACKET_SIZE] {
    let mut packet = [0u8; NTP_PACKET_SIZE];
    packet[0] = CLIENT_LI_VN_MODE;
    packet[1] = 0; // stratum
    packet[2] = POLL_INTERVAL;
    packet[3] = PRECISION;
    packet[TRANSMIT_OFFSET..].copy_from_slice(&nonce.to_be_bytes());
    packet
}

/// Validated server reply
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NtpReply {
    pub stratum: u8,
    /// Whole seconds of the server transmit timestamp, NTP era-relative
    pub transmit_seconds: u32,
}

impl NtpReply {
    /// Transmit time as Unix seconds.
    ///
    /// Values with the top bit clear are taken to be in era 1 (2036-2104).
    pub fn unix_seconds(&self) -> i64 {
        let secs = self.transmit_seconds as i64;
        if self.transmit_seconds & 0x8000_0000 == 0 {
            secs + (1i64 << 32) - NTP_UNIX_OFFSET
        } else {
            secs - NTP_UNIX_OFFSET
        }
    }
}

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_be_bytes(raw)
}

/// Validate a reply to the request sent with `nonce`
pub fn parse_reply(buf: &[u8], nonce: u64) -> KestrelResult<NtpReply> {
    if buf.len() < NTP_PACKET_SIZE {
        return Err(KestrelError::TransportError(format!(
            "short NTP reply: {} bytes",
            buf.len()
        )));
    }

    let mode = buf[0] & 0x07;
    if mode != MODE_SERVER && mode != MODE_BROADCAST {
        return Err(KestrelError::TransportError(format!(
            "unexpected NTP mode {}",
            mode
        )));
    }

    let stratum = buf[1];
    if stratum == 0 {
        let code = String::from_utf8_lossy(&buf[12..16]).into_owned();
        return Err(KestrelError::TransportError(format!(
            "NTP kiss-of-death {}",
            code
        )));
    }
    if stratum > 15 {
        return Err(KestrelError::TransportError(format!(
            "invalid NTP stratum {}",
            stratum
        )));
    }

    if read_u64(buf, ORIGINATE_OFFSET) != nonce {
        return Err(KestrelError::TransportError(
            "NTP reply does not match request".into(),
        ));
    }

    let transmit_seconds = u32::from_be_bytes([
        buf[TRANSMIT_OFFSET],
        buf[TRANSMIT_OFFSET + 1],
        buf[TRANSMIT_OFFSET + 2],
        buf[TRANSMIT_OFFSET + 3],
    ]);
    if transmit_seconds == 0 {
        return Err(KestrelError::TransportError(
            "NTP reply without transmit time".into(),
        ));
    }

    Ok(NtpReply {
        stratum,
        transmit_seconds,
    })
}

/// Answer `request` the way a stratum-2 server would, reporting
/// `transmit_seconds`. Used by scripted test peers.
pub fn server_reply(request: &[u8], transmit_seconds: u32) -> Option<Vec<u8>> {
    if request.len() < NTP_PACKET_SIZE {
        return None;
    }
    let mut reply = vec![0u8; NTP_PACKET_SIZE];
    reply[0] = 0b0010_0100; // LI 0, VN 4, mode 4
    reply[1] = 2;
    reply[2] = request[2];
    reply[3] = PRECISION;
    reply[ORIGINATE_OFFSET..ORIGINATE_OFFSET + 8]
        .copy_from_slice(&request[TRANSMIT_OFFSET..TRANSMIT_OFFSET + 8]);
    reply[32..36].copy_from_slice(&transmit_seconds.to_be_bytes());
    reply[TRANSMIT_OFFSET..TRANSMIT_OFFSET + 4].copy_from_slice(&transmit_seconds.to_be_bytes());
    Some(reply)
}

/// NTP-era seconds for a Unix time, for building test replies
pub fn ntp_seconds(unix_seconds: i64) -> u32 {
    (unix_seconds + NTP_UNIX_OFFSET) as u32
}
