//! Kernel-user message channel framing.
//!
//! The kernel pushes coordinator traffic to registered clients through
//! a pipe, one length-prefixed message at a time. Each message starts
//! with an 8-byte header; the payload for the HSM group is an action
//! list (`wire::decode_action_list`).

use std::io::Read;

use crate::error::{SysError, SysResult};

/// Channel magic.
pub const KUC_MAGIC: u16 = 0x191c;
/// Transport id for coordinator traffic.
pub const KUC_TRANSPORT_HSM: u8 = 2;
/// Message type carrying an action list.
pub const HMT_ACTION_LIST: u16 = 100;
/// Message type telling the client to shut down.
pub const HMT_SHUTDOWN: u16 = 101;

/// Size of the on-wire message header.
pub const HEADER_LEN: usize = 8;

/// Decoded channel message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KucHeader {
    /// Always [`KUC_MAGIC`].
    pub magic: u16,
    /// Which subsystem the message belongs to.
    pub transport: u8,
    /// Header flags.
    pub flags: u8,
    /// Message type within the transport.
    pub msgtype: u16,
    /// Total message length including this header.
    pub msglen: u16,
}

impl KucHeader {
    /// Parses a header from its first 8 bytes.
    pub fn parse(buf: &[u8]) -> SysResult<Self> {
        if buf.len() < HEADER_LEN {
            return Err(SysError::Truncated {
                what: "channel header",
                need: HEADER_LEN,
                have: buf.len(),
            });
        }
        let header = Self {
            magic: u16::from_ne_bytes([buf[0], buf[1]]),
            transport: buf[2],
            flags: buf[3],
            msgtype: u16::from_ne_bytes([buf[4], buf[5]]),
            msglen: u16::from_ne_bytes([buf[6], buf[7]]),
        };
        if header.magic != KUC_MAGIC {
            return Err(SysError::BadMessage(format!(
                "bad channel magic {:#x}",
                header.magic
            )));
        }
        if (header.msglen as usize) < HEADER_LEN {
            return Err(SysError::BadMessage(format!(
                "message length {} below header size",
                header.msglen
            )));
        }
        Ok(header)
    }

    /// Encodes the header (used by tests and the mock channel).
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..2].copy_from_slice(&self.magic.to_ne_bytes());
        out[2] = self.transport;
        out[3] = self.flags;
        out[4..6].copy_from_slice(&self.msgtype.to_ne_bytes());
        out[6..8].copy_from_slice(&self.msglen.to_ne_bytes());
        out
    }
}

/// Reads one whole message, returning its header and payload.
///
/// The kernel writes each message with a single pipe write, so after
/// the header is available the payload is too; a `WouldBlock` on the
/// first byte means no message is pending.
pub fn read_message<R: Read>(reader: &mut R) -> SysResult<(KucHeader, Vec<u8>)> {
    let mut header_buf = [0u8; HEADER_LEN];
    reader.read_exact(&mut header_buf)?;
    let header = KucHeader::parse(&header_buf)?;

    let mut payload = vec![0u8; header.msglen as usize - HEADER_LEN];
    reader.read_exact(&mut payload)?;
    Ok((header, payload))
}
