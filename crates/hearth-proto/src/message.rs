//! Matter message framing.
//!
//! The message header is little-endian with a fixed 8-byte prefix and
//! two optional 8-byte node identifiers controlled by the flags byte:
//!
//! | Size  | Description                                            |
//! |-------|--------------------------------------------------------|
//! | `u8`  | Flags: low nibble version (0), bit 4 source present,   |
//! |       | bits 5-6 destination kind (00 absent, 10 node id)      |
//! | `u16` | Session id (0 = unsecured)                             |
//! | `u8`  | Security flags (reserved, carried opaque)              |
//! | `u32` | Message counter                                        |
//! | `0/u64` | Source node id, if flagged                           |
//! | `0/u64` | Destination node id, if flagged                      |
//! | `*`   | Payload                                                |
//!
//! The fixed prefix is parsed zero-copy; the optional tail is walked by
//! hand. Whole datagrams are capped at [`MAX_MESSAGE_SIZE`] bytes, the
//! IPv6 minimum MTU.

use bytes::Bytes;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::errors::MessageError;

/// Hard cap on an encoded message (IPv6 minimum MTU).
pub const MAX_MESSAGE_SIZE: usize = 1280;

const FLAGS_VERSION_MASK: u8 = 0x0F;
const FLAGS_VERSION_V0: u8 = 0x00;
const FLAGS_SOURCE_PRESENT: u8 = 0x10;
const FLAGS_DESTINATION_MASK: u8 = 0x60;
const FLAGS_DESTINATION_NODE: u8 = 0x40;

/// Fixed 8-byte header prefix (little-endian on the wire).
///
/// Stored as raw byte arrays so the struct has no alignment demands and
/// every bit pattern is valid, letting `zerocopy` cast it straight out
/// of untrusted datagram bytes.
#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
struct HeaderPrefix {
    flags: u8,
    session_id: [u8; 2],
    security_flags: u8,
    counter: [u8; 4],
}

impl HeaderPrefix {
    const SIZE: usize = 8;
}

/// Decoded message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageHeader {
    /// Session the payload is secured under (0 = unsecured)
    pub session_id: u16,
    /// Reserved security flags, carried through unchanged
    pub security_flags: u8,
    /// Per-sender message counter
    pub counter: u32,
    /// Sender node id, when present
    pub source_node_id: Option<u64>,
    /// Destination node id, when present
    pub destination_node_id: Option<u64>,
}

impl MessageHeader {
    /// Encoded size of this header.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        HeaderPrefix::SIZE
            + self.source_node_id.map_or(0, |_| 8)
            + self.destination_node_id.map_or(0, |_| 8)
    }
}

/// A complete message: header plus payload bytes.
///
/// For secured sessions the payload is the CCM frame
/// (`nonce || ciphertext || tag`); for session 0 it is the protocol
/// header followed by plaintext TLV. This type does not interpret it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message header
    pub header: MessageHeader,
    /// Opaque payload bytes
    pub payload: Bytes,
}

impl Message {
    /// Create a message from header and payload.
    #[must_use]
    pub fn new(header: MessageHeader, payload: impl Into<Bytes>) -> Self {
        Self { header, payload: payload.into() }
    }

    /// Encode into `buf`, returning the number of bytes written.
    ///
    /// # Errors
    ///
    /// - [`MessageError::TooLarge`] if the encoded message would exceed
    ///   [`MAX_MESSAGE_SIZE`]
    /// - [`MessageError::BufferTooSmall`] if `buf` cannot hold it
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, MessageError> {
        let needed = self.header.encoded_len() + self.payload.len();
        if needed > MAX_MESSAGE_SIZE {
            return Err(MessageError::TooLarge { size: needed, max: MAX_MESSAGE_SIZE });
        }
        if needed > buf.len() {
            return Err(MessageError::BufferTooSmall { needed, capacity: buf.len() });
        }

        let mut flags = FLAGS_VERSION_V0;
        if self.header.source_node_id.is_some() {
            flags |= FLAGS_SOURCE_PRESENT;
        }
        if self.header.destination_node_id.is_some() {
            flags |= FLAGS_DESTINATION_NODE;
        }

        let prefix = HeaderPrefix {
            flags,
            session_id: self.header.session_id.to_le_bytes(),
            security_flags: self.header.security_flags,
            counter: self.header.counter.to_le_bytes(),
        };

        buf[..HeaderPrefix::SIZE].copy_from_slice(prefix.as_bytes());
        let mut at = HeaderPrefix::SIZE;
        if let Some(source) = self.header.source_node_id {
            buf[at..at + 8].copy_from_slice(&source.to_le_bytes());
            at += 8;
        }
        if let Some(destination) = self.header.destination_node_id {
            buf[at..at + 8].copy_from_slice(&destination.to_le_bytes());
            at += 8;
        }
        buf[at..at + self.payload.len()].copy_from_slice(&self.payload);
        Ok(at + self.payload.len())
    }

    /// Decode a received datagram.
    ///
    /// The payload is copied out of `buf` so the message owns its bytes
    /// (receive buffers are reused).
    ///
    /// # Errors
    ///
    /// - [`MessageError::TooLarge`] for datagrams over the MTU cap
    /// - [`MessageError::Truncated`] if the header overruns the input
    /// - [`MessageError::InvalidVersion`] for a non-zero version nibble
    /// - [`MessageError::InvalidFlags`] for destination kinds this stack
    ///   does not speak (only absent and 8-byte node id are defined)
    pub fn decode(buf: &[u8]) -> Result<Self, MessageError> {
        if buf.len() > MAX_MESSAGE_SIZE {
            return Err(MessageError::TooLarge { size: buf.len(), max: MAX_MESSAGE_SIZE });
        }

        let (prefix, mut rest) = HeaderPrefix::ref_from_prefix(buf)
            .map_err(|_| MessageError::Truncated { needed: HeaderPrefix::SIZE, remaining: buf.len() })?;

        let version = prefix.flags & FLAGS_VERSION_MASK;
        if version != FLAGS_VERSION_V0 {
            return Err(MessageError::InvalidVersion(version));
        }

        let source_node_id = if prefix.flags & FLAGS_SOURCE_PRESENT != 0 {
            Some(take_u64(&mut rest)?)
        } else {
            None
        };

        let destination_node_id = match prefix.flags & FLAGS_DESTINATION_MASK {
            0 => None,
            FLAGS_DESTINATION_NODE => Some(take_u64(&mut rest)?),
            _ => return Err(MessageError::InvalidFlags(prefix.flags)),
        };

        Ok(Self {
            header: MessageHeader {
                session_id: u16::from_le_bytes(prefix.session_id),
                security_flags: prefix.security_flags,
                counter: u32::from_le_bytes(prefix.counter),
                source_node_id,
                destination_node_id,
            },
            payload: Bytes::copy_from_slice(rest),
        })
    }
}

fn take_u64(rest: &mut &[u8]) -> Result<u64, MessageError> {
    if rest.len() < 8 {
        return Err(MessageError::Truncated { needed: 8, remaining: rest.len() });
    }
    let (head, tail) = rest.split_at(8);
    *rest = tail;
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(head);
    Ok(u64::from_le_bytes(bytes))
}

/// Process-lifetime wrapping counters for outbound messages.
///
/// One instance lives in the protocol coordinator; nothing here is
/// global. Both counters start at zero and advance on every allocation,
/// wrapping at their type boundary.
#[derive(Debug, Default)]
pub struct MessageCounters {
    message: u32,
    exchange: u16,
}

impl MessageCounters {
    /// Fresh counters, both at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next message counter.
    pub fn next_message_counter(&mut self) -> u32 {
        let current = self.message;
        self.message = self.message.wrapping_add(1);
        current
    }

    /// Allocate the next exchange id.
    pub fn next_exchange_id(&mut self) -> u16 {
        let current = self.exchange;
        self.exchange = self.exchange.wrapping_add(1);
        current
    }
}
