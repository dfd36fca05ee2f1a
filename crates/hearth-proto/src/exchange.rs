//! Protocol header and opcode registry.
//!
//! After decryption (or directly, for session 0) every payload starts
//! with a compact header naming the protocol, the operation, and the
//! exchange the message belongs to:
//!
//! | Size  | Description                      |
//! |-------|----------------------------------|
//! | `u16` | Protocol id (little-endian)      |
//! | `u8`  | Opcode within the protocol       |
//! | `u16` | Exchange id (little-endian)      |
//!
//! The coordinator dispatches on `(protocol_id, opcode)`; responses echo
//! the request's exchange id.

use crate::errors::MessageError;

/// Secure channel protocol (PASE commissioning traffic).
pub const PROTOCOL_ID_SECURE_CHANNEL: u16 = 0x0000;

/// Interaction Model protocol (reads, subscriptions, reports).
pub const PROTOCOL_ID_INTERACTION_MODEL: u16 = 0x0001;

/// Secure channel opcodes this stack speaks.
///
/// Responses use the request opcode plus one, which the numbering
/// encodes directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SecureChannelOpcode {
    /// Controller requests PBKDF parameters
    PbkdfParamRequest = 0x20,
    /// Device answers with iterations and salt
    PbkdfParamResponse = 0x21,
    /// Controller's SPAKE2+ share
    Pake1 = 0x22,
    /// Device's SPAKE2+ share and confirmation
    Pake2 = 0x23,
    /// Controller's confirmation
    Pake3 = 0x24,
}

impl SecureChannelOpcode {
    /// Parse a raw opcode byte. `None` if unknown.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x20 => Some(Self::PbkdfParamRequest),
            0x21 => Some(Self::PbkdfParamResponse),
            0x22 => Some(Self::Pake1),
            0x23 => Some(Self::Pake2),
            0x24 => Some(Self::Pake3),
            _ => None,
        }
    }

    /// Raw opcode byte.
    #[must_use]
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Interaction Model opcodes this stack speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InteractionOpcode {
    /// Bare status answer to an unhandled request
    StatusResponse = 0x01,
    /// Attribute read request
    ReadRequest = 0x02,
    /// Subscription request
    SubscribeRequest = 0x03,
    /// Subscription acknowledgement
    SubscribeResponse = 0x04,
    /// Attribute report (read response or subscription report)
    ReportData = 0x05,
}

impl InteractionOpcode {
    /// Parse a raw opcode byte. `None` if unknown.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::StatusResponse),
            0x02 => Some(Self::ReadRequest),
            0x03 => Some(Self::SubscribeRequest),
            0x04 => Some(Self::SubscribeResponse),
            0x05 => Some(Self::ReportData),
            _ => None,
        }
    }

    /// Raw opcode byte.
    #[must_use]
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Compact protocol header carried at the front of every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolHeader {
    /// Protocol the payload belongs to
    pub protocol_id: u16,
    /// Operation within the protocol
    pub opcode: u8,
    /// Exchange correlating request and response
    pub exchange_id: u16,
}

impl ProtocolHeader {
    /// Encoded size of the header.
    pub const SIZE: usize = 5;

    /// Encode into the front of `buf`, returning the bytes written.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, MessageError> {
        if buf.len() < Self::SIZE {
            return Err(MessageError::BufferTooSmall { needed: Self::SIZE, capacity: buf.len() });
        }
        buf[0..2].copy_from_slice(&self.protocol_id.to_le_bytes());
        buf[2] = self.opcode;
        buf[3..5].copy_from_slice(&self.exchange_id.to_le_bytes());
        Ok(Self::SIZE)
    }

    /// Decode from the front of `buf`, returning the header and the
    /// remaining payload.
    pub fn decode(buf: &[u8]) -> Result<(Self, &[u8]), MessageError> {
        if buf.len() < Self::SIZE {
            return Err(MessageError::Truncated { needed: Self::SIZE, remaining: buf.len() });
        }
        let header = Self {
            protocol_id: u16::from_le_bytes([buf[0], buf[1]]),
            opcode: buf[2],
            exchange_id: u16::from_le_bytes([buf[3], buf[4]]),
        };
        Ok((header, &buf[Self::SIZE..]))
    }
}
