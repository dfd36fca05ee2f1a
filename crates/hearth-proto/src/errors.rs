//! Error types for the wire-format codecs.
//!
//! TLV and message framing fail independently and are handled at
//! different layers (a TLV error inside a decrypted payload becomes an
//! Interaction Model status; a message framing error drops the packet),
//! so they get separate enums rather than one catch-all.

use thiserror::Error;

/// Errors produced by the TLV encoder and decoder.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlvError {
    /// Encoder ran out of room in the caller-supplied buffer
    #[error("output buffer too small: need {needed} more bytes, {remaining} left")]
    BufferTooSmall {
        /// Bytes the element would have required
        needed: usize,
        /// Bytes left in the output buffer
        remaining: usize,
    },

    /// Input ended in the middle of an element
    #[error("truncated element: need {needed} bytes, {remaining} remain")]
    Truncated {
        /// Bytes the element requires
        needed: usize,
        /// Bytes left in the input
        remaining: usize,
    },

    /// Tag control other than anonymous or 1-byte context-specific
    #[error("unsupported tag control {0:#04x}")]
    UnsupportedTagControl(u8),

    /// Element type this stack does not emit or accept
    #[error("unsupported element type {0:#04x}")]
    UnsupportedType(u8),

    /// String element whose payload is not valid UTF-8
    #[error("string element is not valid UTF-8")]
    InvalidUtf8,

    /// Containers nested beyond the supported depth
    #[error("container nesting exceeds depth limit of {limit}")]
    NestingTooDeep {
        /// Maximum supported nesting depth
        limit: usize,
    },

    /// End-of-container with no open container
    #[error("end-of-container without a matching open")]
    UnbalancedContainer,
}

/// Errors produced by the message header codec.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageError {
    /// Datagram larger than the transport MTU allows
    #[error("message of {size} bytes exceeds the {max} byte limit")]
    TooLarge {
        /// Actual encoded size
        size: usize,
        /// Hard limit (IPv6 minimum MTU)
        max: usize,
    },

    /// Output buffer cannot hold the encoded message
    #[error("output buffer too small: need {needed} bytes, have {capacity}")]
    BufferTooSmall {
        /// Bytes the message requires
        needed: usize,
        /// Capacity of the output buffer
        capacity: usize,
    },

    /// Input ended before the header (or an optional field) was complete
    #[error("truncated message: need {needed} bytes, {remaining} remain")]
    Truncated {
        /// Bytes the field requires
        needed: usize,
        /// Bytes left in the input
        remaining: usize,
    },

    /// Version nibble other than zero
    #[error("unsupported message version {0}")]
    InvalidVersion(u8),

    /// Flag combination the codec does not understand
    #[error("invalid message flags {0:#04x}")]
    InvalidFlags(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_render_context() {
        let err = TlvError::BufferTooSmall { needed: 9, remaining: 2 };
        assert!(err.to_string().contains("9"));
        assert!(err.to_string().contains("2"));

        let err = MessageError::TooLarge { size: 1500, max: 1280 };
        assert!(err.to_string().contains("1280"));
    }
}
