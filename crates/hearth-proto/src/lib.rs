//! Matter (CHIP) wire formats.
//!
//! This crate holds the byte-level codecs the rest of the stack is built
//! on: the TLV tagged-value encoding used by every application payload,
//! the Matter message header with its optional node identifiers, and the
//! compact protocol header that routes decrypted payloads to a handler.
//!
//! Everything here is pure: no I/O, no clocks, no global state. Encoders
//! write into caller-supplied buffers and fail on overflow rather than
//! allocate; decoders borrow from the input where they can.

pub mod errors;
pub mod exchange;
pub mod message;
pub mod tlv;

pub use errors::{MessageError, TlvError};
pub use exchange::{
    InteractionOpcode, PROTOCOL_ID_INTERACTION_MODEL, PROTOCOL_ID_SECURE_CHANNEL, ProtocolHeader,
    SecureChannelOpcode,
};
pub use message::{MAX_MESSAGE_SIZE, Message, MessageCounters, MessageHeader};
pub use tlv::{Element, Tag, TlvReader, TlvWriter, Value};
