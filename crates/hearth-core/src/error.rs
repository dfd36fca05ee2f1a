//! Error types for the protocol core.
//!
//! Runtime errors here never abort the stack: the coordinator drops the
//! offending packet (silently for authentication and replay failures),
//! logs, and keeps serving. Interaction Model problems are expressed as
//! status codes in the response instead of errors.

use thiserror::Error;

use hearth_crypto::CryptoError;
use hearth_proto::TlvError;

use crate::storage::StorageError;

/// Errors from the protocol core state machines.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Input failed validation (bad PIN format, zero session id, ...)
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    /// Operation referenced a session that is not installed
    #[error("session {session_id} not found")]
    SessionNotFound {
        /// Session id from the message header
        session_id: u16,
    },

    /// Session table is full
    #[error("session limit of {capacity} reached")]
    SessionLimitReached {
        /// Fixed table capacity
        capacity: usize,
    },

    /// Message counter did not advance past the last accepted value
    #[error("replay detected on session {session_id}: counter {counter} <= {last_accepted}")]
    ReplayDetected {
        /// Session the message claimed
        session_id: u16,
        /// Counter carried by the message
        counter: u32,
        /// Highest counter accepted so far
        last_accepted: u32,
    },

    /// A fixed-capacity table rejected a new entry
    #[error("{resource} table full ({capacity} entries)")]
    ResourceExhausted {
        /// Which table overflowed
        resource: &'static str,
        /// Its fixed capacity
        capacity: usize,
    },

    /// Operation not valid in the current state
    #[error("protocol state error: cannot {operation} in state {state}")]
    ProtocolState {
        /// State the machine was in
        state: &'static str,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Payload did not carry the fields the operation requires
    #[error("malformed payload: {0}")]
    MalformedPayload(&'static str),

    /// Cryptographic failure (tag mismatch, bad point, confirmation)
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// TLV parse or encode failure
    #[error("tlv error: {0}")]
    Tlv(#[from] TlvError),

    /// Persistence failure
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl CoreError {
    /// True for failures that are dropped without any response, so a
    /// peer cannot distinguish them from packet loss.
    #[must_use]
    pub fn is_silent_drop(&self) -> bool {
        matches!(
            self,
            Self::ReplayDetected { .. }
                | Self::Crypto(CryptoError::AuthFailure)
                | Self::Crypto(CryptoError::ConfirmationMismatch)
        )
    }
}
