//! Error types for the crypto layer.

use thiserror::Error;

/// Errors from the cryptographic primitives.
///
/// Authentication failures carry no detail on purpose: callers drop the
/// offending packet without responding, and the error itself must not
/// leak which check failed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    /// AEAD tag did not verify (tampered or wrong key)
    #[error("authenticated decryption failed")]
    AuthFailure,

    /// Plaintext too long for the CCM length field
    #[error("plaintext exceeds the AEAD length limit")]
    PayloadTooLong,

    /// Byte string is not a valid uncompressed P-256 point
    #[error("invalid elliptic curve point")]
    InvalidPoint,

    /// Exchange produced the identity element (degenerate peer share)
    #[error("degenerate key exchange result")]
    DegenerateExchange,

    /// Confirmation tag mismatch (wrong passcode or tampering)
    #[error("handshake confirmation mismatch")]
    ConfirmationMismatch,
}
