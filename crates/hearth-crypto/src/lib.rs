//! Hearth Cryptographic Primitives
//!
//! Cryptographic building blocks for the Matter bridge stack. Pure
//! functions with deterministic outputs. Callers provide random bytes
//! for deterministic testing.
//!
//! # Key Lifecycle
//!
//! Commissioning turns the 8-digit setup passcode into a per-session
//! AEAD key:
//!
//! ```text
//! Setup PIN + salt
//!        │
//!        ▼
//! PBKDF2-HMAC-SHA256 → w0 ‖ w1 (password witnesses)
//!        │
//!        ▼
//! SPAKE2+ on P-256 → shared secret Z (+ confirmation transcript)
//!        │
//!        ▼
//! HKDF-SHA256 → 16-byte session key
//!        │
//!        ▼
//! AES-128-CCM → secured messages
//! ```
//!
//! # Security
//!
//! - Mutual authentication: the PAKE3 confirmation tag is verified in
//!   constant time before a session key is released; a wrong passcode
//!   never yields a usable key.
//! - Nonce discipline: CCM nonces bind the session id and the sender's
//!   message counter, so a key never sees a repeated nonce until the
//!   counter wraps.
//! - Zeroization: password witnesses and shared secrets are wiped on
//!   drop; failed handshakes leave no key material behind.

pub mod aead;
pub mod error;
pub mod kdf;
pub mod spake2p;

pub use aead::{NONCE_SIZE, TAG_SIZE, build_nonce, open, seal};
pub use error::CryptoError;
pub use kdf::{SESSION_KEY_SIZE, derive_session_key, stretch_pin};
pub use spake2p::{
    Confirmation, PUBLIC_SHARE_SIZE, PakeExchange, PasswordWitness, confirmation_tags,
    verifier_exchange,
};
