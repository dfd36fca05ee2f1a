//! Message sealing with AES-128-CCM.
//!
//! Matter secures session payloads with AES-128-CCM using a 13-byte
//! nonce and a 16-byte tag. The nonce is deterministic: it binds the
//! session id and the sender's message counter, so the pair never
//! repeats under one key until the 32-bit counter wraps (at which point
//! the session must be re-established).

use aes::Aes128;
use ccm::{
    Ccm,
    aead::{Aead, KeyInit},
    consts::{U13, U16},
};

use crate::error::CryptoError;

/// AES-128-CCM with a 16-byte tag and 13-byte nonce.
type Aes128Ccm = Ccm<Aes128, U16, U13>;

/// CCM nonce length in bytes.
pub const NONCE_SIZE: usize = 13;

/// CCM authentication tag length in bytes.
pub const TAG_SIZE: usize = 16;

/// AES-128 key length in bytes.
pub const KEY_SIZE: usize = 16;

/// Build the deterministic nonce for one message.
///
/// Layout: `session_id` (2 bytes, big-endian) then the sender's message
/// counter (4 bytes, big-endian) then seven zero bytes.
#[must_use]
pub fn build_nonce(session_id: u16, counter: u32) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[0..2].copy_from_slice(&session_id.to_be_bytes());
    nonce[2..6].copy_from_slice(&counter.to_be_bytes());
    nonce
}

/// Encrypt and authenticate `plaintext`, returning `ciphertext || tag`.
///
/// # Errors
///
/// [`CryptoError::PayloadTooLong`] if the plaintext exceeds what the
/// CCM length field can describe (far beyond any datagram this stack
/// frames).
pub fn seal(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes128Ccm::new(key.into());
    cipher.encrypt(nonce.into(), plaintext).map_err(|_| CryptoError::PayloadTooLong)
}

/// Verify and decrypt `ciphertext || tag`.
///
/// # Errors
///
/// [`CryptoError::AuthFailure`] if the tag does not verify. No partial
/// plaintext is ever returned.
pub fn open(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    framed: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes128Ccm::new(key.into());
    cipher.decrypt(nonce.into(), framed).map_err(|_| CryptoError::AuthFailure)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn test_key() -> [u8; KEY_SIZE] {
        core::array::from_fn(|i| i as u8)
    }

    #[test]
    fn seal_open_round_trip() {
        let key = test_key();
        let nonce = build_nonce(7, 42);
        let framed = seal(&key, &nonce, b"burner status").unwrap();
        assert_eq!(framed.len(), 13 + TAG_SIZE);
        assert_eq!(open(&key, &nonce, &framed).unwrap(), b"burner status");
    }

    #[test]
    fn known_answer_vector() {
        // Independently computed with a reference AES-CCM implementation:
        // key 00..0f, session 1, counter 1, no AAD.
        let key = test_key();
        let nonce = build_nonce(1, 1);
        assert_eq!(hex::encode(nonce), "00010000000100000000000000");

        let framed = seal(&key, &nonce, b"The flame is lit").unwrap();
        assert_eq!(
            hex::encode(framed),
            "21ed16a38aef8e5d588939e0ceb1c9ab1a62d107ccab745d78983ddd6ef7dfe6"
        );
    }

    #[test]
    fn empty_plaintext_round_trips() {
        let key = test_key();
        let nonce = build_nonce(1, 0);
        let framed = seal(&key, &nonce, b"").unwrap();
        assert_eq!(framed.len(), TAG_SIZE);
        assert_eq!(open(&key, &nonce, &framed).unwrap(), b"");
    }

    #[test]
    fn every_ciphertext_bit_flip_fails_auth() {
        let key = test_key();
        let nonce = build_nonce(3, 9);
        let framed = seal(&key, &nonce, b"ok").unwrap();

        for byte in 0..framed.len() {
            for bit in 0..8 {
                let mut tampered = framed.clone();
                tampered[byte] ^= 1 << bit;
                assert_eq!(
                    open(&key, &nonce, &tampered),
                    Err(CryptoError::AuthFailure),
                    "flip at byte {byte} bit {bit} must fail"
                );
            }
        }
    }

    #[test]
    fn wrong_key_fails_auth() {
        let key = test_key();
        let nonce = build_nonce(1, 1);
        let framed = seal(&key, &nonce, b"secret").unwrap();

        let mut other = key;
        other[0] ^= 1;
        assert_eq!(open(&other, &nonce, &framed), Err(CryptoError::AuthFailure));
    }

    #[test]
    fn wrong_nonce_fails_auth() {
        let key = test_key();
        let framed = seal(&key, &build_nonce(1, 1), b"secret").unwrap();
        assert_eq!(open(&key, &build_nonce(1, 2), &framed), Err(CryptoError::AuthFailure));
    }

    #[test]
    fn nonce_binds_session_and_counter() {
        assert_ne!(build_nonce(1, 5), build_nonce(2, 5));
        assert_ne!(build_nonce(1, 5), build_nonce(1, 6));
        assert_eq!(&build_nonce(0x1234, 0xAABB_CCDD)[..6], &[0x12, 0x34, 0xAA, 0xBB, 0xCC, 0xDD]);
    }

    proptest! {
        /// PROPERTY: for all keys, nonces and plaintexts,
        /// open(seal(p)) = p and the frame carries exactly one tag of
        /// overhead.
        #[test]
        fn seal_open_identity(
            key in any::<[u8; KEY_SIZE]>(),
            session_id in any::<u16>(),
            counter in any::<u32>(),
            plaintext in prop::collection::vec(any::<u8>(), 0..512),
        ) {
            let nonce = build_nonce(session_id, counter);
            let framed = seal(&key, &nonce, &plaintext).unwrap();
            prop_assert_eq!(framed.len(), plaintext.len() + TAG_SIZE);
            prop_assert_eq!(open(&key, &nonce, &framed).unwrap(), plaintext);
        }
    }
}
