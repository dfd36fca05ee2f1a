//! Key derivation: passcode stretching and session-key expansion.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

/// Derived AEAD session key length.
pub const SESSION_KEY_SIZE: usize = 16;

/// PBKDF2 output length: two 32-byte password witnesses.
pub const WITNESS_MATERIAL_SIZE: usize = 64;

/// HKDF salt for session-key expansion.
const SESSION_KEY_SALT: &[u8] = b"CHIP PASE Session Keys";

/// Stretch the setup passcode into SPAKE2+ witness material.
///
/// PBKDF2-HMAC-SHA256 over the ASCII passcode. The result is `w0 ‖ w1`
/// before reduction into the curve's scalar field and is wiped when the
/// returned guard drops.
#[must_use]
pub fn stretch_pin(
    pin: &[u8],
    salt: &[u8],
    iterations: u32,
) -> Zeroizing<[u8; WITNESS_MATERIAL_SIZE]> {
    let mut material = Zeroizing::new([0u8; WITNESS_MATERIAL_SIZE]);
    pbkdf2::pbkdf2_hmac::<Sha256>(pin, salt, iterations, material.as_mut_slice());
    material
}

/// Derive the AEAD session key from the shared secret's X coordinate.
///
/// HKDF-SHA256 with a fixed salt and the session id as context, so the
/// same handshake secret installed under a different session id yields
/// an unrelated key.
#[must_use]
pub fn derive_session_key(shared_x: &[u8; 32], session_id: u16) -> [u8; SESSION_KEY_SIZE] {
    let hkdf = Hkdf::<Sha256>::new(Some(SESSION_KEY_SALT), shared_x);
    let mut key = [0u8; SESSION_KEY_SIZE];
    let Ok(()) = hkdf.expand(&session_id.to_le_bytes(), &mut key) else {
        unreachable!("16 bytes is a valid HKDF-SHA256 output length")
    };
    key
}
