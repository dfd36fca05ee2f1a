//! SPAKE2+ verifier-side exchange on P-256.
//!
//! The device plays the verifier: the controller (prover) knows the
//! setup passcode, the device holds the password witnesses stretched
//! from it. One exchange computes the device share `pB = y·G + w0·N`,
//! the shared secret `Z = y·(pA − w0·M)` and the confirmation secret
//! `V = y·L` with `L = w1·G`. `M` and `N` are the fixed SPAKE2+
//! generator points from the Matter specification.
//!
//! Functions here are pure; the caller supplies the 32 random bytes the
//! ephemeral scalar is reduced from, which keeps handshake tests
//! deterministic.
//!
//! # Security
//!
//! - Peer shares are validated as uncompressed on-curve points before
//!   any arithmetic; degenerate results (the identity) abort the
//!   exchange.
//! - Confirmation tags are derived from a transcript hash covering the
//!   salt, iteration count, both shares and both shared coordinates, and
//!   are compared in constant time.
//! - Shared coordinates are wiped on drop.

use hmac::{Hmac, Mac};
use p256::{
    AffinePoint, EncodedPoint, FieldBytes, ProjectivePoint, Scalar, U256,
    elliptic_curve::{
        Field,
        ops::Reduce,
        sec1::{FromEncodedPoint, ToEncodedPoint},
    },
};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Uncompressed SEC1 point length.
pub const PUBLIC_SHARE_SIZE: usize = 65;

/// Transcript context string, shared with the commissioning controller.
const PAKE_CONTEXT: &[u8] = b"CHIP PAKE V1 Commissioning";

/// HKDF salt for the confirmation key pair.
const CONFIRM_SALT: &[u8] = b"CHIP PASE Confirm";

/// SPAKE2+ generator M (uncompressed P-256 point, Matter constant).
pub const SPAKE_M: [u8; 65] = [
    0x04, 0x88, 0x6E, 0x2F, 0x97, 0xAC, 0xE4, 0x6E, 0x55, 0xBA, 0x9D, 0xD7,
    0x24, 0x25, 0x79, 0xF2, 0x99, 0x3B, 0x64, 0xE1, 0x6E, 0xF3, 0xDC, 0xAB,
    0x95, 0xAF, 0xD4, 0x97, 0x33, 0x3D, 0x8F, 0xA1, 0x2F, 0x5F, 0xF3, 0x55,
    0x16, 0x3E, 0x43, 0xCE, 0x22, 0x4E, 0x0B, 0x0E, 0x65, 0xFF, 0x02, 0xAC,
    0x8E, 0x5C, 0x7B, 0xE0, 0x94, 0x19, 0xC7, 0x85, 0xE0, 0xCA, 0x54, 0x7D,
    0x55, 0xA1, 0x2E, 0x2D, 0x20,
];

/// SPAKE2+ generator N (uncompressed P-256 point, Matter constant).
pub const SPAKE_N: [u8; 65] = [
    0x04, 0xD8, 0xBB, 0xD6, 0xC6, 0x39, 0xC6, 0x29, 0x37, 0xB0, 0x4D, 0x99,
    0x7F, 0x38, 0xC3, 0x77, 0x07, 0x19, 0xC6, 0x29, 0xD7, 0x01, 0x4D, 0x49,
    0xA2, 0x4B, 0x4F, 0x98, 0xBA, 0xA1, 0x29, 0x2B, 0x49, 0x07, 0xD6, 0x0A,
    0xA6, 0xBF, 0xAD, 0xE4, 0x50, 0x08, 0xA6, 0x36, 0x33, 0x7F, 0x51, 0x68,
    0xC6, 0x4D, 0x9B, 0xD3, 0x60, 0x34, 0x80, 0x8C, 0xD5, 0x64, 0x49, 0x0B,
    0x1E, 0x65, 0x6E, 0xDB, 0xE7,
];

/// Password witnesses `w0`, `w1` reduced into the P-256 scalar field.
#[derive(Clone)]
pub struct PasswordWitness {
    w0: Scalar,
    w1: Scalar,
}

impl PasswordWitness {
    /// Reduce stretched passcode material (`w0 ‖ w1`, 64 bytes) into
    /// scalar witnesses.
    #[must_use]
    pub fn derive(material: &[u8; 64]) -> Self {
        let mut half = [0u8; 32];
        half.copy_from_slice(&material[..32]);
        let w0 = reduce_scalar(&half);
        half.copy_from_slice(&material[32..]);
        let w1 = reduce_scalar(&half);
        Self { w0, w1 }
    }
}

/// Result of the verifier's half of the exchange.
///
/// Holds the device share to send back and the two shared coordinates
/// feeding key derivation and confirmation. The coordinates are wiped
/// when this value drops.
pub struct PakeExchange {
    /// Device public share `pB`, uncompressed
    pub pb: [u8; PUBLIC_SHARE_SIZE],
    shared_x: Zeroizing<[u8; 32]>,
    confirm_x: Zeroizing<[u8; 32]>,
}

impl PakeExchange {
    /// X coordinate of the shared secret `Z` (session-key input).
    #[must_use]
    pub fn shared_x(&self) -> &[u8; 32] {
        &self.shared_x
    }

    /// X coordinate of the confirmation secret `V`.
    #[must_use]
    pub fn confirm_x(&self) -> &[u8; 32] {
        &self.confirm_x
    }
}

/// Run the verifier's exchange against the prover share `pA`.
///
/// `y_random` is reduced into the ephemeral scalar `y`; the caller
/// draws it from a cryptographically strong source.
///
/// # Errors
///
/// - [`CryptoError::InvalidPoint`] if `pA` is not an uncompressed
///   on-curve point
/// - [`CryptoError::DegenerateExchange`] if the arithmetic collapses to
///   the identity (malicious share or an all-zero scalar reduction)
pub fn verifier_exchange(
    witness: &PasswordWitness,
    prover_share: &[u8; PUBLIC_SHARE_SIZE],
    y_random: &[u8; 32],
) -> Result<PakeExchange, CryptoError> {
    let pa = decode_point(prover_share)?;
    let y = reduce_scalar(y_random);
    if bool::from(y.is_zero()) {
        return Err(CryptoError::DegenerateExchange);
    }

    let m = spake_constant(&SPAKE_M);
    let n = spake_constant(&SPAKE_N);

    let pb = ProjectivePoint::GENERATOR * y + n * witness.w0;
    let shifted = pa - m * witness.w0;
    let z = shifted * y;
    let v = ProjectivePoint::GENERATOR * (witness.w1 * y);

    Ok(PakeExchange {
        pb: encode_point(&pb)?,
        shared_x: Zeroizing::new(x_coordinate(&z)?),
        confirm_x: Zeroizing::new(x_coordinate(&v)?),
    })
}

/// Confirmation tag pair bound to the handshake transcript.
pub struct Confirmation {
    ca: [u8; 32],
    cb: [u8; 32],
}

impl Confirmation {
    /// Tag the device sends in PAKE2 (`cB`).
    #[must_use]
    pub fn responder_tag(&self) -> [u8; 32] {
        self.cb
    }

    /// Tag the prover sends in PAKE3 (`cA`).
    #[must_use]
    pub fn initiator_tag(&self) -> [u8; 32] {
        self.ca
    }

    /// Verify the prover's PAKE3 tag (`cA`) in constant time.
    ///
    /// # Errors
    ///
    /// [`CryptoError::ConfirmationMismatch`] on any difference,
    /// including length.
    pub fn verify_initiator(&self, tag: &[u8]) -> Result<(), CryptoError> {
        if tag.len() != self.ca.len() {
            return Err(CryptoError::ConfirmationMismatch);
        }
        if bool::from(self.ca.ct_eq(tag)) {
            Ok(())
        } else {
            Err(CryptoError::ConfirmationMismatch)
        }
    }
}

/// Derive both confirmation tags from the handshake transcript.
///
/// `TT = SHA-256(context ‖ salt ‖ iterations ‖ pA ‖ pB ‖ Z.x ‖ V.x)`;
/// HKDF splits `TT` into the two MAC keys, and each side's tag is the
/// HMAC of the peer's share. Both roles can call this: the verifier
/// passes the coordinates from its [`PakeExchange`], the prover the
/// ones it computed from `pB`.
#[must_use]
pub fn confirmation_tags(
    salt: &[u8],
    iterations: u32,
    prover_share: &[u8; PUBLIC_SHARE_SIZE],
    responder_share: &[u8; PUBLIC_SHARE_SIZE],
    shared_x: &[u8; 32],
    confirm_x: &[u8; 32],
) -> Confirmation {
    let mut transcript = Sha256::new();
    transcript.update(PAKE_CONTEXT);
    transcript.update(salt);
    transcript.update(iterations.to_le_bytes());
    transcript.update(prover_share);
    transcript.update(responder_share);
    transcript.update(shared_x);
    transcript.update(confirm_x);
    let tt = transcript.finalize();

    let hkdf = hkdf::Hkdf::<Sha256>::new(Some(CONFIRM_SALT), &tt);
    let mut keys = Zeroizing::new([0u8; 32]);
    let Ok(()) = hkdf.expand(&[], keys.as_mut_slice()) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length")
    };

    Confirmation {
        ca: hmac_tag(&keys[..16], responder_share),
        cb: hmac_tag(&keys[16..], prover_share),
    }
}

fn hmac_tag(key: &[u8], data: &[u8]) -> [u8; 32] {
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(key) else {
        unreachable!("HMAC-SHA256 accepts any key length")
    };
    mac.update(data);
    mac.finalize().into_bytes().into()
}

fn reduce_scalar(bytes: &[u8; 32]) -> Scalar {
    <Scalar as Reduce<U256>>::reduce_bytes(FieldBytes::from_slice(bytes))
}

fn decode_point(bytes: &[u8; PUBLIC_SHARE_SIZE]) -> Result<ProjectivePoint, CryptoError> {
    if bytes[0] != 0x04 {
        return Err(CryptoError::InvalidPoint);
    }
    let encoded = EncodedPoint::from_bytes(bytes).map_err(|_| CryptoError::InvalidPoint)?;
    let affine = Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded))
        .ok_or(CryptoError::InvalidPoint)?;
    Ok(ProjectivePoint::from(affine))
}

fn spake_constant(bytes: &[u8; PUBLIC_SHARE_SIZE]) -> ProjectivePoint {
    match decode_point(bytes) {
        Ok(point) => point,
        Err(_) => unreachable!("SPAKE2+ generator constants are valid curve points"),
    }
}

fn encode_point(point: &ProjectivePoint) -> Result<[u8; PUBLIC_SHARE_SIZE], CryptoError> {
    let encoded = point.to_affine().to_encoded_point(false);
    let bytes = encoded.as_bytes();
    if bytes.len() != PUBLIC_SHARE_SIZE {
        // The identity encodes as a single zero byte.
        return Err(CryptoError::DegenerateExchange);
    }
    let mut out = [0u8; PUBLIC_SHARE_SIZE];
    out.copy_from_slice(bytes);
    Ok(out)
}

fn x_coordinate(point: &ProjectivePoint) -> Result<[u8; 32], CryptoError> {
    let encoded = point.to_affine().to_encoded_point(false);
    let x = encoded.x().ok_or(CryptoError::DegenerateExchange)?;
    let mut out = [0u8; 32];
    out.copy_from_slice(x);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf::{derive_session_key, stretch_pin};

    fn fixed_salt() -> [u8; 32] {
        core::array::from_fn(|i| i as u8)
    }

    fn fixed_witness() -> PasswordWitness {
        let material = stretch_pin(b"12345678", &fixed_salt(), 2000);
        PasswordWitness::derive(&material)
    }

    fn reference_prover_share() -> [u8; 65] {
        // pA = x·G + w0·M for the fixed witness and x = 7, computed with
        // an independent P-256 implementation.
        let mut share = [0u8; 65];
        share.copy_from_slice(
            &hex::decode(
                "0410a948ecfc2b471b4c48c0cf283059607151857b3e423b1d9bb700592c433a2c\
                 76f5bc6e0d6064a9fa92dfbd1c51b6b5d45f91c662f2c55decf6e8a3aba84db2",
            )
            .unwrap(),
        );
        share
    }

    fn reference_y() -> [u8; 32] {
        core::array::from_fn(|i| (32 + i) as u8)
    }

    #[test]
    fn reference_exchange_vector() {
        let witness = fixed_witness();
        let exchange =
            verifier_exchange(&witness, &reference_prover_share(), &reference_y()).unwrap();

        assert_eq!(
            hex::encode(exchange.pb),
            "044912d231a5cb182fdf3431818496d7ac34ab65908fb731d6ca5c2c5c18fd0843\
             b15322a28530832691c95d9a7eba7f9f1ef1f67f2a2c29287d91fa6928225a66"
        );
        assert_eq!(
            hex::encode(exchange.shared_x()),
            "e3aa04dc711225a9d621c4073c072256e171fcd99e2d55298f133dd38b64769a"
        );
        assert_eq!(
            hex::encode(exchange.confirm_x()),
            "eb183c7ff74bf2f7c2b3da2a4b6d3412b8530d4d0e641c72ba7f7bf7d244f83f"
        );
    }

    #[test]
    fn reference_confirmation_and_key() {
        let witness = fixed_witness();
        let prover_share = reference_prover_share();
        let exchange = verifier_exchange(&witness, &prover_share, &reference_y()).unwrap();

        let tags = confirmation_tags(
            &fixed_salt(),
            2000,
            &prover_share,
            &exchange.pb,
            exchange.shared_x(),
            exchange.confirm_x(),
        );
        assert_eq!(
            hex::encode(tags.responder_tag()),
            "9a01dbc1beaf1d6ad451a35fbe574980a8e8beeaab429ad0a8d7a44f7e1874fa"
        );

        let expected_ca =
            hex::decode("574b7430770c5bc14338976bd0d27ee616a8a7e69ff4c9f25246b1b89efcd519")
                .unwrap();
        tags.verify_initiator(&expected_ca).unwrap();

        let key = derive_session_key(exchange.shared_x(), 1);
        assert_eq!(hex::encode(key), "b1806d55ef9458a733b1a369e75132b8");
    }

    #[test]
    fn wrong_confirmation_is_rejected() {
        let witness = fixed_witness();
        let prover_share = reference_prover_share();
        let exchange = verifier_exchange(&witness, &prover_share, &reference_y()).unwrap();
        let tags = confirmation_tags(
            &fixed_salt(),
            2000,
            &prover_share,
            &exchange.pb,
            exchange.shared_x(),
            exchange.confirm_x(),
        );

        assert_eq!(
            tags.verify_initiator(&[0u8; 32]),
            Err(CryptoError::ConfirmationMismatch)
        );
        assert_eq!(tags.verify_initiator(&[0u8; 16]), Err(CryptoError::ConfirmationMismatch));
    }

    #[test]
    fn compressed_share_is_rejected() {
        let witness = fixed_witness();
        let mut share = reference_prover_share();
        share[0] = 0x02;
        assert!(matches!(
            verifier_exchange(&witness, &share, &reference_y()),
            Err(CryptoError::InvalidPoint)
        ));
    }

    #[test]
    fn off_curve_share_is_rejected() {
        let witness = fixed_witness();
        let mut share = reference_prover_share();
        share[10] ^= 0xFF;
        assert!(matches!(
            verifier_exchange(&witness, &share, &reference_y()),
            Err(CryptoError::InvalidPoint)
        ));
    }

    /// Prover-side reference used to check key agreement from the other
    /// role: `Z = x·(pB − w0·N)` and `V = w1·(pB − w0·N)`.
    fn prover_secrets(
        witness: &PasswordWitness,
        x: &Scalar,
        responder_share: &[u8; 65],
    ) -> ([u8; 32], [u8; 32]) {
        let n = spake_constant(&SPAKE_N);
        let pb = decode_point(responder_share).unwrap();
        let shifted = pb - n * witness.w0;
        let z = shifted * *x;
        let v = shifted * witness.w1;
        (x_coordinate(&z).unwrap(), x_coordinate(&v).unwrap())
    }

    #[test]
    fn both_roles_agree_on_secrets() {
        let witness = fixed_witness();
        let m = spake_constant(&SPAKE_M);

        let x = reduce_scalar(&[0x5Au8; 32]);
        let pa_point = ProjectivePoint::GENERATOR * x + m * witness.w0;
        let pa = encode_point(&pa_point).unwrap();

        let y_random: [u8; 32] = core::array::from_fn(|i| (90 + i) as u8);
        let exchange = verifier_exchange(&witness, &pa, &y_random).unwrap();

        let (prover_z, prover_v) = prover_secrets(&witness, &x, &exchange.pb);
        assert_eq!(&prover_z, exchange.shared_x());
        assert_eq!(&prover_v, exchange.confirm_x());

        // Same passcode, both roles derive the same session key.
        assert_eq!(derive_session_key(&prover_z, 1), derive_session_key(exchange.shared_x(), 1));
    }

    #[test]
    fn wrong_pin_diverges() {
        let witness = fixed_witness();
        let wrong_material = stretch_pin(b"87654321", &fixed_salt(), 2000);
        let wrong_witness = PasswordWitness::derive(&wrong_material);

        let m = spake_constant(&SPAKE_M);
        let x = reduce_scalar(&[0x11u8; 32]);
        let pa_point = ProjectivePoint::GENERATOR * x + m * wrong_witness.w0;
        let pa = encode_point(&pa_point).unwrap();

        let exchange = verifier_exchange(&witness, &pa, &reference_y()).unwrap();
        let (prover_z, _) = prover_secrets(&wrong_witness, &x, &exchange.pb);
        assert_ne!(&prover_z, exchange.shared_x());
    }
}
