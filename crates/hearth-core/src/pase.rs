//! PASE handshake state machine (SPAKE2+ responder).
//!
//! The device is the verifier: the controller proves knowledge of the
//! setup PIN and both sides end up with the same 16-byte session key.
//! Each incoming message advances exactly one step; the engine is pure
//! (no I/O, injected RNG, time as a parameter) and returns the response
//! payload for the caller to frame and send.
//!
//! # State Machine
//!
//! ```text
//! Idle ──init──> Initialized ──PBKDFParamRequest──> PbkdfReqReceived
//!                                                        │
//!                                                   (respond)
//!                                                        ▼
//!      Pake1Received <──────────PAKE1────────── PbkdfRespSent
//!           │
//!      (respond pB,cB)
//!           ▼
//!       Pake2Sent ──PAKE3 (cA verifies)──> Pake3Received ──> Completed
//!           │                                                    │
//!           └────PAKE3 (cA mismatch)──> Error          take_session_key
//! ```
//!
//! A handshake that stalls for [`PASE_STALL_TIMEOUT_S`] (or died in
//! `Error`) is wiped and re-armed to `Initialized` by [`PaseEngine::tick`],
//! so an abandoned controller cannot wedge the commissioning window.

use rand::RngCore;
use zeroize::{Zeroize, Zeroizing};

use hearth_crypto::{
    Confirmation, PakeExchange, PasswordWitness, confirmation_tags, kdf, spake2p,
    verifier_exchange,
};
use hearth_proto::{Tag, TlvReader, TlvWriter, Value};

use crate::error::CoreError;

/// PBKDF2 iteration count offered to controllers.
pub const PASE_ITERATIONS: u32 = 2000;

/// Salt length in the PBKDF parameter response.
pub const PASE_SALT_SIZE: usize = 32;

/// Setup PIN length: exactly eight ASCII digits.
pub const SETUP_PIN_LEN: usize = 8;

/// Inactivity window after which a half-open handshake is abandoned.
pub const PASE_STALL_TIMEOUT_S: u64 = 60;

/// Handshake states, one per protocol step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaseState {
    /// No PIN installed; handshakes are rejected
    Idle,
    /// PIN installed, waiting for a controller
    Initialized,
    /// PBKDFParamRequest arrived (transient)
    PbkdfReqReceived,
    /// Parameters sent, waiting for PAKE1
    PbkdfRespSent,
    /// PAKE1 arrived (transient)
    Pake1Received,
    /// PAKE2 sent, waiting for PAKE3
    Pake2Sent,
    /// PAKE3 arrived (transient)
    Pake3Received,
    /// Confirmation verified; session key available
    Completed,
    /// Handshake failed; wiped, waiting for re-arm
    Error,
}

impl PaseState {
    fn name(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Initialized => "Initialized",
            Self::PbkdfReqReceived => "PbkdfReqReceived",
            Self::PbkdfRespSent => "PbkdfRespSent",
            Self::Pake1Received => "Pake1Received",
            Self::Pake2Sent => "Pake2Sent",
            Self::Pake3Received => "Pake3Received",
            Self::Completed => "Completed",
            Self::Error => "Error",
        }
    }
}

/// SPAKE2+ responder engine.
pub struct PaseEngine {
    state: PaseState,
    pin: Option<Zeroizing<[u8; SETUP_PIN_LEN]>>,
    salt: [u8; PASE_SALT_SIZE],
    witness: Option<PasswordWitness>,
    exchange: Option<PakeExchange>,
    confirmation: Option<Confirmation>,
    last_activity_s: u64,
}

impl Default for PaseEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PaseEngine {
    /// Engine in `Idle`; call [`PaseEngine::init`] to arm it.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: PaseState::Idle,
            pin: None,
            salt: [0u8; PASE_SALT_SIZE],
            witness: None,
            exchange: None,
            confirmation: None,
            last_activity_s: 0,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> PaseState {
        self.state
    }

    /// Install the setup PIN and arm the engine.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidInput`] unless the PIN is exactly eight
    /// ASCII digits.
    pub fn init(&mut self, pin: &str, now_s: u64) -> Result<(), CoreError> {
        if pin.len() != SETUP_PIN_LEN || !pin.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CoreError::InvalidInput("setup PIN must be 8 ASCII digits"));
        }
        self.wipe();
        let mut digits = Zeroizing::new([0u8; SETUP_PIN_LEN]);
        digits.copy_from_slice(pin.as_bytes());
        self.pin = Some(digits);
        self.state = PaseState::Initialized;
        self.last_activity_s = now_s;
        Ok(())
    }

    /// Handle PBKDFParamRequest; returns the parameter response TLV.
    ///
    /// Generates a fresh salt, stretches the PIN and derives the
    /// password witnesses.
    pub fn handle_pbkdf_request(
        &mut self,
        _payload: &[u8],
        rng: &mut dyn RngCore,
        now_s: u64,
    ) -> Result<Vec<u8>, CoreError> {
        self.expect(PaseState::Initialized, "handle PBKDFParamRequest")?;
        self.state = PaseState::PbkdfReqReceived;

        rng.fill_bytes(&mut self.salt);
        let pin = self.pin.as_ref().ok_or_else(|| CoreError::ProtocolState {
            state: PaseState::PbkdfReqReceived.name(),
            operation: "stretch PIN",
        })?;
        let material = kdf::stretch_pin(pin.as_slice(), &self.salt, PASE_ITERATIONS);
        self.witness = Some(PasswordWitness::derive(&material));

        let mut buf = [0u8; 64];
        let mut writer = TlvWriter::new(&mut buf);
        writer.start_structure(Tag::Anonymous)?;
        writer.put_u64(Tag::Context(1), u64::from(PASE_ITERATIONS))?;
        writer.put_bytes(Tag::Context(2), &self.salt)?;
        writer.end_container()?;
        let len = writer.len();

        self.state = PaseState::PbkdfRespSent;
        self.last_activity_s = now_s;
        tracing::debug!("PASE parameters issued");
        Ok(buf[..len].to_vec())
    }

    /// Handle PAKE1; returns the PAKE2 TLV (`pB` and confirmation `cB`).
    pub fn handle_pake1(
        &mut self,
        payload: &[u8],
        rng: &mut dyn RngCore,
        now_s: u64,
    ) -> Result<Vec<u8>, CoreError> {
        self.expect(PaseState::PbkdfRespSent, "handle PAKE1")?;
        self.state = PaseState::Pake1Received;

        let share = match context_bytes(payload, 1, "PAKE1 missing pA") {
            Ok(share) => share,
            Err(err) => return Err(self.fail(err)),
        };
        let prover_share: [u8; spake2p::PUBLIC_SHARE_SIZE] = share
            .try_into()
            .map_err(|_| self.fail(CoreError::MalformedPayload("pA is not 65 bytes")))?;

        let witness = match self.witness.as_ref() {
            Some(witness) => witness,
            None => {
                return Err(self.fail(CoreError::ProtocolState {
                    state: PaseState::Pake1Received.name(),
                    operation: "load witness",
                }));
            },
        };

        let mut y_random = Zeroizing::new([0u8; 32]);
        rng.fill_bytes(y_random.as_mut_slice());
        let exchange = match verifier_exchange(witness, &prover_share, &y_random) {
            Ok(exchange) => exchange,
            Err(err) => return Err(self.fail(err.into())),
        };

        let tags = confirmation_tags(
            &self.salt,
            PASE_ITERATIONS,
            &prover_share,
            &exchange.pb,
            exchange.shared_x(),
            exchange.confirm_x(),
        );

        let mut buf = [0u8; 128];
        let mut writer = TlvWriter::new(&mut buf);
        writer.start_structure(Tag::Anonymous)?;
        writer.put_bytes(Tag::Context(1), &exchange.pb)?;
        writer.put_bytes(Tag::Context(2), &tags.responder_tag())?;
        writer.end_container()?;
        let len = writer.len();

        self.exchange = Some(exchange);
        self.confirmation = Some(tags);
        self.state = PaseState::Pake2Sent;
        self.last_activity_s = now_s;
        tracing::debug!("PASE share exchanged");
        Ok(buf[..len].to_vec())
    }

    /// Handle PAKE3: verify the prover's confirmation tag.
    ///
    /// On success the engine is `Completed` and
    /// [`PaseEngine::take_session_key`] yields the key. On mismatch the
    /// engine wipes itself into `Error` and the caller drops the packet
    /// without responding.
    pub fn handle_pake3(&mut self, payload: &[u8], now_s: u64) -> Result<(), CoreError> {
        self.expect(PaseState::Pake2Sent, "handle PAKE3")?;
        self.state = PaseState::Pake3Received;

        let tag = match context_bytes(payload, 1, "PAKE3 missing cA") {
            Ok(tag) => tag,
            Err(err) => return Err(self.fail(err)),
        };
        let confirmation = match self.confirmation.as_ref() {
            Some(confirmation) => confirmation,
            None => {
                return Err(self.fail(CoreError::ProtocolState {
                    state: PaseState::Pake3Received.name(),
                    operation: "load confirmation",
                }));
            },
        };

        if let Err(err) = confirmation.verify_initiator(tag) {
            return Err(self.fail(err.into()));
        }

        self.state = PaseState::Completed;
        self.last_activity_s = now_s;
        tracing::info!("PASE handshake completed");
        Ok(())
    }

    /// Derive the session key for `session_id` after completion.
    ///
    /// Handshake material is consumed: a second call fails.
    pub fn take_session_key(&mut self, session_id: u16) -> Result<[u8; 16], CoreError> {
        self.expect(PaseState::Completed, "take session key")?;
        let exchange = self.exchange.take().ok_or_else(|| CoreError::ProtocolState {
            state: PaseState::Completed.name(),
            operation: "take session key",
        })?;
        let key = kdf::derive_session_key(exchange.shared_x(), session_id);
        self.confirmation = None;
        Ok(key)
    }

    /// Abandon a stalled or failed handshake.
    ///
    /// Returns true if the engine re-armed itself to `Initialized`
    /// (PIN retained). `Completed` and quiescent states are untouched.
    pub fn tick(&mut self, now_s: u64) -> bool {
        let in_handshake = matches!(
            self.state,
            PaseState::PbkdfReqReceived
                | PaseState::PbkdfRespSent
                | PaseState::Pake1Received
                | PaseState::Pake2Sent
                | PaseState::Pake3Received
        );
        let stalled = in_handshake
            && now_s.saturating_sub(self.last_activity_s) >= PASE_STALL_TIMEOUT_S;

        if stalled || self.state == PaseState::Error {
            if stalled {
                tracing::warn!(state = self.state.name(), "abandoning stalled PASE handshake");
            }
            let pin = self.pin.take();
            self.wipe();
            self.pin = pin;
            self.state =
                if self.pin.is_some() { PaseState::Initialized } else { PaseState::Idle };
            self.last_activity_s = now_s;
            return true;
        }
        false
    }

    /// Wipe everything, including the PIN, and return to `Idle`.
    pub fn reset(&mut self) {
        self.wipe();
        self.state = PaseState::Idle;
    }

    fn expect(&self, state: PaseState, operation: &'static str) -> Result<(), CoreError> {
        if self.state == state {
            Ok(())
        } else {
            Err(CoreError::ProtocolState { state: self.state.name(), operation })
        }
    }

    /// Record a handshake failure: wipe secrets, keep the error.
    fn fail(&mut self, err: CoreError) -> CoreError {
        let pin = self.pin.take();
        self.wipe();
        self.pin = pin;
        self.state = PaseState::Error;
        tracing::warn!(error = %err, "PASE handshake failed");
        err
    }

    fn wipe(&mut self) {
        self.pin = None;
        self.salt.zeroize();
        self.witness = None;
        self.exchange = None;
        self.confirmation = None;
    }
}

/// Extract the byte-string field under a context tag from a one-level
/// TLV structure, skipping unknown members.
fn context_bytes<'a>(
    payload: &'a [u8],
    tag: u8,
    missing: &'static str,
) -> Result<&'a [u8], CoreError> {
    let mut reader = TlvReader::new(payload);
    let Some(root) = reader.next()? else {
        return Err(CoreError::MalformedPayload(missing));
    };
    if root.value != Value::StructureStart {
        return Err(CoreError::MalformedPayload(missing));
    }
    loop {
        let Some(element) = reader.peek()? else {
            return Err(CoreError::MalformedPayload(missing));
        };
        if element.value == Value::ContainerEnd {
            return Err(CoreError::MalformedPayload(missing));
        }
        if element.has_context_tag(tag) {
            let element = reader.next()?.ok_or(CoreError::MalformedPayload(missing))?;
            return element.value.as_bytes().ok_or(CoreError::MalformedPayload(missing));
        }
        reader.skip()?;
    }
}
