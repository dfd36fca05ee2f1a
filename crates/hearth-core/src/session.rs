//! Secured session table: AES-128-CCM sealing with replay protection.
//!
//! At most [`MAX_SESSIONS`] sessions exist at a time; each binds a
//! 16-byte key (installed by PASE) to per-direction counters. Outbound
//! messages consume the session's transmit counter, which also forms
//! the CCM nonce, so nonces never repeat under a key until the counter
//! wraps. Inbound message counters must strictly exceed the last
//! accepted value - anything else is a replay and is dropped without a
//! response.
//!
//! Session id 0 is the unsecured session and is never stored here.
//! Idle sessions are swept after [`SESSION_IDLE_TIMEOUT_S`]; destroyed
//! sessions have their key material zeroized.

use zeroize::Zeroize;

use hearth_crypto::aead;

use crate::error::CoreError;

/// Fixed session table capacity.
pub const MAX_SESSIONS: usize = 5;

/// Idle lifetime before a session is garbage-collected, seconds.
pub const SESSION_IDLE_TIMEOUT_S: u64 = 3600;

/// Reserved id for unsecured traffic; never installed in the table.
pub const UNSECURED_SESSION_ID: u16 = 0;

struct SessionRecord {
    id: u16,
    key: [u8; 16],
    tx_counter: u32,
    /// Highest inbound counter accepted; None until the first packet.
    last_rx_counter: Option<u32>,
    last_used_s: u64,
}

impl Drop for SessionRecord {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Table of secured sessions.
///
/// Single-writer: only the protocol coordinator touches it, so there is
/// no interior locking.
#[derive(Default)]
pub struct SessionManager {
    sessions: Vec<SessionRecord>,
}

impl SessionManager {
    /// Empty session table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True if no sessions are installed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// True if `session_id` is installed.
    #[must_use]
    pub fn contains(&self, session_id: u16) -> bool {
        self.sessions.iter().any(|s| s.id == session_id)
    }

    /// Install a session key under `session_id`.
    ///
    /// Re-installing an existing id replaces (and zeroizes) the old
    /// record, which is how a re-commissioned controller re-keys.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidInput`] for session id 0
    /// - [`CoreError::SessionLimitReached`] when the table is full
    pub fn install(&mut self, session_id: u16, key: [u8; 16], now_s: u64) -> Result<(), CoreError> {
        if session_id == UNSECURED_SESSION_ID {
            return Err(CoreError::InvalidInput("session id 0 is reserved"));
        }
        self.destroy(session_id);
        if self.sessions.len() >= MAX_SESSIONS {
            return Err(CoreError::SessionLimitReached { capacity: MAX_SESSIONS });
        }
        self.sessions.push(SessionRecord {
            id: session_id,
            key,
            tx_counter: 0,
            last_rx_counter: None,
            last_used_s: now_s,
        });
        tracing::debug!(session_id, "session installed");
        Ok(())
    }

    /// Seal a payload for `session_id`.
    ///
    /// Returns `nonce(13) || ciphertext || tag(16)` and advances the
    /// session's transmit counter.
    pub fn encrypt(
        &mut self,
        session_id: u16,
        plaintext: &[u8],
        now_s: u64,
    ) -> Result<Vec<u8>, CoreError> {
        let session = self.lookup(session_id)?;
        let nonce = aead::build_nonce(session_id, session.tx_counter);
        let sealed = aead::seal(&session.key, &nonce, plaintext)?;
        session.tx_counter = session.tx_counter.wrapping_add(1);
        session.last_used_s = now_s;

        let mut framed = Vec::with_capacity(aead::NONCE_SIZE + sealed.len());
        framed.extend_from_slice(&nonce);
        framed.extend_from_slice(&sealed);
        Ok(framed)
    }

    /// Open a sealed payload for `session_id`.
    ///
    /// # Errors
    ///
    /// - [`CoreError::MalformedPayload`] if the frame is shorter than
    ///   nonce + tag
    /// - [`CoreError::Crypto`] ([`hearth_crypto::CryptoError::AuthFailure`])
    ///   on tag mismatch; no partial plaintext is returned
    pub fn decrypt(
        &mut self,
        session_id: u16,
        framed: &[u8],
        now_s: u64,
    ) -> Result<Vec<u8>, CoreError> {
        let session = self.lookup(session_id)?;
        if framed.len() < aead::NONCE_SIZE + aead::TAG_SIZE {
            return Err(CoreError::MalformedPayload("sealed frame too short"));
        }
        let mut nonce = [0u8; aead::NONCE_SIZE];
        nonce.copy_from_slice(&framed[..aead::NONCE_SIZE]);
        let plaintext = aead::open(&session.key, &nonce, &framed[aead::NONCE_SIZE..])?;
        session.last_used_s = now_s;
        Ok(plaintext)
    }

    /// Enforce the strictly-increasing inbound counter window.
    ///
    /// Call after the frame authenticates, so forged counters cannot
    /// advance the window.
    pub fn check_replay(&mut self, session_id: u16, counter: u32) -> Result<(), CoreError> {
        let session = self.lookup(session_id)?;
        if let Some(last) = session.last_rx_counter {
            if counter <= last {
                return Err(CoreError::ReplayDetected {
                    session_id,
                    counter,
                    last_accepted: last,
                });
            }
        }
        session.last_rx_counter = Some(counter);
        Ok(())
    }

    /// Destroy one session, zeroizing its key. Returns false if absent.
    pub fn destroy(&mut self, session_id: u16) -> bool {
        let before = self.sessions.len();
        self.sessions.retain(|s| s.id != session_id);
        self.sessions.len() != before
    }

    /// Sweep sessions idle for [`SESSION_IDLE_TIMEOUT_S`] or longer.
    ///
    /// Returns the ids that were destroyed so the caller can drop the
    /// subscriptions riding on them.
    pub fn cleanup_expired(&mut self, now_s: u64) -> Vec<u16> {
        let mut expired = Vec::new();
        self.sessions.retain(|s| {
            let idle = now_s.saturating_sub(s.last_used_s);
            if idle >= SESSION_IDLE_TIMEOUT_S {
                expired.push(s.id);
                false
            } else {
                true
            }
        });
        if !expired.is_empty() {
            tracing::info!(?expired, "expired idle sessions");
        }
        expired
    }

    fn lookup(&mut self, session_id: u16) -> Result<&mut SessionRecord, CoreError> {
        self.sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or(CoreError::SessionNotFound { session_id })
    }
}
