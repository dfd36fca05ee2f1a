//! Commissioning orchestration: PASE routing, fabrics, discriminator.
//!
//! The manager owns the PASE engine and the fabric table, routes
//! secure-channel opcodes into the engine (responding with the request
//! opcode plus one), and installs the derived key into the session
//! manager when the handshake completes. The 12-bit discriminator is
//! generated once, persisted, and reused across reboots; the setup PIN
//! is derived elsewhere and supplied to [`CommissioningManager::start`].

use rand::RngCore;

use hearth_proto::SecureChannelOpcode;

use crate::error::CoreError;
use crate::fabric::{Fabric, FabricTable};
use crate::pase::{PaseEngine, PaseState};
use crate::session::SessionManager;
use crate::storage::KvStore;

/// Storage key for the persisted discriminator (2 bytes, little-endian).
pub const DISCRIMINATOR_KEY: &str = "matter_discriminator";

/// Commissioning lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommissioningState {
    /// Not started; no PIN installed
    Idle,
    /// Window open, PASE armed or in progress
    PaseStarted,
    /// A PASE session key is installed
    Commissioned,
    /// Last handshake failed; re-armed on the next tick
    Error,
}

/// A PASE response to frame and send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaseResponse {
    /// Response opcode (request opcode + 1)
    pub opcode: SecureChannelOpcode,
    /// TLV payload
    pub payload: Vec<u8>,
}

/// Commissioning manager.
pub struct CommissioningManager {
    state: CommissioningState,
    engine: PaseEngine,
    fabrics: FabricTable,
    discriminator: u16,
}

impl CommissioningManager {
    /// Load persisted state: the fabric table and the discriminator
    /// (generated and persisted on first boot).
    pub fn load(store: &dyn KvStore, rng: &mut dyn RngCore) -> Result<Self, CoreError> {
        let fabrics = FabricTable::load(store)?;
        let discriminator = load_or_create_discriminator(store, rng)?;
        tracing::info!(
            discriminator,
            fabrics = fabrics.len(),
            "commissioning state loaded"
        );
        Ok(Self { state: CommissioningState::Idle, engine: PaseEngine::new(), fabrics, discriminator })
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> CommissioningState {
        self.state
    }

    /// State of the underlying PASE engine.
    #[must_use]
    pub fn pase_state(&self) -> PaseState {
        self.engine.state()
    }

    /// The persisted 12-bit discriminator.
    #[must_use]
    pub fn discriminator(&self) -> u16 {
        self.discriminator
    }

    /// Installed fabrics.
    #[must_use]
    pub fn fabrics(&self) -> &FabricTable {
        &self.fabrics
    }

    /// A device with at least one fabric is commissioned.
    #[must_use]
    pub fn is_commissioned(&self) -> bool {
        self.fabrics.is_commissioned()
    }

    /// Open the commissioning window with the given setup PIN.
    pub fn start(&mut self, pin: &str, now_s: u64) -> Result<(), CoreError> {
        self.engine.init(pin, now_s)?;
        self.state = CommissioningState::PaseStarted;
        tracing::info!("commissioning window open");
        Ok(())
    }

    /// Route one secure-channel request into the PASE engine.
    ///
    /// `session_id` is the id the coordinator reserved for the session
    /// under negotiation; on PAKE3 success the derived key is installed
    /// there. Returns the response to send, or `None` when the step
    /// produces no reply (PAKE3).
    pub fn handle_secure_channel(
        &mut self,
        opcode: SecureChannelOpcode,
        payload: &[u8],
        session_id: u16,
        sessions: &mut SessionManager,
        rng: &mut dyn RngCore,
        now_s: u64,
    ) -> Result<Option<PaseResponse>, CoreError> {
        let result = match opcode {
            SecureChannelOpcode::PbkdfParamRequest => self
                .engine
                .handle_pbkdf_request(payload, rng, now_s)
                .map(|payload| {
                    Some(PaseResponse { opcode: SecureChannelOpcode::PbkdfParamResponse, payload })
                }),
            SecureChannelOpcode::Pake1 => {
                self.engine.handle_pake1(payload, rng, now_s).map(|payload| {
                    Some(PaseResponse { opcode: SecureChannelOpcode::Pake2, payload })
                })
            },
            SecureChannelOpcode::Pake3 => {
                self.complete_pase(payload, session_id, sessions, now_s)
            },
            SecureChannelOpcode::PbkdfParamResponse | SecureChannelOpcode::Pake2 => {
                Err(CoreError::ProtocolState {
                    state: "responder",
                    operation: "handle a responder opcode",
                })
            },
        };

        if let Err(err) = &result {
            if self.engine.state() == PaseState::Error {
                self.state = CommissioningState::Error;
            }
            tracing::debug!(error = %err, ?opcode, "secure channel request failed");
        }
        result
    }

    fn complete_pase(
        &mut self,
        payload: &[u8],
        session_id: u16,
        sessions: &mut SessionManager,
        now_s: u64,
    ) -> Result<Option<PaseResponse>, CoreError> {
        self.engine.handle_pake3(payload, now_s)?;
        let key = self.engine.take_session_key(session_id)?;
        sessions.install(session_id, key, now_s)?;
        self.state = CommissioningState::Commissioned;
        tracing::info!(session_id, "PASE session established");
        Ok(None)
    }

    /// Install a fabric and persist the table.
    pub fn register_fabric(&mut self, fabric: Fabric, store: &dyn KvStore) -> Result<(), CoreError> {
        self.fabrics.add(fabric)?;
        self.fabrics.save(store)?;
        Ok(())
    }

    /// Factory reset: drop all fabrics, persist the empty table, wipe
    /// the PASE engine and return to `Idle`.
    pub fn reset(&mut self, store: &dyn KvStore) -> Result<(), CoreError> {
        self.fabrics.clear();
        self.fabrics.save(store)?;
        self.engine.reset();
        self.state = CommissioningState::Idle;
        tracing::info!("commissioning reset");
        Ok(())
    }

    /// Periodic maintenance: abandon stalled or failed handshakes.
    pub fn tick(&mut self, now_s: u64) {
        if self.engine.tick(now_s)
            && self.engine.state() == PaseState::Initialized
            && matches!(self.state, CommissioningState::PaseStarted | CommissioningState::Error)
        {
            self.state = CommissioningState::PaseStarted;
        }
    }
}

fn load_or_create_discriminator(
    store: &dyn KvStore,
    rng: &mut dyn RngCore,
) -> Result<u16, CoreError> {
    let mut buf = [0u8; 2];
    if let Some(2) = store.read(DISCRIMINATOR_KEY, &mut buf)? {
        return Ok(u16::from_le_bytes(buf) & 0x0FFF);
    }

    let mut random = [0u8; 2];
    rng.fill_bytes(&mut random);
    let discriminator = u16::from_le_bytes(random) & 0x0FFF;
    store.write(DISCRIMINATOR_KEY, &discriminator.to_le_bytes())?;
    tracing::info!(discriminator, "generated discriminator");
    Ok(discriminator)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use hearth_proto::{Tag, TlvWriter};

    use super::*;
    use crate::storage::StorageError;

    /// Minimal in-memory store for core-level tests.
    #[derive(Default)]
    struct TestStore {
        records: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl KvStore for TestStore {
        fn write(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
            self.records.lock().unwrap().insert(key.to_string(), data.to_vec());
            Ok(())
        }

        fn read(&self, key: &str, buf: &mut [u8]) -> Result<Option<usize>, StorageError> {
            match self.records.lock().unwrap().get(key) {
                None => Ok(None),
                Some(data) if data.len() <= buf.len() => {
                    buf[..data.len()].copy_from_slice(data);
                    Ok(Some(data.len()))
                },
                Some(data) => Err(StorageError::BufferTooSmall {
                    key: key.to_string(),
                    needed: data.len(),
                    capacity: buf.len(),
                }),
            }
        }
    }

    struct CountingRng {
        next: u8,
    }

    impl RngCore for CountingRng {
        fn next_u32(&mut self) -> u32 {
            let mut bytes = [0u8; 4];
            self.fill_bytes(&mut bytes);
            u32::from_le_bytes(bytes)
        }

        fn next_u64(&mut self) -> u64 {
            let mut bytes = [0u8; 8];
            self.fill_bytes(&mut bytes);
            u64::from_le_bytes(bytes)
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            for byte in dest {
                *byte = self.next;
                self.next = self.next.wrapping_add(1);
            }
        }

        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
            self.fill_bytes(dest);
            Ok(())
        }
    }

    fn pake1_payload() -> Vec<u8> {
        let pa = hex::decode(
            "0410a948ecfc2b471b4c48c0cf283059607151857b3e423b1d9bb700592c433a2c\
             76f5bc6e0d6064a9fa92dfbd1c51b6b5d45f91c662f2c55decf6e8a3aba84db2",
        )
        .unwrap();
        tlv_bytes(&pa)
    }

    fn pake3_payload() -> Vec<u8> {
        let ca = hex::decode("574b7430770c5bc14338976bd0d27ee616a8a7e69ff4c9f25246b1b89efcd519")
            .unwrap();
        tlv_bytes(&ca)
    }

    fn tlv_bytes(data: &[u8]) -> Vec<u8> {
        let mut buf = [0u8; 128];
        let mut writer = TlvWriter::new(&mut buf);
        writer.start_structure(Tag::Anonymous).unwrap();
        writer.put_bytes(Tag::Context(1), data).unwrap();
        writer.end_container().unwrap();
        let len = writer.len();
        buf[..len].to_vec()
    }

    #[test]
    fn discriminator_is_generated_once_and_persisted() {
        let store = TestStore::default();
        let first = CommissioningManager::load(&store, &mut CountingRng { next: 0x5A })
            .unwrap()
            .discriminator();
        let second = CommissioningManager::load(&store, &mut CountingRng { next: 0x11 })
            .unwrap()
            .discriminator();

        assert_eq!(first, second, "discriminator must survive reloads");
        assert!(first <= 0x0FFF, "discriminator is 12 bits");
    }

    #[test]
    fn full_commissioning_flow_installs_the_session() {
        let store = TestStore::default();
        let mut rng = CountingRng { next: 0 };
        let mut manager = CommissioningManager::load(&store, &mut CountingRng { next: 0 }).unwrap();
        let mut sessions = SessionManager::new();

        manager.start("12345678", 0).unwrap();
        assert_eq!(manager.state(), CommissioningState::PaseStarted);

        let resp = manager
            .handle_secure_channel(
                SecureChannelOpcode::PbkdfParamRequest,
                &[],
                1,
                &mut sessions,
                &mut rng,
                1,
            )
            .unwrap()
            .unwrap();
        assert_eq!(resp.opcode, SecureChannelOpcode::PbkdfParamResponse);

        let resp = manager
            .handle_secure_channel(
                SecureChannelOpcode::Pake1,
                &pake1_payload(),
                1,
                &mut sessions,
                &mut rng,
                2,
            )
            .unwrap()
            .unwrap();
        assert_eq!(resp.opcode, SecureChannelOpcode::Pake2);

        let resp = manager
            .handle_secure_channel(
                SecureChannelOpcode::Pake3,
                &pake3_payload(),
                1,
                &mut sessions,
                &mut rng,
                3,
            )
            .unwrap();
        assert!(resp.is_none(), "PAKE3 success sends no PASE response");
        assert_eq!(manager.state(), CommissioningState::Commissioned);
        assert!(sessions.contains(1));

        // The installed key seals traffic.
        let framed = sessions.encrypt(1, b"hello", 4).unwrap();
        assert_eq!(sessions.decrypt(1, &framed, 5).unwrap(), b"hello");
    }

    #[test]
    fn responder_opcodes_are_rejected() {
        let store = TestStore::default();
        let mut rng = CountingRng { next: 0 };
        let mut manager = CommissioningManager::load(&store, &mut CountingRng { next: 0 }).unwrap();
        let mut sessions = SessionManager::new();
        manager.start("12345678", 0).unwrap();

        assert!(matches!(
            manager.handle_secure_channel(
                SecureChannelOpcode::Pake2,
                &[],
                1,
                &mut sessions,
                &mut rng,
                0,
            ),
            Err(CoreError::ProtocolState { .. })
        ));
    }

    #[test]
    fn failed_handshake_rearms_on_tick() {
        let store = TestStore::default();
        let mut rng = CountingRng { next: 0 };
        let mut manager = CommissioningManager::load(&store, &mut CountingRng { next: 0 }).unwrap();
        let mut sessions = SessionManager::new();
        manager.start("12345678", 0).unwrap();

        manager
            .handle_secure_channel(
                SecureChannelOpcode::PbkdfParamRequest,
                &[],
                1,
                &mut sessions,
                &mut rng,
                0,
            )
            .unwrap();
        manager
            .handle_secure_channel(
                SecureChannelOpcode::Pake1,
                &pake1_payload(),
                1,
                &mut sessions,
                &mut rng,
                0,
            )
            .unwrap();
        // Wrong confirmation tag.
        let err = manager
            .handle_secure_channel(
                SecureChannelOpcode::Pake3,
                &tlv_bytes(&[0u8; 32]),
                1,
                &mut sessions,
                &mut rng,
                0,
            )
            .unwrap_err();
        assert!(err.is_silent_drop());
        assert_eq!(manager.state(), CommissioningState::Error);
        assert!(!sessions.contains(1));

        manager.tick(1);
        assert_eq!(manager.state(), CommissioningState::PaseStarted);
        assert_eq!(manager.pase_state(), PaseState::Initialized);
    }

    #[test]
    fn fabric_registration_persists() {
        let store = TestStore::default();
        let mut manager = CommissioningManager::load(&store, &mut CountingRng { next: 0 }).unwrap();

        let mut root_public_key = [0u8; 65];
        root_public_key[0] = 0x04;
        let fabric =
            Fabric { fabric_id: 0xAB, vendor_id: 0xFFF1, root_public_key, last_seen: 77 };
        manager.register_fabric(fabric, &store).unwrap();
        assert!(manager.is_commissioned());

        let reloaded = CommissioningManager::load(&store, &mut CountingRng { next: 0 }).unwrap();
        assert_eq!(reloaded.fabrics().get(0xAB), Some(&fabric));
        assert!(reloaded.is_commissioned());
    }

    #[test]
    fn reset_clears_and_persists_empty_fabrics() {
        let store = TestStore::default();
        let mut manager = CommissioningManager::load(&store, &mut CountingRng { next: 0 }).unwrap();

        let mut root_public_key = [0u8; 65];
        root_public_key[0] = 0x04;
        manager
            .register_fabric(
                Fabric { fabric_id: 1, vendor_id: 1, root_public_key, last_seen: 0 },
                &store,
            )
            .unwrap();

        manager.reset(&store).unwrap();
        assert_eq!(manager.state(), CommissioningState::Idle);
        assert!(!manager.is_commissioned());

        let reloaded = CommissioningManager::load(&store, &mut CountingRng { next: 0 }).unwrap();
        assert!(!reloaded.is_commissioned());
    }
}
