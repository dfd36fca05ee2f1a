//! Protocol coordinator: dispatch loop and owner of all protocol state.
//!
//! One task owns the session table, the PASE/commissioning machinery,
//! the subscription table, the outbound counters and the transport -
//! nothing protocol-side needs a lock except the attribute store and
//! the subscription table, which the sensor-side change callback also
//! touches.
//!
//! Per loop turn the coordinator: receives a datagram (decode, decrypt,
//! replay-check, dispatch on protocol id and opcode, respond over the
//! reverse path), drains sensor samples into the attribute store,
//! services change-report requests handed over by the store callback,
//! and on a short maintenance tick sweeps idle sessions, stalled
//! handshakes and max-interval report deadlines.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use rand::rngs::OsRng;
use tokio::sync::mpsc;

use hearth_core::{
    AttributeReport, AttributeStore, CommissioningManager, CoreError, KvStore, ReadRequest,
    SessionManager, Status, SubscribeRequest, SubscriptionManager, UNSECURED_SESSION_ID,
    interaction, read_attribute,
};
use hearth_proto::{
    InteractionOpcode, MAX_MESSAGE_SIZE, Message, MessageCounters, MessageHeader,
    PROTOCOL_ID_INTERACTION_MODEL, PROTOCOL_ID_SECURE_CHANNEL, ProtocolHeader,
    SecureChannelOpcode,
};

use crate::error::BridgeError;
use crate::sensor::{self, SensorQueue};
use crate::transport::{PortKind, RxPacket, UdpTransport, from_canonical};

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Setup PIN supplied to the PASE engine (8 ASCII digits)
    pub setup_pin: String,
    /// First session id handed to a PASE peer
    pub first_pase_session_id: u16,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self { setup_pin: "20202021".to_string(), first_pase_session_id: 1 }
    }
}

/// Last-known peer of a session, for device-initiated reports.
#[derive(Debug, Clone, Copy)]
struct PeerInfo {
    ip: [u8; 16],
    port: u16,
    kind: PortKind,
}

/// Protocol coordinator.
pub struct Coordinator {
    transport: Arc<UdpTransport>,
    store: AttributeStore,
    sessions: SessionManager,
    subscriptions: Arc<Mutex<SubscriptionManager>>,
    commissioning: CommissioningManager,
    counters: MessageCounters,
    sensor_queue: SensorQueue,
    report_rx: Option<mpsc::UnboundedReceiver<u32>>,
    session_peers: HashMap<u16, PeerInfo>,
    next_pase_session: u16,
    epoch: Instant,
}

impl Coordinator {
    /// Build a coordinator over a bound transport and a storage
    /// backend, opening the commissioning window with the configured
    /// PIN.
    pub fn new(
        transport: UdpTransport,
        storage: &dyn KvStore,
        config: &CoordinatorConfig,
    ) -> Result<Self, BridgeError> {
        let store = AttributeStore::new();
        let subscriptions = Arc::new(Mutex::new(SubscriptionManager::new()));
        let mut commissioning = CommissioningManager::load(storage, &mut OsRng)?;
        commissioning.start(&config.setup_pin, 0)?;

        // Subscription bridge: the store's change callback asks the
        // subscription table which subscriptions are due under their
        // min interval and hands their ids to the protocol task.
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let epoch = Instant::now();
        let callback_subs = Arc::clone(&subscriptions);
        store.subscribe(move |path, _value| {
            let now_ms = epoch.elapsed().as_millis() as u64;
            let due = callback_subs
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .on_change(path, now_ms);
            for id in due {
                let _ = report_tx.send(id);
            }
        });

        Ok(Self {
            transport: Arc::new(transport),
            store,
            sessions: SessionManager::new(),
            subscriptions,
            commissioning,
            counters: MessageCounters::new(),
            sensor_queue: SensorQueue::new(),
            report_rx: Some(report_rx),
            session_peers: HashMap::new(),
            next_pase_session: config.first_pase_session_id.max(1),
            epoch,
        })
    }

    /// Handle to the attribute store (sensor side, tests).
    #[must_use]
    pub fn attribute_store(&self) -> AttributeStore {
        self.store.clone()
    }

    /// Handle to the sensor sample queue.
    #[must_use]
    pub fn sensor_queue(&self) -> SensorQueue {
        self.sensor_queue.clone()
    }

    /// Actual operational port.
    #[must_use]
    pub fn operational_port(&self) -> u16 {
        self.transport.operational_port()
    }

    /// Actual commissioning port.
    #[must_use]
    pub fn commissioning_port(&self) -> u16 {
        self.transport.commissioning_port()
    }

    /// Persisted discriminator.
    #[must_use]
    pub fn discriminator(&self) -> u16 {
        self.commissioning.discriminator()
    }

    /// True once at least one fabric is installed.
    #[must_use]
    pub fn is_commissioned(&self) -> bool {
        self.commissioning.is_commissioned()
    }

    /// Run the protocol loop until the task is cancelled.
    pub async fn run(mut self) -> Result<(), BridgeError> {
        let transport = Arc::clone(&self.transport);
        let sensor_queue = self.sensor_queue.clone();
        let Some(mut report_rx) = self.report_rx.take() else {
            return Err(BridgeError::Config("coordinator already running".to_string()));
        };

        let mut maintenance = tokio::time::interval(Duration::from_millis(250));
        maintenance.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                packet = transport.receive() => {
                    self.handle_packet(packet).await;
                },
                sample = sensor_queue.recv() => {
                    sensor::apply_sample(&self.store, sample);
                },
                Some(subscription_id) = report_rx.recv() => {
                    self.emit_report(subscription_id).await;
                },
                _ = maintenance.tick() => {
                    self.periodic().await;
                },
            }
        }
    }

    async fn handle_packet(&mut self, packet: RxPacket) {
        let now_s = self.now_s();

        let message = match Message::decode(&packet.data) {
            Ok(message) => message,
            Err(err) => {
                tracing::debug!(error = %err, peer = %packet.peer(), "undecodable message");
                return;
            },
        };

        let session_id = message.header.session_id;
        let plaintext = if session_id == UNSECURED_SESSION_ID {
            message.payload.to_vec()
        } else {
            let plaintext = match self.sessions.decrypt(session_id, &message.payload, now_s) {
                Ok(plaintext) => plaintext,
                // Authentication failures drop silently.
                Err(err) => {
                    tracing::debug!(session_id, error = %err, "dropping undecryptable message");
                    return;
                },
            };
            if let Err(err) = self.sessions.check_replay(session_id, message.header.counter) {
                tracing::debug!(session_id, error = %err, "dropping replayed message");
                return;
            }
            plaintext
        };

        let (header, app) = match ProtocolHeader::decode(&plaintext) {
            Ok(decoded) => decoded,
            Err(err) => {
                tracing::debug!(error = %err, "missing protocol header");
                return;
            },
        };

        self.session_peers.insert(
            session_id,
            PeerInfo { ip: packet.peer_ip, port: packet.peer_port, kind: packet.port },
        );

        let result = match header.protocol_id {
            PROTOCOL_ID_SECURE_CHANNEL => {
                self.handle_secure_channel(&packet, session_id, header, app).await
            },
            PROTOCOL_ID_INTERACTION_MODEL => {
                self.handle_interaction(&packet, session_id, header, app).await
            },
            other => {
                tracing::debug!(protocol_id = other, "unknown protocol");
                self.send_status(&packet, session_id, header.exchange_id, Status::Failure).await
            },
        };

        if let Err(err) = result {
            tracing::warn!(error = %err, "response path failed");
        }
    }

    async fn handle_secure_channel(
        &mut self,
        packet: &RxPacket,
        session_id: u16,
        header: ProtocolHeader,
        app: &[u8],
    ) -> Result<(), BridgeError> {
        let now_s = self.now_s();
        let Some(opcode) = SecureChannelOpcode::from_u8(header.opcode) else {
            return self.send_status(packet, session_id, header.exchange_id, Status::Failure).await;
        };

        let pase_session = self.next_pase_session;
        match self.commissioning.handle_secure_channel(
            opcode,
            app,
            pase_session,
            &mut self.sessions,
            &mut OsRng,
            now_s,
        ) {
            Ok(Some(response)) => {
                self.send_message(
                    PeerInfo { ip: packet.peer_ip, port: packet.peer_port, kind: packet.port },
                    session_id,
                    PROTOCOL_ID_SECURE_CHANNEL,
                    response.opcode.to_u8(),
                    header.exchange_id,
                    &response.payload,
                )
                .await
            },
            Ok(None) => {
                // PASE established: the negotiated session id is now
                // live; reserve the next one for a future handshake.
                self.session_peers.insert(
                    pase_session,
                    PeerInfo { ip: packet.peer_ip, port: packet.peer_port, kind: packet.port },
                );
                self.next_pase_session = self.next_pase_session.checked_add(1).unwrap_or(1);
                Ok(())
            },
            Err(err) if err.is_silent_drop() => Ok(()),
            Err(err) => {
                tracing::debug!(error = %err, ?opcode, "secure channel failure");
                self.send_status(packet, session_id, header.exchange_id, Status::Failure).await
            },
        }
    }

    async fn handle_interaction(
        &mut self,
        packet: &RxPacket,
        session_id: u16,
        header: ProtocolHeader,
        app: &[u8],
    ) -> Result<(), BridgeError> {
        match InteractionOpcode::from_u8(header.opcode) {
            Some(InteractionOpcode::ReadRequest) => {
                self.serve_read(packet, session_id, header.exchange_id, app).await
            },
            Some(InteractionOpcode::SubscribeRequest) => {
                self.serve_subscribe(packet, session_id, header.exchange_id, app).await
            },
            _ => self.send_status(packet, session_id, header.exchange_id, Status::Failure).await,
        }
    }

    async fn serve_read(
        &mut self,
        packet: &RxPacket,
        session_id: u16,
        exchange_id: u16,
        app: &[u8],
    ) -> Result<(), BridgeError> {
        let request = match ReadRequest::decode(app) {
            Ok(request) => request,
            Err(err) => {
                let status = request_error_status(&err);
                return self.send_status(packet, session_id, exchange_id, status).await;
            },
        };

        let reports: Vec<AttributeReport> = request
            .paths
            .iter()
            .map(|&path| AttributeReport { path, result: read_attribute(&self.store, path) })
            .collect();

        let mut buf = [0u8; MAX_MESSAGE_SIZE];
        let len = match interaction::encode_report_data(None, &reports, &mut buf) {
            Ok(len) => len,
            Err(err) => {
                tracing::debug!(error = %err, "report encoding failed");
                return self.send_status(packet, session_id, exchange_id, Status::Failure).await;
            },
        };

        self.send_message(
            PeerInfo { ip: packet.peer_ip, port: packet.peer_port, kind: packet.port },
            session_id,
            PROTOCOL_ID_INTERACTION_MODEL,
            InteractionOpcode::ReportData.to_u8(),
            exchange_id,
            &buf[..len],
        )
        .await
    }

    async fn serve_subscribe(
        &mut self,
        packet: &RxPacket,
        session_id: u16,
        exchange_id: u16,
        app: &[u8],
    ) -> Result<(), BridgeError> {
        let request = match SubscribeRequest::decode(app) {
            Ok(request) => request,
            Err(err) => {
                let status = request_error_status(&err);
                return self.send_status(packet, session_id, exchange_id, status).await;
            },
        };
        if request.paths.is_empty() {
            return self.send_status(packet, session_id, exchange_id, Status::ConstraintError).await;
        }

        let now_ms = self.now_ms();
        let registered = match self.register_subscriptions(&request, session_id, now_ms) {
            Ok(registered) => registered,
            Err(err) => {
                let status = request_error_status(&err);
                return self.send_status(packet, session_id, exchange_id, status).await;
            },
        };

        let subscription_id = registered[0];
        let max_interval_s = request.max_interval_s.max(request.min_interval_s);
        let mut buf = [0u8; 64];
        let len =
            match interaction::encode_subscribe_response(subscription_id, max_interval_s, &mut buf)
            {
                Ok(len) => len,
                Err(err) => {
                    tracing::debug!(error = %err, "subscribe response encoding failed");
                    return self
                        .send_status(packet, session_id, exchange_id, Status::Failure)
                        .await;
                },
            };

        self.send_message(
            PeerInfo { ip: packet.peer_ip, port: packet.peer_port, kind: packet.port },
            session_id,
            PROTOCOL_ID_INTERACTION_MODEL,
            InteractionOpcode::SubscribeResponse.to_u8(),
            exchange_id,
            &buf[..len],
        )
        .await
    }

    /// Emit one subscription report (change-driven or max-interval).
    async fn emit_report(&mut self, subscription_id: u32) {
        let target = self
            .subs()
            .get(subscription_id)
            .map(|sub| (sub.session_id, sub.path));
        let Some((session_id, path)) = target else {
            return;
        };

        let report = AttributeReport { path, result: read_attribute(&self.store, path) };
        let mut buf = [0u8; MAX_MESSAGE_SIZE];
        let len = match interaction::encode_report_data(Some(subscription_id), &[report], &mut buf)
        {
            Ok(len) => len,
            Err(err) => {
                tracing::warn!(error = %err, subscription_id, "report encoding failed");
                return;
            },
        };

        let Some(&peer) = self.session_peers.get(&session_id) else {
            tracing::debug!(session_id, subscription_id, "no peer for report");
            return;
        };

        let exchange_id = self.counters.next_exchange_id();
        if let Err(err) = self
            .send_message(
                peer,
                session_id,
                PROTOCOL_ID_INTERACTION_MODEL,
                InteractionOpcode::ReportData.to_u8(),
                exchange_id,
                &buf[..len],
            )
            .await
        {
            tracing::warn!(error = %err, subscription_id, "report send failed");
            if matches!(err, BridgeError::Core(CoreError::SessionNotFound { .. })) {
                self.subs().remove(subscription_id);
            }
        }
    }

    /// Maintenance tick: stalled handshakes, idle sessions, periodic
    /// reports.
    async fn periodic(&mut self) {
        let now_s = self.now_s();
        let now_ms = self.now_ms();

        self.commissioning.tick(now_s);

        for session_id in self.sessions.cleanup_expired(now_s) {
            self.subs().remove_session(session_id);
            self.session_peers.remove(&session_id);
        }

        let due = self.subs().due_max_interval(now_ms);
        for subscription_id in due {
            self.emit_report(subscription_id).await;
        }
    }

    async fn send_status(
        &mut self,
        packet: &RxPacket,
        session_id: u16,
        exchange_id: u16,
        status: Status,
    ) -> Result<(), BridgeError> {
        let mut buf = [0u8; 16];
        let len = interaction::encode_status_response(status, &mut buf)?;
        self.send_message(
            PeerInfo { ip: packet.peer_ip, port: packet.peer_port, kind: packet.port },
            session_id,
            PROTOCOL_ID_INTERACTION_MODEL,
            InteractionOpcode::StatusResponse.to_u8(),
            exchange_id,
            &buf[..len],
        )
        .await
    }

    /// Frame, (optionally) seal, and send one message: protocol header
    /// plus payload, encrypted under the session unless it is session
    /// 0, message header with a fresh counter in front.
    async fn send_message(
        &mut self,
        peer: PeerInfo,
        session_id: u16,
        protocol_id: u16,
        opcode: u8,
        exchange_id: u16,
        payload: &[u8],
    ) -> Result<(), BridgeError> {
        let now_s = self.now_s();

        let mut plain = vec![0u8; ProtocolHeader::SIZE + payload.len()];
        ProtocolHeader { protocol_id, opcode, exchange_id }.encode(&mut plain)?;
        plain[ProtocolHeader::SIZE..].copy_from_slice(payload);

        let body = if session_id == UNSECURED_SESSION_ID {
            plain
        } else {
            self.sessions.encrypt(session_id, &plain, now_s)?
        };

        let message = Message::new(
            MessageHeader {
                session_id,
                counter: self.counters.next_message_counter(),
                ..Default::default()
            },
            body,
        );
        let mut buf = [0u8; MAX_MESSAGE_SIZE];
        let len = message.encode(&mut buf)?;
        self.transport.send(from_canonical(&peer.ip, peer.port), &buf[..len], peer.kind).await
    }

    fn subs(&self) -> MutexGuard<'_, SubscriptionManager> {
        self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register every path in a subscribe request, rolling back what
    /// was registered so far if any path fails.
    fn register_subscriptions(
        &self,
        request: &SubscribeRequest,
        session_id: u16,
        now_ms: u64,
    ) -> Result<Vec<u32>, CoreError> {
        let mut subs = self.subs();
        let mut registered = Vec::new();
        for (index, &path) in request.paths.iter().enumerate() {
            // Only the first registration may replace the session's
            // existing subscriptions; the rest of this request must
            // survive it.
            let keep = request.keep_subscriptions || index > 0;
            match subs.register(
                session_id,
                path,
                request.min_interval_s,
                request.max_interval_s,
                keep,
                now_ms,
            ) {
                Ok(id) => registered.push(id),
                Err(err) => {
                    for id in registered {
                        subs.remove(id);
                    }
                    return Err(err);
                },
            }
        }
        Ok(registered)
    }

    fn now_s(&self) -> u64 {
        self.epoch.elapsed().as_secs()
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

/// Map a request decode failure to the status sent back.
fn request_error_status(err: &CoreError) -> Status {
    match err {
        CoreError::ResourceExhausted { .. } => Status::ResourceExhausted,
        CoreError::InvalidInput(_) => Status::ConstraintError,
        _ => Status::Failure,
    }
}
