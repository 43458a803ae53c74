//! The protocol engine.
//!
//! One engine serves one module connection. It owns the negotiated version
//! and MTUs, the session table and the transport negotiator, and turns
//! incoming frames into [`EngineEvent`]s.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use hulink_frame::{
    fragment, packet_to_bytes, ControlFrameType, FrameAssembler, FrameSpec, FrameType, Packet,
    ProtocolMessage, ProtocolVersion, ServiceType,
};
use hulink_transport::{TransportKind, TransportManager, TransportParams, TransportRecord};
use tracing::{debug, info, trace, warn};

use crate::config::EngineConfig;
use crate::control;
use crate::error::{ProtocolError, Result};
use crate::event::{EndReason, EngineEvent, SessionStarted};
use crate::negotiator::{SecondaryAction, ServicePlan, TransportLoss, TransportNegotiator};
use crate::security::SecurityProvider;
use crate::session::{SendLocks, SessionTable};
use crate::video::VideoParamsProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingStart {
    session_id: u8,
    service: ServiceType,
    encrypted: bool,
}

/// Everything negotiated with the module. Guarded by one lock so version,
/// MTU and bindings are always read as a consistent snapshot.
#[derive(Debug)]
struct ConnectionState {
    version: ProtocolVersion,
    /// Set by the first RPC StartServiceACK; cleared only by a reset or primary loss.
    versioned: bool,
    mtus: HashMap<ServiceType, usize>,
    sessions: SessionTable,
    negotiator: TransportNegotiator,
    rpc_session: Option<u8>,
    pending_starts: Vec<PendingStart>,
}

impl ConnectionState {
    fn new(config: &EngineConfig) -> Self {
        Self {
            version: ProtocolVersion::V1,
            versioned: false,
            mtus: HashMap::new(),
            sessions: SessionTable::new(),
            negotiator: TransportNegotiator::new(config),
            rpc_session: None,
            pending_starts: Vec::new(),
        }
    }

    fn set_version(&mut self, version: ProtocolVersion) {
        self.version = version;
        self.versioned = true;
        self.mtus.clear();
    }

    fn mtu(&self, service: ServiceType) -> usize {
        self.mtus
            .get(&service)
            .or_else(|| self.mtus.get(&ServiceType::Rpc))
            .copied()
            .unwrap_or_else(|| self.version.default_mtu())
    }
}

/// Work decided under the state lock and carried out after releasing it.
#[derive(Debug, Default)]
struct Effects {
    packets: Vec<(Packet, TransportRecord)>,
    requests: Vec<(TransportKind, TransportParams)>,
    events: Vec<EngineEvent>,
}

/// Drives one connection to a head unit module.
pub struct ProtocolEngine {
    config: EngineConfig,
    transports: Arc<dyn TransportManager>,
    security: Option<Arc<dyn SecurityProvider>>,
    video: Option<Arc<dyn VideoParamsProvider>>,
    events: Sender<EngineEvent>,
    state: RwLock<ConnectionState>,
    send_locks: SendLocks,
    assembler: FrameAssembler,
    next_message_id: AtomicU32,
}

impl ProtocolEngine {
    /// Create an engine sending through `transports`. Events arrive on the
    /// returned receiver.
    pub fn new(config: EngineConfig, transports: Arc<dyn TransportManager>) -> (Self, Receiver<EngineEvent>) {
        let (events, receiver) = mpsc::channel();
        let engine = Self {
            state: RwLock::new(ConnectionState::new(&config)),
            assembler: FrameAssembler::new(config.max_message_size),
            config,
            transports,
            security: None,
            video: None,
            events,
            send_locks: SendLocks::new(),
            next_message_id: AtomicU32::new(1),
        };
        (engine, receiver)
    }

    /// Attach the provider used for protected services.
    pub fn with_security(mut self, provider: Arc<dyn SecurityProvider>) -> Self {
        self.security = Some(provider);
        self
    }

    /// Attach the provider consulted when starting the Nav service.
    pub fn with_video_params(mut self, provider: Arc<dyn VideoParamsProvider>) -> Self {
        self.video = Some(provider);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// A transport came up.
    ///
    /// The first call selects the primary transport and starts the RPC
    /// service on it. Later calls may register the new transport as secondary.
    pub fn on_transport_connected(&self, record: &TransportRecord) -> Result<()> {
        let connected = self.transports.connected();
        let mut effects = Effects::default();
        {
            let mut state = self.write_state();
            if state.negotiator.primary().is_none() {
                match state.negotiator.select_primary(&connected) {
                    Ok(primary) => {
                        info!(transport = %primary, "starting rpc service on primary transport");
                        let packet = control::start_rpc_service(self.config.max_protocol_version, 0, false);
                        effects.packets.push((packet, primary));
                    }
                    Err(err) => {
                        drop(state);
                        warn!(transport = %record, "no connected transport is acceptable as primary");
                        self.emit(EngineEvent::error("cannot select a primary transport", &err));
                        return Err(err);
                    }
                }
            } else if let Some(session_id) = state.rpc_session {
                debug!(transport = %record, "transport connected after primary selection");
                advance_secondary(&mut state, session_id, &connected, &mut effects);
            }
        }
        self.apply(effects)
    }

    /// A transport went away. Losing the primary ends every session;
    /// losing the secondary ends the streams it carried.
    pub fn on_transport_disconnected(&self, record: &TransportRecord) {
        let still_connected: Vec<TransportRecord> = self
            .transports
            .connected()
            .into_iter()
            .filter(|other| other != record)
            .collect();

        let mut events = Vec::new();
        let mut primary_lost = false;
        {
            let mut state = self.write_state();
            match state.negotiator.transport_lost(record, &still_connected) {
                TransportLoss::Primary { alternate_available } => {
                    warn!(transport = %record, alternate_available, "primary transport lost");
                    for entry in state.sessions.drain() {
                        for service in entry.started() {
                            events.push(EngineEvent::SessionEnded {
                                session_id: entry.session_id,
                                service: *service,
                                reason: EndReason::TransportLost,
                            });
                        }
                    }
                    state.rpc_session = None;
                    state.pending_starts.clear();
                    state.versioned = false;
                    primary_lost = true;
                    events.push(EngineEvent::TransportDisconnected {
                        transport: record.clone(),
                        alternate_primary_available: alternate_available,
                    });
                }
                TransportLoss::Secondary => {
                    info!(transport = %record, "secondary transport lost");
                    for (session_id, service) in state.sessions.bound_to(record) {
                        if state.sessions.stop(session_id, service) {
                            events.push(EngineEvent::SessionEnded {
                                session_id,
                                service,
                                reason: EndReason::TransportLost,
                            });
                        }
                        state.sessions.unbind(session_id, service);
                    }
                }
                TransportLoss::Unrelated => {
                    debug!(transport = %record, "unused transport disconnected");
                }
            }
        }

        if primary_lost {
            self.send_locks.clear();
            self.assembler.clear();
        }
        for event in events {
            self.emit(event);
        }
    }

    /// Fall back to a v1 connection over Bluetooth.
    pub fn enter_legacy_mode(&self) -> Result<()> {
        if !self.read_state().negotiator.legacy_compatible() {
            let err = ProtocolError::NoMatchingPrimaryTransport;
            self.emit(EngineEvent::error("legacy mode needs bluetooth as an acceptable primary", &err));
            return Err(err);
        }

        let connected = self.transports.connected();
        self.reset();
        let primary = {
            let mut state = self.write_state();
            state.negotiator.enter_legacy(&connected)
        };
        let primary = match primary {
            Ok(primary) => primary,
            Err(err) => {
                self.emit(EngineEvent::error("no bluetooth transport for legacy mode", &err));
                return Err(err);
            }
        };

        info!(transport = %primary, "entering legacy mode");
        let packet = control::start_service(1, ServiceType::Rpc, 0, false, None);
        self.send_packet(&packet, &primary)
    }

    /// Ask the module to start `service` on `session_id`.
    ///
    /// Streaming services whose transport is still being negotiated are
    /// queued and started once a secondary transport registers or fails.
    pub fn start_service(&self, session_id: u8, service: ServiceType, encrypted: bool) -> Result<()> {
        if encrypted && self.security.is_none() {
            return Err(ProtocolError::NoSecurityProvider);
        }
        let connected = self.transports.connected();
        let mut effects = Effects::default();
        {
            let mut state = self.write_state();
            match service {
                ServiceType::Rpc => {
                    let primary = match state.negotiator.primary() {
                        Some(primary) => primary.clone(),
                        None => state.negotiator.select_primary(&connected)?,
                    };
                    let packet = if state.negotiator.is_legacy() {
                        control::start_service(1, ServiceType::Rpc, session_id, encrypted, None)
                    } else {
                        control::start_rpc_service(self.config.max_protocol_version, session_id, encrypted)
                    };
                    effects.packets.push((packet, primary));
                }
                ServiceType::Control => {
                    return Err(ProtocolError::ServiceUnavailable { session_id, service });
                }
                _ => {
                    if !state.sessions.contains(session_id) {
                        return Err(ProtocolError::ServiceUnavailable { session_id, service });
                    }
                    let bound = state.sessions.transport_for(session_id, service).cloned();
                    let target = match bound {
                        Some(record) => record,
                        None => match state.negotiator.plan(service) {
                            ServicePlan::Primary(record) | ServicePlan::Secondary(record) => {
                                state.sessions.bind(session_id, service, record.clone());
                                record
                            }
                            ServicePlan::Pending => {
                                debug!(session_id, %service, "queueing start until secondary transport settles");
                                state.pending_starts.push(PendingStart {
                                    session_id,
                                    service,
                                    encrypted,
                                });
                                advance_secondary(&mut state, session_id, &connected, &mut effects);
                                drop(state);
                                return self.apply(effects);
                            }
                            ServicePlan::Reject => {
                                return Err(match state.negotiator.primary() {
                                    Some(primary) if state.negotiator.high_bandwidth_rejected() => {
                                        ProtocolError::HighBandwidthUnsupported(primary.kind)
                                    }
                                    _ => ProtocolError::ServiceUnavailable { session_id, service },
                                });
                            }
                        },
                    };
                    let packet = self.start_service_packet(&state, session_id, service, encrypted);
                    effects.packets.push((packet, target));
                }
            }
        }
        self.apply(effects)
    }

    /// Ask the module to end `service` on `session_id`.
    pub fn end_service(&self, session_id: u8, service: ServiceType) -> Result<()> {
        let (packet, target) = {
            let state = self.read_state();
            let target = state
                .sessions
                .transport_for(session_id, service)
                .or_else(|| state.negotiator.primary())
                .cloned()
                .ok_or(ProtocolError::ServiceUnavailable { session_id, service })?;
            let hash_id = match service {
                ServiceType::Rpc => state.sessions.hash_id(session_id),
                _ => None,
            };
            let packet = control::end_service(state.version.major, service, session_id, hash_id);
            (packet, target)
        };
        debug!(session_id, %service, transport = %target, "ending service");
        self.send_packet(&packet, &target)
    }

    /// Tell the module how many bytes of `service` data were processed.
    pub fn send_service_data_ack(&self, session_id: u8, service: ServiceType, bytes: u32) -> Result<()> {
        let (packet, target) = {
            let state = self.read_state();
            let target = state
                .sessions
                .transport_for(session_id, service)
                .cloned()
                .ok_or(ProtocolError::ServiceUnavailable { session_id, service })?;
            let packet = control::service_data_ack(state.version.major, service, session_id, bytes);
            (packet, target)
        };
        self.send_packet(&packet, &target)
    }

    /// Fragment and send one message.
    ///
    /// Fails with [`ProtocolError::NoMessageLock`] until the RPC service of
    /// the session has been acknowledged. Frames of concurrent messages on
    /// one session never interleave.
    pub fn send_message(&self, message: ProtocolMessage) -> Result<()> {
        let session_id = message.session_id;
        let service = message.service;
        let lock = self
            .send_locks
            .get(session_id)
            .ok_or(ProtocolError::NoMessageLock(session_id))?;
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let (version, mtu, target, protected) = {
            let state = self.read_state();
            let entry = state
                .sessions
                .get(session_id)
                .ok_or(ProtocolError::ServiceUnavailable { session_id, service })?;
            let target = entry
                .transport(service)
                .cloned()
                .ok_or(ProtocolError::ServiceUnavailable { session_id, service })?;
            (state.version.major, state.mtu(service), target, entry.is_encrypted(service))
        };

        // Services started protected encrypt every message.
        let encrypted = message.encrypted || protected;
        let provider = if encrypted {
            Some(self.security.as_ref().ok_or(ProtocolError::NoSecurityProvider)?)
        } else {
            None
        };

        let payload = message.to_payload(version)?;
        let spec = FrameSpec {
            version,
            service,
            session_id,
            message_id: self.next_message_id.fetch_add(1, Ordering::Relaxed),
            encrypted,
        };
        let mut packets = fragment(&spec, &payload, mtu);
        if let Some(provider) = provider {
            // Frames are sealed one by one so each opens on arrival. First
            // frames announce plaintext sizes and stay clear.
            packets = packets
                .into_iter()
                .map(|packet| match packet.frame_type() {
                    FrameType::First => Ok(packet),
                    _ => {
                        let sealed = provider.encrypt(packet.payload())?;
                        Ok(packet.with_payload(sealed))
                    }
                })
                .collect::<Result<Vec<_>>>()?;
        }
        trace!(
            session_id,
            %service,
            message_id = spec.message_id,
            frames = packets.len(),
            bytes = payload.len(),
            "sending message"
        );
        for packet in &packets {
            self.send_packet(packet, &target)?;
        }
        Ok(())
    }

    /// Feed one packet received from a transport.
    ///
    /// Never fails: problems with a single packet are logged and reported as
    /// [`EngineEvent::ProtocolError`] while the connection carries on.
    pub fn handle_packet(&self, packet: Packet) {
        let session_id = packet.session_id();
        let service = packet.service_type();
        if let Err(err) = self.dispatch(packet) {
            warn!(session_id, %service, error = %err, "dropping packet");
            self.emit(EngineEvent::error(
                format!("failed to handle {service} packet on session {session_id}"),
                &err,
            ));
        }
    }

    /// Return to the unnegotiated state: version 1, no sessions, no locks,
    /// nothing in flight.
    pub fn reset(&self) {
        *self.write_state() = ConnectionState::new(&self.config);
        self.send_locks.clear();
        self.assembler.clear();
        debug!("protocol state reset");
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        self.read_state().version
    }

    pub fn header_len(&self) -> usize {
        self.read_state().version.header_len()
    }

    /// Payload bytes per frame for `service`.
    pub fn mtu(&self, service: ServiceType) -> usize {
        self.read_state().mtu(service)
    }

    pub fn transport_for(&self, session_id: u8, service: ServiceType) -> Option<TransportRecord> {
        self.read_state().sessions.transport_for(session_id, service).cloned()
    }

    pub fn primary_transport(&self) -> Option<TransportRecord> {
        self.read_state().negotiator.primary().cloned()
    }

    pub fn secondary_transport(&self) -> Option<TransportRecord> {
        self.read_state().negotiator.secondary().cloned()
    }

    pub fn hash_id(&self, session_id: u8) -> Option<u32> {
        self.read_state().sessions.hash_id(session_id)
    }

    pub fn has_send_lock(&self, session_id: u8) -> bool {
        self.send_locks.contains(session_id)
    }

    pub fn is_legacy(&self) -> bool {
        self.read_state().negotiator.is_legacy()
    }

    /// Multi-frame messages still being assembled.
    pub fn in_flight_messages(&self) -> usize {
        self.assembler.in_flight()
    }

    fn dispatch(&self, packet: Packet) -> Result<()> {
        match packet.frame_type() {
            FrameType::Control => self.handle_control(&packet),
            FrameType::Single | FrameType::First | FrameType::Consecutive => self.handle_data(packet),
        }
    }

    fn handle_data(&self, packet: Packet) -> Result<()> {
        let packet = self.decrypt_frame(packet)?;
        if let Some(message) = self.assembler.handle(&packet)? {
            trace!(
                session_id = message.session_id,
                service = %message.service,
                message_id = message.message_id,
                bytes = message.params.len(),
                "message received"
            );
            self.emit(EngineEvent::Message(message));
        }
        Ok(())
    }

    /// Single and Consecutive frames are sealed one by one. First frames only
    /// announce sizes and are never encrypted.
    fn decrypt_frame(&self, packet: Packet) -> Result<Packet> {
        if !packet.is_encrypted() || packet.frame_type() == FrameType::First {
            return Ok(packet);
        }
        let provider = self.security.as_ref().ok_or(ProtocolError::NoSecurityProvider)?;
        let clear = provider.decrypt(packet.payload())?;
        Ok(packet.with_payload(clear))
    }

    fn handle_control(&self, packet: &Packet) -> Result<()> {
        let control = packet.control_frame_type()?;
        let session_id = packet.session_id();
        let service = packet.service_type();
        trace!(session_id, %service, ?control, "control frame received");

        match control {
            ControlFrameType::Heartbeat => self.reply_heartbeat(packet),
            ControlFrameType::HeartbeatAck => {
                debug!(session_id, "heartbeat ack received");
                Ok(())
            }
            ControlFrameType::StartServiceAck => self.handle_start_ack(packet),
            ControlFrameType::StartServiceNak => {
                let rejected_params = control::rejected_params(packet);
                warn!(session_id, %service, ?rejected_params, "module refused to start service");
                if service.is_streaming() {
                    self.write_state().sessions.stop(session_id, service);
                }
                self.emit(EngineEvent::SessionNak {
                    session_id,
                    service,
                    rejected_params,
                });
                Ok(())
            }
            ControlFrameType::EndService => {
                self.end_locally(session_id, service, EndReason::ModuleEnded);
                Ok(())
            }
            ControlFrameType::EndServiceAck => {
                self.end_locally(session_id, service, EndReason::Requested);
                Ok(())
            }
            ControlFrameType::EndServiceNak => {
                let reason = control::reason(packet);
                warn!(session_id, %service, ?reason, "module refused to end service");
                self.emit(EngineEvent::EndSessionNak {
                    session_id,
                    service,
                    reason,
                });
                Ok(())
            }
            ControlFrameType::RegisterSecondaryTransportAck => self.handle_registration(packet, true),
            ControlFrameType::RegisterSecondaryTransportNak => self.handle_registration(packet, false),
            ControlFrameType::TransportEventUpdate => self.handle_transport_event(packet),
            ControlFrameType::ServiceDataAck => {
                let bytes = control::read_u32(packet).ok_or_else(|| {
                    ProtocolError::UnexpectedControl("service data ack without a byte count".to_string())
                })?;
                self.emit(EngineEvent::ServiceDataAck {
                    session_id,
                    service,
                    bytes,
                });
                Ok(())
            }
            ControlFrameType::StartService | ControlFrameType::RegisterSecondaryTransport => Err(
                ProtocolError::UnexpectedControl(format!("{control:?} is never sent by the module")),
            ),
        }
    }

    fn reply_heartbeat(&self, packet: &Packet) -> Result<()> {
        let target = match packet.transport() {
            Some(record) => record.clone(),
            None => self
                .read_state()
                .negotiator
                .primary()
                .cloned()
                .ok_or(ProtocolError::ServiceUnavailable {
                    session_id: packet.session_id(),
                    service: packet.service_type(),
                })?,
        };
        trace!(session_id = packet.session_id(), transport = %target, "answering heartbeat");
        self.send_packet(&control::heartbeat_ack(packet), &target)
    }

    fn handle_start_ack(&self, packet: &Packet) -> Result<()> {
        let session_id = packet.session_id();
        let service = packet.service_type();
        let connected = self.transports.connected();
        let mut effects = Effects::default();
        let mut opened = false;
        {
            let mut state = self.write_state();
            if service == ServiceType::Rpc {
                let negotiating = !state.versioned;
                let version = if negotiating {
                    let version = control::acked_version(packet, self.config.max_protocol_version);
                    state.set_version(version);
                    version
                } else {
                    debug!(session_id, version = %state.version, "rpc ack on a versioned connection");
                    state.version
                };
                if let Some(mtu) = control::mtu(packet) {
                    state.mtus.insert(ServiceType::Rpc, mtu);
                }

                let primary = packet
                    .transport()
                    .or_else(|| state.negotiator.primary())
                    .cloned()
                    .ok_or(ProtocolError::NoMatchingPrimaryTransport)?;
                if state.negotiator.primary().is_none() {
                    state.negotiator.set_primary(primary.clone());
                }

                let hash_id = control::hash_id(packet, version);
                state.sessions.open(session_id, hash_id, primary.clone());
                state.sessions.mark_started(session_id, ServiceType::Rpc, packet.is_encrypted());
                state.rpc_session = Some(session_id);
                if negotiating {
                    state.negotiator.apply_rpc_ack(version, packet.tags());
                }
                info!(session_id, %version, hash_id, transport = %primary, "rpc service started");

                if state.negotiator.high_bandwidth_rejected() {
                    warn!(session_id, transport = %primary, "primary transport cannot carry streaming services");
                    effects.events.push(EngineEvent::HighBandwidthRejected {
                        session_id,
                        transport: primary.clone(),
                    });
                }
                rebind_streaming(&mut state, session_id);

                effects.events.push(EngineEvent::SessionStarted(SessionStarted {
                    session_id,
                    service,
                    version,
                    hash_id,
                    encrypted: packet.is_encrypted(),
                    transport: Some(primary),
                    auth_token: control::auth_token(packet),
                }));
                advance_secondary(&mut state, session_id, &connected, &mut effects);
                opened = true;
            } else {
                if let Some(mtu) = control::mtu(packet) {
                    state.mtus.insert(service, mtu);
                }
                if let Some(record) = packet.transport() {
                    state.sessions.bind(session_id, service, record.clone());
                }
                state.sessions.mark_started(session_id, service, packet.is_encrypted());
                let transport = state.sessions.transport_for(session_id, service).cloned();
                info!(session_id, %service, transport = ?transport, "service started");
                effects.events.push(EngineEvent::SessionStarted(SessionStarted {
                    session_id,
                    service,
                    version: state.version,
                    hash_id: state.sessions.hash_id(session_id).unwrap_or(0),
                    encrypted: packet.is_encrypted(),
                    transport,
                    auth_token: control::auth_token(packet),
                }));
            }
        }
        if opened {
            self.send_locks.create(session_id);
        }
        self.apply(effects)
    }

    fn end_locally(&self, session_id: u8, service: ServiceType, reason: EndReason) {
        let mut events = Vec::new();
        let mut closed = false;
        {
            let mut state = self.write_state();
            if service == ServiceType::Rpc {
                if let Some(entry) = state.sessions.remove(session_id) {
                    for started in entry.started().iter().rev() {
                        events.push(EngineEvent::SessionEnded {
                            session_id,
                            service: *started,
                            reason,
                        });
                    }
                } else {
                    events.push(EngineEvent::SessionEnded {
                        session_id,
                        service,
                        reason,
                    });
                }
                state.negotiator.cancel_session(session_id);
                state.pending_starts.retain(|start| start.session_id != session_id);
                if state.rpc_session == Some(session_id) {
                    state.rpc_session = None;
                }
                closed = true;
            } else {
                state.sessions.stop(session_id, service);
                events.push(EngineEvent::SessionEnded {
                    session_id,
                    service,
                    reason,
                });
            }
        }

        if closed {
            self.send_locks.remove(session_id);
            let discarded = self.assembler.discard_session(session_id);
            info!(session_id, ?reason, discarded, "session ended");
        } else {
            info!(session_id, %service, ?reason, "service ended");
        }
        for event in events {
            self.emit(event);
        }
    }

    fn handle_registration(&self, packet: &Packet, accepted: bool) -> Result<()> {
        let session_id = packet.session_id();
        let mut effects = Effects::default();
        {
            let mut state = self.write_state();
            if accepted {
                let record = state
                    .negotiator
                    .registration_succeeded(session_id, packet.transport())
                    .ok_or_else(|| {
                        ProtocolError::UnexpectedControl(
                            "secondary transport ack with no registration pending".to_string(),
                        )
                    })?;
                info!(session_id, transport = %record, "secondary transport registered");
            } else {
                let reason = control::reason(packet);
                let record = state.negotiator.registration_failed(session_id);
                warn!(session_id, transport = ?record, ?reason, "module refused secondary transport");
            }
            rebind_streaming(&mut state, session_id);
            self.flush_pending_starts(&mut state, &mut effects);
        }
        self.apply(effects)
    }

    fn handle_transport_event(&self, packet: &Packet) -> Result<()> {
        let Some(params) = control::transport_params(packet) else {
            debug!("transport event update without tcp parameters");
            return Ok(());
        };
        debug!(ip = ?params.ip_address, port = ?params.port, "module announced tcp endpoint");

        let connected = self.transports.connected();
        let mut effects = Effects::default();
        {
            let mut state = self.write_state();
            state.negotiator.set_transport_params(TransportKind::Tcp, params);
            if let Some(session_id) = state.rpc_session {
                advance_secondary(&mut state, session_id, &connected, &mut effects);
            }
        }
        self.apply(effects)
    }

    /// Start queued services whose transport is now decided.
    fn flush_pending_starts(&self, state: &mut ConnectionState, effects: &mut Effects) {
        for start in std::mem::take(&mut state.pending_starts) {
            match state.negotiator.plan(start.service) {
                ServicePlan::Primary(record) | ServicePlan::Secondary(record) => {
                    state.sessions.bind(start.session_id, start.service, record.clone());
                    let packet = self.start_service_packet(state, start.session_id, start.service, start.encrypted);
                    effects.packets.push((packet, record));
                }
                ServicePlan::Pending => state.pending_starts.push(start),
                ServicePlan::Reject => {
                    warn!(
                        session_id = start.session_id,
                        service = %start.service,
                        "no transport left for queued service"
                    );
                    effects.events.push(EngineEvent::SessionNak {
                        session_id: start.session_id,
                        service: start.service,
                        rejected_params: None,
                    });
                }
            }
        }
    }

    fn start_service_packet(
        &self,
        state: &ConnectionState,
        session_id: u8,
        service: ServiceType,
        encrypted: bool,
    ) -> Packet {
        let video = match service {
            ServiceType::Nav => self.video.as_ref().and_then(|provider| provider.desired_video_params()),
            _ => None,
        };
        control::start_service(state.version.major, service, session_id, encrypted, video.as_ref())
    }

    fn apply(&self, effects: Effects) -> Result<()> {
        let mut first_error = None;
        for (packet, record) in &effects.packets {
            if let Err(err) = self.send_packet(packet, record) {
                warn!(transport = %record, error = %err, "failed to send control frame");
                first_error.get_or_insert(err);
            }
        }
        for (kind, params) in &effects.requests {
            info!(%kind, ip = ?params.ip_address, port = ?params.port, "requesting secondary transport");
            if let Err(err) = self.transports.request_secondary(*kind, params) {
                warn!(%kind, error = %err, "secondary transport request failed");
                first_error.get_or_insert(err.into());
            }
        }
        for event in effects.events {
            self.emit(event);
        }
        first_error.map_or(Ok(()), Err)
    }

    fn send_packet(&self, packet: &Packet, record: &TransportRecord) -> Result<()> {
        let bytes = packet_to_bytes(packet)?;
        self.transports.send(bytes, record)?;
        Ok(())
    }

    fn emit(&self, event: EngineEvent) {
        if self.events.send(event).is_err() {
            trace!("event receiver dropped");
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, ConnectionState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ConnectionState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ProtocolEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolEngine")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("has_security", &self.security.is_some())
            .finish_non_exhaustive()
    }
}

/// Bind streaming services that are not running yet to wherever the
/// negotiator now places them.
fn rebind_streaming(state: &mut ConnectionState, session_id: u8) {
    for service in [ServiceType::Nav, ServiceType::Pcm] {
        let running = state
            .sessions
            .get(session_id)
            .is_some_and(|entry| entry.is_started(service));
        if running {
            continue;
        }
        match state.negotiator.plan(service) {
            ServicePlan::Primary(record) | ServicePlan::Secondary(record) => {
                state.sessions.bind(session_id, service, record);
            }
            ServicePlan::Pending => {}
            ServicePlan::Reject => {
                state.sessions.unbind(session_id, service);
            }
        }
    }
}

fn advance_secondary(
    state: &mut ConnectionState,
    session_id: u8,
    connected: &[TransportRecord],
    effects: &mut Effects,
) {
    match state.negotiator.next_secondary_action(session_id, connected) {
        SecondaryAction::Register { session_id, record } => {
            info!(session_id, transport = %record, "registering secondary transport");
            let packet = control::register_secondary_transport(state.version.major, session_id);
            effects.packets.push((packet, record));
        }
        SecondaryAction::Request { kind, params } => effects.requests.push((kind, params)),
        SecondaryAction::Idle | SecondaryAction::Wait => {}
    }
}
