//! Open sessions, the transport each service runs on, and per-session send
//! locks.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use hulink_frame::ServiceType;
use hulink_transport::TransportRecord;

/// State for one session negotiated through an RPC StartServiceACK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntry {
    pub session_id: u8,
    pub hash_id: u32,
    services: BTreeMap<ServiceType, TransportRecord>,
    started: Vec<ServiceType>,
    encrypted: Vec<ServiceType>,
}

impl SessionEntry {
    /// Transport the service runs on, if it has been bound.
    pub fn transport(&self, service: ServiceType) -> Option<&TransportRecord> {
        self.services.get(&service)
    }

    /// Bound services in wire-code order.
    pub fn services(&self) -> impl Iterator<Item = (ServiceType, &TransportRecord)> {
        self.services.iter().map(|(service, record)| (*service, record))
    }

    /// Services the module acknowledged, in acknowledgement order.
    pub fn started(&self) -> &[ServiceType] {
        &self.started
    }

    pub fn is_started(&self, service: ServiceType) -> bool {
        self.started.contains(&service)
    }

    pub fn is_encrypted(&self, service: ServiceType) -> bool {
        self.encrypted.contains(&service)
    }
}

/// Service bindings for every open session.
///
/// Control, RPC and bulk data always share one transport: opening a session
/// binds all three to the primary.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<u8, SessionEntry>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or reopen) a session with its core services on `primary`.
    pub fn open(&mut self, session_id: u8, hash_id: u32, primary: TransportRecord) {
        let mut services = BTreeMap::new();
        for service in [ServiceType::Control, ServiceType::Rpc, ServiceType::BulkData] {
            services.insert(service, primary.clone());
        }
        let entry = SessionEntry {
            session_id,
            hash_id,
            services,
            started: vec![ServiceType::Rpc],
            encrypted: Vec::new(),
        };
        self.sessions.insert(session_id, entry);
    }

    pub fn get(&self, session_id: u8) -> Option<&SessionEntry> {
        self.sessions.get(&session_id)
    }

    pub fn contains(&self, session_id: u8) -> bool {
        self.sessions.contains_key(&session_id)
    }

    pub fn hash_id(&self, session_id: u8) -> Option<u32> {
        self.sessions.get(&session_id).map(|entry| entry.hash_id)
    }

    /// Bind `service` to `record`. Returns false if the session is not open.
    ///
    /// Core services cannot move off the transport they were opened on.
    pub fn bind(&mut self, session_id: u8, service: ServiceType, record: TransportRecord) -> bool {
        let Some(entry) = self.sessions.get_mut(&session_id) else {
            return false;
        };
        if !service.is_streaming() && entry.services.contains_key(&service) {
            return entry.services.get(&service) == Some(&record);
        }
        entry.services.insert(service, record);
        true
    }

    pub fn unbind(&mut self, session_id: u8, service: ServiceType) -> Option<TransportRecord> {
        let entry = self.sessions.get_mut(&session_id)?;
        entry.started.retain(|s| *s != service);
        entry.encrypted.retain(|s| *s != service);
        entry.services.remove(&service)
    }

    /// Record that the module acknowledged `service`.
    pub fn mark_started(&mut self, session_id: u8, service: ServiceType, encrypted: bool) {
        if let Some(entry) = self.sessions.get_mut(&session_id) {
            if !entry.started.contains(&service) {
                entry.started.push(service);
            }
            entry.encrypted.retain(|s| *s != service);
            if encrypted {
                entry.encrypted.push(service);
            }
        }
    }

    /// Stop a service. Streaming services also lose their binding so the
    /// next start plans a transport afresh.
    pub fn stop(&mut self, session_id: u8, service: ServiceType) -> bool {
        let Some(entry) = self.sessions.get_mut(&session_id) else {
            return false;
        };
        let was_started = entry.started.contains(&service);
        entry.started.retain(|s| *s != service);
        entry.encrypted.retain(|s| *s != service);
        if service.is_streaming() {
            entry.services.remove(&service);
        }
        was_started
    }

    pub fn transport_for(&self, session_id: u8, service: ServiceType) -> Option<&TransportRecord> {
        self.sessions.get(&session_id)?.transport(service)
    }

    /// Every `(session, service)` currently bound to `record`.
    pub fn bound_to(&self, record: &TransportRecord) -> Vec<(u8, ServiceType)> {
        let mut bound: Vec<(u8, ServiceType)> = self
            .sessions
            .values()
            .flat_map(|entry| {
                entry
                    .services()
                    .filter(|(_, r)| *r == record)
                    .map(|(service, _)| (entry.session_id, service))
            })
            .collect();
        bound.sort();
        bound
    }

    pub fn remove(&mut self, session_id: u8) -> Option<SessionEntry> {
        self.sessions.remove(&session_id)
    }

    /// Close every session, returning what was open.
    pub fn drain(&mut self) -> Vec<SessionEntry> {
        let mut entries: Vec<SessionEntry> = self.sessions.drain().map(|(_, entry)| entry).collect();
        entries.sort_by_key(|entry| entry.session_id);
        entries
    }
}

/// One send lock per open session.
///
/// Holding a session's lock serializes the frames of whole messages so that
/// frames of two messages on one session never interleave.
#[derive(Debug, Default)]
pub struct SendLocks {
    locks: Mutex<HashMap<u8, Arc<Mutex<()>>>>,
}

impl SendLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, session_id: u8) {
        self.map().entry(session_id).or_default();
    }

    pub fn get(&self, session_id: u8) -> Option<Arc<Mutex<()>>> {
        self.map().get(&session_id).cloned()
    }

    pub fn contains(&self, session_id: u8) -> bool {
        self.map().contains_key(&session_id)
    }

    pub fn remove(&self, session_id: u8) {
        self.map().remove(&session_id);
    }

    pub fn clear(&self) {
        self.map().clear();
    }

    fn map(&self) -> MutexGuard<'_, HashMap<u8, Arc<Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
