//! Primary transport selection and per-service transport decisions.
//!
//! The negotiator never touches a transport. It records what the module
//! announced and what is connected, and answers with plans the engine then
//! carries out.

use std::collections::{HashMap, HashSet};

use hulink_frame::{keys, ProtocolVersion, ServiceType, Tags};
use hulink_transport::{TransportKind, TransportParams, TransportRecord};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{ProtocolError, Result};

/// One entry of a module-announced service transport priority list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportSlot {
    Primary,
    Secondary,
}

impl TransportSlot {
    pub fn from_wire(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::Primary),
            2 => Some(Self::Secondary),
            _ => None,
        }
    }
}

/// Where a service should run right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServicePlan {
    Primary(TransportRecord),
    Secondary(TransportRecord),
    /// A secondary transport is being connected or registered.
    Pending,
    /// No acceptable transport exists for the service.
    Reject,
}

/// Next step towards a usable secondary transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecondaryAction {
    /// Nothing needs a secondary transport.
    Idle,
    /// Send RegisterSecondaryTransport on an already connected transport.
    Register {
        session_id: u8,
        record: TransportRecord,
    },
    /// Ask the transport layer to dial a new transport.
    Request {
        kind: TransportKind,
        params: TransportParams,
    },
    /// A registration or connection is already underway, or nothing dialable
    /// is known yet.
    Wait,
}

/// Which role a lost transport played.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportLoss {
    Primary { alternate_available: bool },
    Secondary,
    Unrelated,
}

#[derive(Debug)]
pub struct TransportNegotiator {
    primary_prefs: Vec<TransportKind>,
    secondary_prefs: Vec<TransportKind>,
    require_high_bandwidth: bool,
    legacy_allowed: bool,

    primary: Option<TransportRecord>,
    legacy: bool,

    secondary_negotiated: bool,
    module_secondaries: Vec<TransportKind>,
    audio_slots: Vec<TransportSlot>,
    video_slots: Vec<TransportSlot>,

    secondary: Option<TransportRecord>,
    pending: Option<(u8, TransportRecord)>,
    secondary_failed: bool,
    requested: HashSet<TransportKind>,
    params: HashMap<TransportKind, TransportParams>,
}

impl TransportNegotiator {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            primary_prefs: config.primary_transports.clone(),
            secondary_prefs: config.secondary_transports.clone(),
            require_high_bandwidth: config.require_high_bandwidth,
            legacy_allowed: config.legacy_mode_allowed,
            primary: None,
            legacy: false,
            secondary_negotiated: false,
            module_secondaries: Vec::new(),
            audio_slots: vec![TransportSlot::Primary],
            video_slots: vec![TransportSlot::Primary],
            secondary: None,
            pending: None,
            secondary_failed: false,
            requested: HashSet::new(),
            params: HashMap::new(),
        }
    }

    /// Pick the primary among `connected`, walking the preference list in order.
    pub fn select_primary(&mut self, connected: &[TransportRecord]) -> Result<TransportRecord> {
        let chosen = self
            .primary_prefs
            .iter()
            .find_map(|kind| connected.iter().find(|record| record.kind == *kind))
            .cloned()
            .ok_or(ProtocolError::NoMatchingPrimaryTransport)?;
        debug!(transport = %chosen, "selected primary transport");
        self.primary = Some(chosen.clone());
        Ok(chosen)
    }

    /// Force a primary, bypassing preference order.
    pub fn set_primary(&mut self, record: TransportRecord) {
        self.primary = Some(record);
    }

    pub fn primary(&self) -> Option<&TransportRecord> {
        self.primary.as_ref()
    }

    pub fn secondary(&self) -> Option<&TransportRecord> {
        self.secondary.as_ref()
    }

    pub fn is_legacy(&self) -> bool {
        self.legacy
    }

    /// Whether a v1 Bluetooth-only connection may be used instead.
    pub fn legacy_compatible(&self) -> bool {
        self.legacy_allowed && self.primary_prefs.contains(&TransportKind::Bluetooth)
    }

    /// Switch to legacy mode on the first connected Bluetooth transport.
    pub fn enter_legacy(&mut self, connected: &[TransportRecord]) -> Result<TransportRecord> {
        if !self.legacy_compatible() {
            return Err(ProtocolError::NoMatchingPrimaryTransport);
        }
        let record = connected
            .iter()
            .find(|record| record.kind == TransportKind::Bluetooth)
            .cloned()
            .ok_or(ProtocolError::NoMatchingPrimaryTransport)?;
        self.reset();
        self.legacy = true;
        self.primary = Some(record.clone());
        Ok(record)
    }

    /// Record what the module announced in its RPC StartServiceACK.
    ///
    /// Secondary negotiation only happens from 5.1 on, and only when the
    /// module lists its secondary transports.
    pub fn apply_rpc_ack(&mut self, version: ProtocolVersion, tags: Option<&Tags>) {
        self.module_secondaries.clear();
        self.audio_slots = vec![TransportSlot::Primary];
        self.video_slots = vec![TransportSlot::Primary];
        self.secondary_negotiated = false;

        let Some(tags) = tags.filter(|_| version >= ProtocolVersion::V5_1) else {
            return;
        };
        let Some(names) = tags.get_str_list(keys::SECONDARY_TRANSPORTS) else {
            return;
        };

        self.secondary_negotiated = true;
        for name in names {
            match TransportKind::from_wire_name(&name) {
                Ok(kind) if !self.module_secondaries.contains(&kind) => self.module_secondaries.push(kind),
                Ok(_) => {}
                Err(err) => warn!(error = %err, "ignoring secondary transport announced by module"),
            }
        }
        self.audio_slots = parse_slots(tags, keys::AUDIO_SERVICE_TRANSPORTS);
        self.video_slots = parse_slots(tags, keys::VIDEO_SERVICE_TRANSPORTS);
        debug!(
            secondaries = ?self.module_secondaries,
            audio = ?self.audio_slots,
            video = ?self.video_slots,
            "module announced secondary transports"
        );
    }

    pub fn secondary_negotiated(&self) -> bool {
        self.secondary_negotiated
    }

    /// The module offered no secondary path and the primary is too narrow
    /// for streaming while the caller requires it.
    pub fn high_bandwidth_rejected(&self) -> bool {
        !self.secondary_negotiated && self.primary.is_some() && !self.primary_streams()
    }

    /// Module-supported secondary kinds the caller accepts, caller order.
    pub fn secondary_candidates(&self) -> Vec<TransportKind> {
        let primary_kind = self.primary.as_ref().map(|record| record.kind);
        self.secondary_prefs
            .iter()
            .copied()
            .filter(|kind| self.module_secondaries.contains(kind))
            .filter(|kind| Some(*kind) != primary_kind)
            .collect()
    }

    /// Where `service` should run given everything known so far.
    pub fn plan(&self, service: ServiceType) -> ServicePlan {
        let Some(primary) = self.primary.clone() else {
            return ServicePlan::Reject;
        };
        if !service.is_streaming() {
            return ServicePlan::Primary(primary);
        }
        if !self.secondary_negotiated {
            return if self.primary_streams() {
                ServicePlan::Primary(primary)
            } else {
                ServicePlan::Reject
            };
        }

        for slot in self.slots(service) {
            match slot {
                TransportSlot::Primary if self.primary_streams() => return ServicePlan::Primary(primary),
                TransportSlot::Primary => {}
                TransportSlot::Secondary => {
                    if let Some(secondary) = &self.secondary {
                        return ServicePlan::Secondary(secondary.clone());
                    }
                    if self.secondary_possible() {
                        return ServicePlan::Pending;
                    }
                }
            }
        }
        ServicePlan::Reject
    }

    /// Decide how to get closer to a registered secondary transport.
    pub fn next_secondary_action(&mut self, session_id: u8, connected: &[TransportRecord]) -> SecondaryAction {
        let wanted = [ServiceType::Nav, ServiceType::Pcm]
            .into_iter()
            .any(|service| self.plan(service) == ServicePlan::Pending);
        if !wanted {
            return SecondaryAction::Idle;
        }
        if self.pending.is_some() {
            return SecondaryAction::Wait;
        }

        let candidates = self.secondary_candidates();
        for kind in &candidates {
            if let Some(record) = connected
                .iter()
                .find(|record| record.kind == *kind && Some(*record) != self.primary.as_ref())
            {
                self.pending = Some((session_id, record.clone()));
                return SecondaryAction::Register {
                    session_id,
                    record: record.clone(),
                };
            }
        }

        for kind in candidates {
            if self.requested.contains(&kind) {
                continue;
            }
            if let Some(params) = self.params.get(&kind).filter(|params| params.is_dialable()) {
                self.requested.insert(kind);
                return SecondaryAction::Request {
                    kind,
                    params: params.clone(),
                };
            }
        }
        SecondaryAction::Wait
    }

    /// Transport a registration is underway on, if any.
    pub fn pending_registration(&self) -> Option<&TransportRecord> {
        self.pending.as_ref().map(|(_, record)| record)
    }

    /// The module accepted the registration. `arrived_on` is used when no
    /// registration was recorded as pending.
    pub fn registration_succeeded(
        &mut self,
        session_id: u8,
        arrived_on: Option<&TransportRecord>,
    ) -> Option<TransportRecord> {
        let record = match self.pending.take() {
            Some((pending_session, record)) if pending_session == session_id => Some(record),
            Some(other) => {
                self.pending = Some(other);
                arrived_on.cloned()
            }
            None => arrived_on.cloned(),
        }?;
        self.secondary = Some(record.clone());
        self.secondary_failed = false;
        Some(record)
    }

    /// The module refused the registration. Streaming services fall back
    /// according to their priority lists.
    pub fn registration_failed(&mut self, session_id: u8) -> Option<TransportRecord> {
        self.secondary_failed = true;
        match self.pending.take() {
            Some((pending_session, record)) if pending_session == session_id => Some(record),
            other => {
                self.pending = other;
                None
            }
        }
    }

    /// Cache dial parameters the module announced for a transport.
    pub fn set_transport_params(&mut self, kind: TransportKind, params: TransportParams) {
        if self.params.get(&kind) != Some(&params) {
            self.requested.remove(&kind);
        }
        self.params.insert(kind, params);
    }

    pub fn transport_params(&self, kind: TransportKind) -> Option<&TransportParams> {
        self.params.get(&kind)
    }

    /// Drop waiters belonging to a session being torn down.
    pub fn cancel_session(&mut self, session_id: u8) {
        if matches!(&self.pending, Some((pending_session, _)) if *pending_session == session_id) {
            debug!(session_id, "cancelling pending secondary registration");
            self.pending = None;
        }
    }

    /// Classify a lost transport and forget state that depended on it.
    ///
    /// `still_connected` must not include the lost transport.
    pub fn transport_lost(&mut self, record: &TransportRecord, still_connected: &[TransportRecord]) -> TransportLoss {
        if self.primary.as_ref() == Some(record) {
            let alternate_available = still_connected
                .iter()
                .any(|other| self.primary_prefs.contains(&other.kind));
            let params = std::mem::take(&mut self.params);
            self.reset();
            self.params = params;
            return TransportLoss::Primary { alternate_available };
        }

        let was_pending = matches!(&self.pending, Some((_, pending)) if pending == record);
        if self.secondary.as_ref() == Some(record) || was_pending {
            self.secondary = None;
            self.pending = None;
            self.requested.clear();
            return TransportLoss::Secondary;
        }
        TransportLoss::Unrelated
    }

    /// Forget everything negotiated, keeping only caller preferences.
    pub fn reset(&mut self) {
        self.primary = None;
        self.legacy = false;
        self.secondary_negotiated = false;
        self.module_secondaries.clear();
        self.audio_slots = vec![TransportSlot::Primary];
        self.video_slots = vec![TransportSlot::Primary];
        self.secondary = None;
        self.pending = None;
        self.secondary_failed = false;
        self.requested.clear();
        self.params.clear();
    }

    fn primary_streams(&self) -> bool {
        self.primary
            .as_ref()
            .is_some_and(|record| record.kind.is_high_bandwidth() || !self.require_high_bandwidth)
    }

    fn secondary_possible(&self) -> bool {
        !self.secondary_failed && !self.secondary_candidates().is_empty()
    }

    fn slots(&self, service: ServiceType) -> &[TransportSlot] {
        match service {
            ServiceType::Pcm => &self.audio_slots,
            _ => &self.video_slots,
        }
    }
}

fn parse_slots(tags: &Tags, key: &str) -> Vec<TransportSlot> {
    let slots: Vec<TransportSlot> = tags
        .get_int_list(key)
        .unwrap_or_default()
        .into_iter()
        .filter_map(TransportSlot::from_wire)
        .collect();
    if slots.is_empty() {
        vec![TransportSlot::Primary]
    } else {
        slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usb() -> TransportRecord {
        TransportRecord::new(TransportKind::Usb)
    }

    fn bt() -> TransportRecord {
        TransportRecord::new(TransportKind::Bluetooth)
    }

    fn tcp() -> TransportRecord {
        TransportRecord::with_address(TransportKind::Tcp, "192.168.1.5:12345")
    }

    fn secondary_tags(audio: &[u64], video: &[u64]) -> Tags {
        Tags::new()
            .with(keys::SECONDARY_TRANSPORTS, vec!["TCP_WIFI"])
            .with(keys::AUDIO_SERVICE_TRANSPORTS, audio.to_vec())
            .with(keys::VIDEO_SERVICE_TRANSPORTS, video.to_vec())
    }

    fn negotiator(config: EngineConfig) -> TransportNegotiator {
        TransportNegotiator::new(&config)
    }

    #[test]
    fn primary_follows_preference_order() {
        let mut n = negotiator(EngineConfig::default());
        let chosen = n.select_primary(&[bt(), usb()]).expect("primary should be chosen");
        assert_eq!(chosen, usb());
        assert_eq!(n.primary(), Some(&usb()));
    }

    #[test]
    fn no_acceptable_primary() {
        let mut n = negotiator(EngineConfig::default().with_primary_transports(&[TransportKind::Usb]));
        assert!(matches!(
            n.select_primary(&[bt()]),
            Err(ProtocolError::NoMatchingPrimaryTransport)
        ));
        assert!(n.primary().is_none());
    }

    #[test]
    fn without_secondary_tag_streaming_uses_primary() {
        let mut n = negotiator(EngineConfig::default());
        n.select_primary(&[usb()]).expect("primary should be chosen");
        n.apply_rpc_ack(ProtocolVersion::MAX, Some(&Tags::new()));
        assert_eq!(n.plan(ServiceType::Nav), ServicePlan::Primary(usb()));
        assert_eq!(n.plan(ServiceType::Pcm), ServicePlan::Primary(usb()));
        assert!(!n.high_bandwidth_rejected());
    }

    #[test]
    fn narrow_primary_rejected_when_high_bandwidth_required() {
        let mut n = negotiator(EngineConfig::default().with_high_bandwidth_required(true));
        n.select_primary(&[bt()]).expect("primary should be chosen");
        n.apply_rpc_ack(ProtocolVersion::new(5, 0, 0), None);
        assert!(n.high_bandwidth_rejected());
        assert_eq!(n.plan(ServiceType::Nav), ServicePlan::Reject);
        assert_eq!(n.plan(ServiceType::Rpc), ServicePlan::Primary(bt()));
    }

    #[test]
    fn narrow_primary_allowed_when_not_required() {
        let mut n = negotiator(EngineConfig::default());
        n.select_primary(&[bt()]).expect("primary should be chosen");
        n.apply_rpc_ack(ProtocolVersion::new(4, 0, 0), None);
        assert_eq!(n.plan(ServiceType::Nav), ServicePlan::Primary(bt()));
    }

    #[test]
    fn secondary_tags_ignored_before_5_1() {
        let mut n = negotiator(EngineConfig::default());
        n.select_primary(&[usb()]).expect("primary should be chosen");
        n.apply_rpc_ack(ProtocolVersion::new(5, 0, 0), Some(&secondary_tags(&[2], &[2])));
        assert!(!n.secondary_negotiated());
        assert_eq!(n.plan(ServiceType::Pcm), ServicePlan::Primary(usb()));
    }

    #[test]
    fn connected_secondary_is_registered() {
        let mut n = negotiator(EngineConfig::default());
        n.select_primary(&[usb()]).expect("primary should be chosen");
        n.apply_rpc_ack(ProtocolVersion::MAX, Some(&secondary_tags(&[2], &[1])));

        assert_eq!(n.plan(ServiceType::Nav), ServicePlan::Primary(usb()));
        assert_eq!(n.plan(ServiceType::Pcm), ServicePlan::Pending);

        let action = n.next_secondary_action(1, &[usb(), tcp()]);
        assert_eq!(
            action,
            SecondaryAction::Register {
                session_id: 1,
                record: tcp()
            }
        );
        assert_eq!(n.next_secondary_action(1, &[usb(), tcp()]), SecondaryAction::Wait);

        assert_eq!(n.registration_succeeded(1, None), Some(tcp()));
        assert_eq!(n.plan(ServiceType::Pcm), ServicePlan::Secondary(tcp()));
        assert_eq!(n.next_secondary_action(1, &[usb(), tcp()]), SecondaryAction::Idle);
    }

    #[test]
    fn unconnected_secondary_is_requested_once_params_known() {
        let mut n = negotiator(EngineConfig::default());
        n.select_primary(&[usb()]).expect("primary should be chosen");
        n.apply_rpc_ack(ProtocolVersion::MAX, Some(&secondary_tags(&[2, 1], &[2, 1])));

        assert_eq!(n.next_secondary_action(1, &[usb()]), SecondaryAction::Wait);

        let params = TransportParams {
            ip_address: Some("192.168.1.5".to_string()),
            port: Some(12345),
        };
        n.set_transport_params(TransportKind::Tcp, params.clone());
        assert_eq!(
            n.next_secondary_action(1, &[usb()]),
            SecondaryAction::Request {
                kind: TransportKind::Tcp,
                params
            }
        );
        assert_eq!(n.next_secondary_action(1, &[usb()]), SecondaryAction::Wait);
    }

    #[test]
    fn registration_failure_falls_back_when_primary_listed() {
        let mut n = negotiator(EngineConfig::default());
        n.select_primary(&[usb()]).expect("primary should be chosen");
        n.apply_rpc_ack(ProtocolVersion::MAX, Some(&secondary_tags(&[2, 1], &[2])));
        n.next_secondary_action(1, &[usb(), tcp()]);

        assert_eq!(n.registration_failed(1), Some(tcp()));
        assert_eq!(n.plan(ServiceType::Pcm), ServicePlan::Primary(usb()));
        assert_eq!(n.plan(ServiceType::Nav), ServicePlan::Reject);
        assert_eq!(n.next_secondary_action(1, &[usb(), tcp()]), SecondaryAction::Idle);
    }

    #[test]
    fn secondary_unsupported_by_caller_falls_back() {
        let mut n = negotiator(EngineConfig::default().with_secondary_transports(&[TransportKind::Usb]));
        n.select_primary(&[bt()]).expect("primary should be chosen");
        n.apply_rpc_ack(ProtocolVersion::MAX, Some(&secondary_tags(&[2, 1], &[2])));
        assert!(n.secondary_candidates().is_empty());
        assert_eq!(n.plan(ServiceType::Pcm), ServicePlan::Primary(bt()));
        assert_eq!(n.plan(ServiceType::Nav), ServicePlan::Reject);
    }

    #[test]
    fn unknown_secondary_names_are_skipped() {
        let mut n = negotiator(EngineConfig::default());
        n.select_primary(&[bt()]).expect("primary should be chosen");
        let tags = Tags::new().with(keys::SECONDARY_TRANSPORTS, vec!["CARRIER_PIGEON", "AOA_USB"]);
        n.apply_rpc_ack(ProtocolVersion::MAX, Some(&tags));
        assert_eq!(n.secondary_candidates(), vec![TransportKind::Usb]);
    }

    #[test]
    fn cancel_session_drops_pending_registration() {
        let mut n = negotiator(EngineConfig::default());
        n.select_primary(&[usb()]).expect("primary should be chosen");
        n.apply_rpc_ack(ProtocolVersion::MAX, Some(&secondary_tags(&[2], &[2])));
        n.next_secondary_action(4, &[usb(), tcp()]);
        assert_eq!(n.pending_registration(), Some(&tcp()));

        n.cancel_session(3);
        assert!(n.pending_registration().is_some());
        n.cancel_session(4);
        assert!(n.pending_registration().is_none());
    }

    #[test]
    fn losing_primary_reports_alternate() {
        let mut n = negotiator(EngineConfig::default());
        n.select_primary(&[usb(), bt()]).expect("primary should be chosen");
        assert_eq!(
            n.transport_lost(&usb(), &[bt()]),
            TransportLoss::Primary {
                alternate_available: true
            }
        );
        assert!(n.primary().is_none());

        n.select_primary(&[bt()]).expect("primary should be chosen");
        assert_eq!(
            n.transport_lost(&bt(), &[tcp()]),
            TransportLoss::Primary {
                alternate_available: false
            }
        );
    }

    #[test]
    fn losing_secondary_keeps_primary() {
        let mut n = negotiator(EngineConfig::default());
        n.select_primary(&[usb()]).expect("primary should be chosen");
        n.apply_rpc_ack(ProtocolVersion::MAX, Some(&secondary_tags(&[2], &[2])));
        n.next_secondary_action(1, &[usb(), tcp()]);
        n.registration_succeeded(1, None);

        assert_eq!(n.transport_lost(&tcp(), &[usb()]), TransportLoss::Secondary);
        assert_eq!(n.primary(), Some(&usb()));
        assert!(n.secondary().is_none());
        assert_eq!(n.plan(ServiceType::Nav), ServicePlan::Pending);
        assert_eq!(n.transport_lost(&bt(), &[usb()]), TransportLoss::Unrelated);
    }

    #[test]
    fn legacy_requires_bluetooth_preference() {
        let mut n = negotiator(EngineConfig::default().with_primary_transports(&[TransportKind::Usb]));
        assert!(!n.legacy_compatible());
        assert!(n.enter_legacy(&[bt()]).is_err());

        let mut n = negotiator(EngineConfig::default());
        assert_eq!(n.enter_legacy(&[usb(), bt()]).expect("legacy should start"), bt());
        assert!(n.is_legacy());
        assert_eq!(n.primary(), Some(&bt()));
    }

    #[test]
    fn slot_wire_values() {
        assert_eq!(TransportSlot::from_wire(1), Some(TransportSlot::Primary));
        assert_eq!(TransportSlot::from_wire(2), Some(TransportSlot::Secondary));
        assert_eq!(TransportSlot::from_wire(3), None);
    }
}
