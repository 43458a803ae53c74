use hulink_frame::{ProtocolMessage, ProtocolVersion, ServiceType};
use hulink_transport::TransportRecord;

/// Why a service stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The module acknowledged our EndService.
    Requested,
    /// The module ended the service on its own.
    ModuleEnded,
    /// The transport carrying the service went away.
    TransportLost,
}

/// A service came up on the module side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStarted {
    pub session_id: u8,
    pub service: ServiceType,
    pub version: ProtocolVersion,
    pub hash_id: u32,
    pub encrypted: bool,
    pub transport: Option<TransportRecord>,
    pub auth_token: Option<String>,
}

/// Notifications delivered to the session owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    SessionStarted(SessionStarted),
    SessionEnded {
        session_id: u8,
        service: ServiceType,
        reason: EndReason,
    },
    SessionNak {
        session_id: u8,
        service: ServiceType,
        rejected_params: Option<Vec<String>>,
    },
    EndSessionNak {
        session_id: u8,
        service: ServiceType,
        reason: Option<String>,
    },
    /// Nav/Pcm cannot run: the primary transport is too narrow and the
    /// module offered no secondary.
    HighBandwidthRejected {
        session_id: u8,
        transport: TransportRecord,
    },
    TransportDisconnected {
        transport: TransportRecord,
        alternate_primary_available: bool,
    },
    Message(ProtocolMessage),
    ServiceDataAck {
        session_id: u8,
        service: ServiceType,
        bytes: u32,
    },
    ProtocolError {
        message: String,
        cause: Option<String>,
    },
}

impl EngineEvent {
    pub(crate) fn error(message: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::ProtocolError {
            message: message.into(),
            cause: Some(cause.to_string()),
        }
    }
}
