use hulink_frame::ServiceType;
use hulink_transport::TransportKind;

use crate::security::SecurityError;

/// Errors that can occur in session and engine operations.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] hulink_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] hulink_frame::FrameError),

    /// None of the connected transports is in the primary preference list.
    #[error("no transports match requested primary transport")]
    NoMatchingPrimaryTransport,

    /// A send raced ahead of RPC service negotiation for this session.
    #[error("no message lock for session {0}")]
    NoMessageLock(u8),

    /// The service has no transport it may run on.
    #[error("service {service} unavailable on session {session_id}")]
    ServiceUnavailable {
        session_id: u8,
        service: ServiceType,
    },

    /// High-bandwidth services were required but the primary cannot carry them.
    #[error("primary transport {0} cannot carry high-bandwidth services")]
    HighBandwidthUnsupported(TransportKind),

    /// The security provider failed to encrypt or decrypt.
    #[error("security provider error: {0}")]
    Security(#[from] SecurityError),

    /// A protected message was sent or received with no security provider.
    #[error("message is protected but no security provider is configured")]
    NoSecurityProvider,

    /// A control frame had an unexpected shape or arrived out of place.
    #[error("unexpected control frame: {0}")]
    UnexpectedControl(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
