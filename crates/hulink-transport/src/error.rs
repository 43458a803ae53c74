use crate::record::{TransportKind, TransportRecord};

/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The transport refused or failed to carry the bytes.
    #[error("failed to send on {record}: {reason}")]
    Send {
        record: TransportRecord,
        reason: String,
    },

    /// The transport is not (or no longer) connected.
    #[error("transport {0} is disconnected")]
    Disconnected(TransportRecord),

    /// A transport name received from the module did not map to a known kind.
    #[error("unknown transport name '{0}'")]
    UnknownTransport(String),

    /// A secondary transport of this kind cannot be opened.
    #[error("secondary transport {0} unavailable: {1}")]
    SecondaryUnavailable(TransportKind, String),

    /// An I/O error occurred on the transport.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;
