use bytes::Bytes;

use crate::error::Result;
use crate::record::{TransportKind, TransportParams, TransportRecord};

/// The physical transport layer as seen by the protocol engine.
///
/// Implementations own the actual sockets/accessories. All methods must
/// return promptly: `request_secondary` only starts a connection attempt and
/// reports the outcome later through the engine's connect/disconnect hooks.
pub trait TransportManager: Send + Sync {
    /// Write one encoded packet to the given transport.
    fn send(&self, bytes: Bytes, record: &TransportRecord) -> Result<()>;

    /// Currently connected transports, in connection order.
    fn connected(&self) -> Vec<TransportRecord>;

    /// Begin opening a secondary transport of `kind` using `params`.
    fn request_secondary(&self, kind: TransportKind, params: &TransportParams) -> Result<()>;
}

impl<T: TransportManager + ?Sized> TransportManager for std::sync::Arc<T> {
    fn send(&self, bytes: Bytes, record: &TransportRecord) -> Result<()> {
        (**self).send(bytes, record)
    }

    fn connected(&self) -> Vec<TransportRecord> {
        (**self).connected()
    }

    fn request_secondary(&self, kind: TransportKind, params: &TransportParams) -> Result<()> {
        (**self).request_secondary(kind, params)
    }
}
