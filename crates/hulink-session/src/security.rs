//! Encryption hook points.
//!
//! The cipher itself lives outside this crate. The engine only decides when
//! to call it. Single and consecutive frames of a protected message are
//! sealed one by one after fragmentation and opened one by one before
//! assembly.

/// Failure reported by a [`SecurityProvider`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct SecurityError(pub String);

impl SecurityError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// External encryption provider.
pub trait SecurityProvider: Send + Sync {
    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, SecurityError>;

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, SecurityError>;
}
