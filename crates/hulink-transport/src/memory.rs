//! In-process transport manager.
//!
//! Records every buffer handed to it instead of writing to hardware. Used by
//! the engine tests and by the CLI dry-run commands.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use bytes::Bytes;

use crate::error::{Result, TransportError};
use crate::record::{TransportKind, TransportParams, TransportRecord};
use crate::traits::TransportManager;

/// One buffer captured by [`MemoryTransport::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentBuffer {
    pub record: TransportRecord,
    pub bytes: Bytes,
}

/// A [`TransportManager`] that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    connected: Mutex<Vec<TransportRecord>>,
    sent: Mutex<Vec<SentBuffer>>,
    secondary_requests: Mutex<Vec<(TransportKind, TransportParams)>>,
    fail_sends: AtomicBool,
}

impl MemoryTransport {
    /// Create a manager with the given transports already connected.
    pub fn new(connected: impl IntoIterator<Item = TransportRecord>) -> Self {
        Self {
            connected: Mutex::new(connected.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Mark a transport as connected.
    pub fn connect(&self, record: TransportRecord) {
        let mut connected = lock(&self.connected);
        if !connected.contains(&record) {
            connected.push(record);
        }
    }

    /// Mark a transport as disconnected.
    pub fn disconnect(&self, record: &TransportRecord) {
        lock(&self.connected).retain(|r| r != record);
    }

    /// Every buffer sent so far.
    pub fn sent(&self) -> Vec<SentBuffer> {
        lock(&self.sent).clone()
    }

    /// Drain the sent buffers.
    pub fn take_sent(&self) -> Vec<SentBuffer> {
        std::mem::take(&mut *lock(&self.sent))
    }

    /// Every secondary transport request made so far.
    pub fn secondary_requests(&self) -> Vec<(TransportKind, TransportParams)> {
        lock(&self.secondary_requests).clone()
    }

    /// Make subsequent sends fail, to exercise error paths.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }
}

impl TransportManager for MemoryTransport {
    fn send(&self, bytes: Bytes, record: &TransportRecord) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Send {
                record: record.clone(),
                reason: "send failure injected".to_string(),
            });
        }
        if !lock(&self.connected).contains(record) {
            return Err(TransportError::Disconnected(record.clone()));
        }
        lock(&self.sent).push(SentBuffer {
            record: record.clone(),
            bytes,
        });
        Ok(())
    }

    fn connected(&self) -> Vec<TransportRecord> {
        lock(&self.connected).clone()
    }

    fn request_secondary(&self, kind: TransportKind, params: &TransportParams) -> Result<()> {
        tracing::debug!(transport = %kind, ?params, "secondary transport requested");
        lock(&self.secondary_requests).push((kind, params.clone()));
        Ok(())
    }
}

// A poisoned lock only means a test thread panicked mid-push; the data is still usable.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
