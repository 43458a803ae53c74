//! Transport collaborator abstraction.
//!
//! The protocol engine never moves bytes itself. It hands encoded packets to
//! a [`TransportManager`] together with the [`TransportRecord`] that should
//! carry them, and asks the manager to open secondary transports when a
//! high-bandwidth service wants one.
//!
//! This is the lowest layer of hulink. Everything else builds on top of the
//! types defined here.

pub mod error;
pub mod memory;
pub mod record;
pub mod traits;

pub use error::{Result, TransportError};
pub use memory::{MemoryTransport, SentBuffer};
pub use record::{TransportKind, TransportParams, TransportRecord};
pub use traits::TransportManager;
