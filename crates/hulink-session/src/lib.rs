//! Sessions, transport negotiation and the protocol engine.
//!
//! [`ProtocolEngine`] is the entry point: feed it transport events and
//! received packets, call its operations to start services and send
//! messages, and read [`EngineEvent`]s from the channel it hands back.

pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod event;
pub mod negotiator;
pub mod security;
pub mod session;
pub mod video;

pub use config::EngineConfig;
pub use engine::ProtocolEngine;
pub use error::{ProtocolError, Result};
pub use event::{EndReason, EngineEvent, SessionStarted};
pub use negotiator::{SecondaryAction, ServicePlan, TransportLoss, TransportNegotiator, TransportSlot};
pub use security::{SecurityError, SecurityProvider};
pub use session::{SendLocks, SessionEntry, SessionTable};
pub use video::{VideoParamsProvider, VideoStreamingParams};
