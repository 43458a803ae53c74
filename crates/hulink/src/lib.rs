//! Transport and session protocol engine for vehicle head-unit connections.
//!
//! hulink multiplexes RPC, bulk data, audio and video services between a
//! phone-side application and a head unit over one or more physical
//! transports.
//!
//! # Crate Structure
//!
//! - [`transport`]: transport records and the `TransportManager` collaborator
//! - [`frame`]: wire packets, control tags, fragmentation and reassembly
//! - [`session`]: sessions, transport negotiation and the protocol engine
//!   (behind the `session` feature)

/// Re-export transport types.
pub mod transport {
    pub use hulink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use hulink_frame::*;
}

/// Re-export session types (requires `session` feature).
#[cfg(feature = "session")]
pub mod session {
    pub use hulink_session::*;
}
