//! Packet framing for the hulink head-unit protocol.
//!
//! Every wire frame starts with a fixed header whose size depends on the
//! protocol major version:
//! - 8 bytes for v1: version/flags/frame type, service, frame info, session id, data size
//! - 12 bytes for v2 and above: the same plus a 4-byte message id
//!
//! Logical messages larger than the service MTU are split into a First frame
//! and a run of Consecutive frames, and reassembled by [`FrameAssembler`] on
//! the receiving side.

pub mod assembler;
#[cfg(feature = "async")]
pub mod async_codec;
pub mod binary_header;
pub mod codec;
pub mod disassembler;
pub mod error;
pub mod message;
pub mod packet;
pub mod reader;
pub mod tags;
pub mod version;
pub mod writer;

pub use assembler::FrameAssembler;
#[cfg(feature = "async")]
pub use async_codec::PacketCodec;
pub use binary_header::{BinaryFrameHeader, RpcType, BINARY_HEADER_SIZE};
pub use codec::{decode_packet, encode_packet, packet_to_bytes, PacketConfig, DEFAULT_MAX_PAYLOAD};
pub use disassembler::{fragment, frame_count, sequence_number, FrameSpec};
pub use error::{FrameError, Result};
pub use message::ProtocolMessage;
pub use packet::{ControlFrameType, FrameType, Packet, ServiceType, FINAL_FRAME_SEQUENCE};
pub use reader::PacketReader;
pub use tags::{keys, Tags};
pub use version::{header_len, default_mtu, ProtocolVersion, MAX_MAJOR_VERSION};
pub use writer::PacketWriter;
