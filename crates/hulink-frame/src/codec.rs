use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::packet::{FrameType, Packet, ServiceType};
use crate::tags::Tags;
use crate::version::{header_len, V1_HEADER_SIZE};

/// Encrypted flag in the first header byte.
pub const ENCRYPTION_MASK: u8 = 0x08;

/// Frame type bits in the first header byte.
pub const FRAME_TYPE_MASK: u8 = 0x07;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Encode a packet into the wire format.
///
/// Wire format:
/// ```text
/// ┌────────┬──────┬───────┬─────────┬────────────┬──────────┬───────────┬──────────┐
/// │ ver(4b)│E(1b) │FT(3b) │ service │ frame info │ session  │ data size │ msg id   │
/// │        │      │       │  (1B)   │    (1B)    │   (1B)   │  (4B BE)  │ (4B BE)  │
/// └────────┴──────┴───────┴─────────┴────────────┴──────────┴───────────┴──────────┘
///                                                               msg id only for v > 1
/// ```
pub fn encode_packet(packet: &Packet, dst: &mut BytesMut) -> Result<()> {
    if packet.version() == 0 || packet.version() > 0x0F {
        return Err(FrameError::UnknownVersion(packet.version()));
    }
    let payload = packet.payload();
    if payload.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }

    let mut first = (packet.version() << 4) | packet.frame_type().to_wire();
    if packet.is_encrypted() {
        first |= ENCRYPTION_MASK;
    }

    dst.reserve(header_len(packet.version()) + payload.len());
    dst.put_u8(first);
    dst.put_u8(packet.service_type().to_wire());
    dst.put_u8(packet.frame_info());
    dst.put_u8(packet.session_id());
    dst.put_u32(payload.len() as u32);
    if packet.version() > 1 {
        dst.put_u32(packet.message_id());
    }
    dst.put_slice(payload);
    Ok(())
}

/// Encode a packet into a fresh buffer.
pub fn packet_to_bytes(packet: &Packet) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    encode_packet(packet, &mut buf)?;
    Ok(buf.freeze())
}

/// Decode a packet from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete packet yet.
/// On success, consumes the packet bytes from the buffer.
pub fn decode_packet(src: &mut BytesMut, max_payload: usize) -> Result<Option<Packet>> {
    if src.is_empty() {
        return Ok(None);
    }

    let version = src[0] >> 4;
    if version == 0 {
        return Err(FrameError::UnknownVersion(version));
    }
    let header = header_len(version);
    if src.len() < header {
        return Ok(None); // Need more data
    }

    let encrypted = src[0] & ENCRYPTION_MASK != 0;
    let frame_type = FrameType::try_from(src[0] & FRAME_TYPE_MASK)?;
    let service_type = ServiceType::try_from(src[1])?;
    let frame_info = src[2];
    let session_id = src[3];
    let payload_len = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;
    let message_id = if header > V1_HEADER_SIZE {
        u32::from_be_bytes([src[8], src[9], src[10], src[11]])
    } else {
        0
    };

    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let total = header + payload_len;
    if src.len() < total {
        return Ok(None); // Need more data
    }

    src.advance(header);
    let payload = src.split_to(payload_len).freeze();

    let tags = if frame_type == FrameType::Control && version >= 5 && !payload.is_empty() {
        match Tags::decode(&payload) {
            Ok(tags) => Some(tags),
            Err(err) => {
                tracing::debug!(session_id, %service_type, error = %err, "control payload is not a tag block");
                None
            }
        }
    } else {
        None
    };

    let packet = Packet::new(version, frame_type, service_type, frame_info)
        .with_encrypted(encrypted)
        .with_session_id(session_id)
        .with_message_id(message_id)
        .with_decoded_tags(payload, tags);
    Ok(Some(packet))
}

/// Configuration for the packet reader/writer.
#[derive(Debug, Clone)]
pub struct PacketConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for PacketConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
