//! Splitting an outgoing message payload into wire frames.

use bytes::{BufMut, Bytes, BytesMut};

use crate::packet::{FrameType, Packet, ServiceType, FINAL_FRAME_SEQUENCE};

/// First-frame payload: total size (4) + frame count (4).
pub const FIRST_FRAME_PAYLOAD_SIZE: usize = 8;

/// Header fields shared by every frame of one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSpec {
    pub version: u8,
    pub service: ServiceType,
    pub session_id: u8,
    pub message_id: u32,
    pub encrypted: bool,
}

impl FrameSpec {
    fn packet(&self, frame_type: FrameType, frame_info: u8) -> Packet {
        Packet::new(self.version, frame_type, self.service, frame_info)
            .with_session_id(self.session_id)
            .with_message_id(self.message_id)
            .with_encrypted(self.encrypted)
    }
}

/// Number of data frames needed to carry `len` bytes at `mtu` bytes per frame.
pub fn frame_count(len: usize, mtu: usize) -> usize {
    len.div_ceil(mtu.max(1)).max(1)
}

/// Sequence number for consecutive frame `index` (1-based) out of `count`.
///
/// Non-terminal frames cycle through `1..=255` so they never collide with the
/// final-frame sentinel; frame `count` always carries the sentinel.
pub fn sequence_number(index: usize, count: usize) -> u8 {
    if index >= count {
        FINAL_FRAME_SEQUENCE
    } else {
        ((index - 1) % 255 + 1) as u8
    }
}

/// Split `payload` into frames of at most `mtu` payload bytes.
///
/// Payloads that fit in one frame produce a single Single frame. Larger ones
/// produce a First frame announcing `(total_size, frame_count)` followed by
/// `frame_count` Consecutive frames.
pub fn fragment(spec: &FrameSpec, payload: &Bytes, mtu: usize) -> Vec<Packet> {
    let mtu = mtu.max(1);
    if payload.len() <= mtu {
        return vec![spec.packet(FrameType::Single, 0).with_payload(payload.clone())];
    }

    let count = frame_count(payload.len(), mtu);
    let mut first = BytesMut::with_capacity(FIRST_FRAME_PAYLOAD_SIZE);
    first.put_u32(payload.len() as u32);
    first.put_u32(count as u32);

    let mut packets = Vec::with_capacity(count + 1);
    packets.push(spec.packet(FrameType::First, 0).with_payload(first.freeze()));

    for (i, start) in (0..payload.len()).step_by(mtu).enumerate() {
        let end = (start + mtu).min(payload.len());
        let seq = sequence_number(i + 1, count);
        packets.push(
            spec.packet(FrameType::Consecutive, seq)
                .with_payload(payload.slice(start..end)),
        );
    }
    packets
}
