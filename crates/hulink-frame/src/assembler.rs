//! Reassembly of multi-frame messages.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::codec::DEFAULT_MAX_PAYLOAD;
use crate::disassembler::FIRST_FRAME_PAYLOAD_SIZE;
use crate::error::{FrameError, Result};
use crate::message::ProtocolMessage;
use crate::packet::{FrameType, Packet, ServiceType};

/// In-flight messages are keyed per session so two sessions reusing a
/// message id cannot corrupt each other.
pub type AssemblyKey = (u8, u32);

#[derive(Debug)]
struct InFlight {
    service: ServiceType,
    declared_size: usize,
    frame_count: u32,
    buffer: Vec<u8>,
}

/// Accumulates consecutive frames until a message is complete.
///
/// Safe to share between the receive path and session teardown: every map
/// access goes through one internal lock.
#[derive(Debug)]
pub struct FrameAssembler {
    in_flight: Mutex<HashMap<AssemblyKey, InFlight>>,
    max_message_size: usize,
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD)
    }
}

impl FrameAssembler {
    /// Create an assembler refusing messages declared larger than `max_message_size`.
    pub fn new(max_message_size: usize) -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
            max_message_size,
        }
    }

    /// Feed one data packet.
    ///
    /// Returns the completed message when `packet` finishes one, `None` while
    /// a message is still accumulating (or the frame was dropped), and an error
    /// when the message is malformed. Errors discard the in-flight state for
    /// that message only.
    pub fn handle(&self, packet: &Packet) -> Result<Option<ProtocolMessage>> {
        let key = (packet.session_id(), packet.message_id());
        match packet.frame_type() {
            FrameType::Single => ProtocolMessage::from_payload(
                packet.session_id(),
                packet.service_type(),
                packet.version(),
                packet.message_id(),
                packet.is_encrypted(),
                packet.payload().clone(),
            )
            .map(Some),
            FrameType::First => {
                self.begin(key, packet)?;
                Ok(None)
            }
            FrameType::Consecutive => self.append(key, packet),
            FrameType::Control => Err(FrameError::MalformedHeader(
                "control frames are not assembled".to_string(),
            )),
        }
    }

    fn begin(&self, key: AssemblyKey, packet: &Packet) -> Result<()> {
        let payload = packet.payload();
        if payload.len() < FIRST_FRAME_PAYLOAD_SIZE {
            self.lock().remove(&key);
            return Err(FrameError::MalformedHeader(format!(
                "first frame payload is {} bytes, expected {FIRST_FRAME_PAYLOAD_SIZE}",
                payload.len()
            )));
        }

        let declared_size = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
        let frame_count = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);

        if declared_size > self.max_message_size {
            self.lock().remove(&key);
            tracing::warn!(
                session_id = key.0,
                message_id = key.1,
                declared_size,
                "discarding message with oversized declared size"
            );
            return Err(FrameError::MessageTooLarge {
                size: declared_size,
                max: self.max_message_size,
            });
        }

        let mut buffer = Vec::new();
        if buffer.try_reserve_exact(declared_size).is_err() {
            self.lock().remove(&key);
            tracing::error!(
                session_id = key.0,
                message_id = key.1,
                declared_size,
                "cannot allocate reassembly buffer"
            );
            return Err(FrameError::AllocationFailed(declared_size));
        }

        let entry = InFlight {
            service: packet.service_type(),
            declared_size,
            frame_count,
            buffer,
        };
        if self.lock().insert(key, entry).is_some() {
            tracing::warn!(
                session_id = key.0,
                message_id = key.1,
                "first frame for a message already in flight; partial data replaced"
            );
        }
        tracing::trace!(session_id = key.0, message_id = key.1, declared_size, frame_count, "message assembly started");
        Ok(())
    }

    fn append(&self, key: AssemblyKey, packet: &Packet) -> Result<Option<ProtocolMessage>> {
        let finished = {
            let mut in_flight = self.lock();
            let Some(entry) = in_flight.get_mut(&key) else {
                tracing::trace!(
                    session_id = key.0,
                    message_id = key.1,
                    "consecutive frame without first frame dropped"
                );
                return Ok(None);
            };

            entry.buffer.extend_from_slice(packet.payload());
            if entry.buffer.len() > entry.declared_size {
                let size = entry.buffer.len();
                let declared = entry.declared_size;
                in_flight.remove(&key);
                return Err(FrameError::MalformedHeader(format!(
                    "received {size} bytes for a message declared as {declared}"
                )));
            }

            if !packet.is_final_frame() {
                return Ok(None);
            }
            in_flight.remove(&key)
        };

        let Some(entry) = finished else {
            return Ok(None);
        };
        if entry.buffer.len() != entry.declared_size {
            return Err(FrameError::MalformedHeader(format!(
                "message ended after {} of {} declared bytes ({} frames announced)",
                entry.buffer.len(),
                entry.declared_size,
                entry.frame_count
            )));
        }

        ProtocolMessage::from_payload(
            key.0,
            entry.service,
            packet.version(),
            key.1,
            packet.is_encrypted(),
            entry.buffer.into(),
        )
        .map(Some)
    }

    /// Number of messages currently accumulating.
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    /// Drop every in-flight message belonging to `session_id`.
    pub fn discard_session(&self, session_id: u8) -> usize {
        let mut in_flight = self.lock();
        let before = in_flight.len();
        in_flight.retain(|(session, _), _| *session != session_id);
        before - in_flight.len()
    }

    /// Drop every in-flight message.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<AssemblyKey, InFlight>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use bytes::Bytes;

    use super::*;
    use crate::binary_header::RpcType;
    use crate::disassembler::{fragment, FrameSpec};

    fn spec(version: u8, session_id: u8, message_id: u32) -> FrameSpec {
        FrameSpec {
            version,
            service: ServiceType::Rpc,
            session_id,
            message_id,
            encrypted: false,
        }
    }

    fn feed(assembler: &FrameAssembler, packets: &[Packet]) -> Option<ProtocolMessage> {
        let mut out = None;
        for packet in packets {
            if let Some(message) = assembler.handle(packet).unwrap() {
                assert!(out.is_none(), "message completed twice");
                out = Some(message);
            }
        }
        out
    }

    #[test]
    fn fragment_then_assemble_reproduces_payload() {
        let assembler = FrameAssembler::default();
        for (len, mtu) in [(1usize, 1usize), (100, 7), (4096, 1000), (5000, 5000), (70_000, 1488)] {
            let payload = Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>());
            let packets = fragment(&spec(1, 1, len as u32), &payload, mtu);
            let message = feed(&assembler, &packets).expect("message should complete");
            assert_eq!(message.params, payload, "len={len} mtu={mtu}");
        }
        assert_eq!(assembler.in_flight(), 0);
    }

    #[test]
    fn single_and_multi_frame_decode_identically() {
        let original = ProtocolMessage::rpc(4, RpcType::Request, 32, 7, &br#"{"x":1}"#[..])
            .with_bulk(vec![0xAA; 300]);
        let payload = original.to_payload(3).unwrap();

        let assembler = FrameAssembler::default();
        let single = feed(&assembler, &fragment(&spec(3, 4, 10), &payload, 10_000)).unwrap();
        let multi = feed(&assembler, &fragment(&spec(3, 4, 10), &payload, 64)).unwrap();

        assert_eq!(single, multi);
        assert_eq!(single.function_id, 32);
        assert_eq!(single.correlation_id, 7);
        assert_eq!(single.params.as_ref(), br#"{"x":1}"#);
        assert_eq!(single.bulk.as_ref().unwrap().len(), 300);
    }

    #[test]
    fn consecutive_without_first_is_dropped() {
        let assembler = FrameAssembler::default();
        let payload = Bytes::from(vec![1u8; 50]);
        let packets = fragment(&spec(2, 1, 3), &payload, 10);
        for packet in &packets[1..] {
            assert!(assembler.handle(packet).unwrap().is_none());
        }
        assert_eq!(assembler.in_flight(), 0);
    }

    #[test]
    fn oversized_declaration_is_rejected() {
        let assembler = FrameAssembler::new(1024);
        let payload = Bytes::from(vec![0u8; 4096]);
        let packets = fragment(&spec(2, 1, 1), &payload, 512);
        let err = assembler.handle(&packets[0]).unwrap_err();
        assert!(matches!(err, FrameError::MessageTooLarge { size: 4096, max: 1024 }));
        assert_eq!(assembler.in_flight(), 0);
    }

    #[test]
    fn garbled_size_cannot_allocate() {
        let assembler = FrameAssembler::new(usize::MAX);
        let first = Packet::new(2, FrameType::First, ServiceType::Rpc, 0)
            .with_session_id(1)
            .with_message_id(1)
            .with_payload(vec![0xFF, 0xFF, 0xFF, 0xFF, 0, 0, 0, 1]);
        // 4 GiB may or may not be allocatable here; either way nothing panics.
        match assembler.handle(&first) {
            Ok(None) => assembler.clear(),
            Err(FrameError::AllocationFailed(_)) => assert_eq!(assembler.in_flight(), 0),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn short_first_frame_is_malformed() {
        let assembler = FrameAssembler::default();
        let first = Packet::new(2, FrameType::First, ServiceType::Rpc, 0).with_payload(vec![0, 0, 1]);
        assert!(matches!(
            assembler.handle(&first),
            Err(FrameError::MalformedHeader(_))
        ));
    }

    #[test]
    fn overflowing_consecutive_frames_are_malformed() {
        let assembler = FrameAssembler::default();
        let first = Packet::new(2, FrameType::First, ServiceType::Rpc, 0)
            .with_message_id(9)
            .with_payload(vec![0, 0, 0, 4, 0, 0, 0, 1]);
        assembler.handle(&first).unwrap();
        let too_much = Packet::new(2, FrameType::Consecutive, ServiceType::Rpc, 0)
            .with_message_id(9)
            .with_payload(vec![0u8; 8]);
        assert!(assembler.handle(&too_much).is_err());
        assert_eq!(assembler.in_flight(), 0);
    }

    #[test]
    fn truncated_message_is_not_delivered() {
        let assembler = FrameAssembler::default();
        let first = Packet::new(1, FrameType::First, ServiceType::Rpc, 0)
            .with_payload(vec![0, 0, 0, 10, 0, 0, 0, 2]);
        assembler.handle(&first).unwrap();
        let last = Packet::new(1, FrameType::Consecutive, ServiceType::Rpc, 0).with_payload(vec![1u8; 4]);
        assert!(matches!(
            assembler.handle(&last),
            Err(FrameError::MalformedHeader(_))
        ));
    }

    #[test]
    fn malformed_binary_header_is_reported() {
        let assembler = FrameAssembler::default();
        let packet = Packet::new(2, FrameType::Single, ServiceType::Rpc, 0).with_payload(vec![0u8; 6]);
        assert!(matches!(
            assembler.handle(&packet),
            Err(FrameError::MalformedHeader(_))
        ));
    }

    #[test]
    fn repeated_first_frame_replaces_partial_state() {
        let assembler = FrameAssembler::default();
        let payload = Bytes::from(vec![3u8; 30]);
        let packets = fragment(&spec(1, 1, 2), &payload, 10);

        assembler.handle(&packets[0]).unwrap();
        assembler.handle(&packets[1]).unwrap();
        let message = feed(&assembler, &packets).unwrap();
        assert_eq!(message.params, payload);
    }

    #[test]
    fn sessions_with_same_message_id_do_not_collide() {
        let assembler = FrameAssembler::default();
        let a = Bytes::from(vec![0xAu8; 40]);
        let b = Bytes::from(vec![0xBu8; 40]);
        let pa = fragment(&spec(1, 1, 7), &a, 10);
        let pb = fragment(&spec(1, 2, 7), &b, 10);

        let mut done = Vec::new();
        for (x, y) in pa.iter().zip(pb.iter()) {
            done.extend(assembler.handle(x).unwrap());
            done.extend(assembler.handle(y).unwrap());
        }
        assert_eq!(done.len(), 2);
        assert_eq!(done[0].params, a);
        assert_eq!(done[1].params, b);
    }

    #[test]
    fn discard_session_only_touches_that_session() {
        let assembler = FrameAssembler::default();
        for (session, message) in [(1u8, 1u32), (1, 2), (2, 1)] {
            let first = Packet::new(2, FrameType::First, ServiceType::Rpc, 0)
                .with_session_id(session)
                .with_message_id(message)
                .with_payload(vec![0, 0, 0, 20, 0, 0, 0, 2]);
            assembler.handle(&first).unwrap();
        }
        assert_eq!(assembler.discard_session(1), 2);
        assert_eq!(assembler.in_flight(), 1);
        assembler.clear();
        assert_eq!(assembler.in_flight(), 0);
    }

    #[test]
    fn concurrent_assembly_across_threads() {
        let assembler = Arc::new(FrameAssembler::default());
        let handles: Vec<_> = (0..8u32)
            .map(|i| {
                let assembler = Arc::clone(&assembler);
                thread::spawn(move || {
                    let payload = Bytes::from(vec![i as u8; 1000]);
                    let packets = fragment(&spec(1, 1, i), &payload, 33);
                    feed(&assembler, &packets).unwrap().params == payload
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(assembler.in_flight(), 0);
    }
}
