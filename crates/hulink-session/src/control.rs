//! Building and reading control frames.
//!
//! From protocol 5 on, control payloads are a tag block. Older versions carry
//! at most a 4-byte big-endian value (hash id, byte count) in the payload.

use hulink_frame::{keys, ControlFrameType, Packet, ProtocolVersion, ServiceType, Tags};
use hulink_transport::TransportParams;
use tracing::debug;

use crate::video::VideoStreamingParams;

/// First version whose control frames carry tag blocks.
pub const TAGGED_CONTROL_VERSION: u8 = 5;

/// StartService for the RPC service, offering `max` to the module.
///
/// Sent with the highest header version so the module sees the tag block.
pub fn start_rpc_service(max: ProtocolVersion, session_id: u8, encrypted: bool) -> Packet {
    let tags = Tags::new().with(keys::PROTOCOL_VERSION, max.to_string());
    Packet::control(max.major, ServiceType::Rpc, ControlFrameType::StartService)
        .with_session_id(session_id)
        .with_encrypted(encrypted)
        .with_tags(tags)
}

/// StartService for any service at the negotiated header `version`.
pub fn start_service(
    version: u8,
    service: ServiceType,
    session_id: u8,
    encrypted: bool,
    video: Option<&VideoStreamingParams>,
) -> Packet {
    let packet = Packet::control(version, service, ControlFrameType::StartService)
        .with_session_id(session_id)
        .with_encrypted(encrypted);
    match video {
        Some(params) if service == ServiceType::Nav && version >= TAGGED_CONTROL_VERSION => {
            let mut tags = Tags::new();
            params.write_tags(&mut tags);
            packet.with_tags(tags)
        }
        _ => packet,
    }
}

/// HeartbeatACK answering `heartbeat` with the same version, service and session.
pub fn heartbeat_ack(heartbeat: &Packet) -> Packet {
    Packet::control(heartbeat.version(), heartbeat.service_type(), ControlFrameType::HeartbeatAck)
        .with_session_id(heartbeat.session_id())
}

/// EndService. The RPC service identifies its session with the hash id.
pub fn end_service(version: u8, service: ServiceType, session_id: u8, hash_id: Option<u32>) -> Packet {
    let packet = Packet::control(version, service, ControlFrameType::EndService).with_session_id(session_id);
    match hash_id {
        Some(hash_id) if version >= TAGGED_CONTROL_VERSION => {
            packet.with_tags(Tags::new().with(keys::HASH_ID, hash_id))
        }
        Some(hash_id) if version > 1 => packet.with_payload(hash_id.to_be_bytes().to_vec()),
        _ => packet,
    }
}

pub fn register_secondary_transport(version: u8, session_id: u8) -> Packet {
    Packet::control(version, ServiceType::Control, ControlFrameType::RegisterSecondaryTransport)
        .with_session_id(session_id)
}

/// ServiceDataACK reporting `bytes` processed.
pub fn service_data_ack(version: u8, service: ServiceType, session_id: u8, bytes: u32) -> Packet {
    Packet::control(version, service, ControlFrameType::ServiceDataAck)
        .with_session_id(session_id)
        .with_payload(bytes.to_be_bytes().to_vec())
}

/// Version the module acknowledged, clamped to `max`.
///
/// Prefers the `protocolVersion` tag and falls back to the header major.
pub fn acked_version(packet: &Packet, max: ProtocolVersion) -> ProtocolVersion {
    let tagged = packet
        .tags()
        .and_then(|tags| tags.get_str(keys::PROTOCOL_VERSION))
        .and_then(|text| match text.parse::<ProtocolVersion>() {
            Ok(version) => Some(version),
            Err(err) => {
                debug!(error = %err, "ignoring unparseable protocolVersion tag");
                None
            }
        });
    match tagged {
        Some(version) => version.clamp_to(max),
        None => ProtocolVersion::from_major(packet.version(), max),
    }
}

/// Session hash id from an RPC StartServiceACK.
///
/// Versions 2 to 4 carry it in the header message id field.
pub fn hash_id(packet: &Packet, version: ProtocolVersion) -> u32 {
    if let Some(hash_id) = packet.tags().and_then(|tags| tags.get_u32(keys::HASH_ID)) {
        return hash_id;
    }
    match version.major {
        2..=4 => packet.message_id(),
        _ => read_u32(packet).unwrap_or(0),
    }
}

pub fn mtu(packet: &Packet) -> Option<usize> {
    packet
        .tags()
        .and_then(|tags| tags.get_u64(keys::MTU))
        .and_then(|mtu| usize::try_from(mtu).ok())
        .filter(|mtu| *mtu > 0)
}

pub fn auth_token(packet: &Packet) -> Option<String> {
    packet
        .tags()
        .and_then(|tags| tags.get_str(keys::AUTH_TOKEN))
        .map(str::to_string)
}

pub fn reason(packet: &Packet) -> Option<String> {
    packet
        .tags()
        .and_then(|tags| tags.get_str(keys::REASON))
        .map(str::to_string)
}

pub fn rejected_params(packet: &Packet) -> Option<Vec<String>> {
    packet.tags().and_then(|tags| tags.get_str_list(keys::REJECTED_PARAMS))
}

/// TCP endpoint announced in a TransportEventUpdate.
pub fn transport_params(packet: &Packet) -> Option<TransportParams> {
    let tags = packet.tags()?;
    let ip_address = tags
        .get_str(keys::TCP_IP_ADDRESS)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string);
    let port = tags
        .get_u64(keys::TCP_PORT)
        .and_then(|port| u16::try_from(port).ok());
    if !tags.contains(keys::TCP_IP_ADDRESS) && !tags.contains(keys::TCP_PORT) {
        return None;
    }
    Some(TransportParams { ip_address, port })
}

/// A bare 4-byte big-endian payload.
pub fn read_u32(packet: &Packet) -> Option<u32> {
    let payload: [u8; 4] = packet.payload().as_ref().try_into().ok()?;
    Some(u32::from_be_bytes(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_start_offers_max_version() {
        let packet = start_rpc_service(ProtocolVersion::MAX, 0, false);
        assert_eq!(packet.version(), 5);
        assert_eq!(packet.control_frame_type().expect("control type"), ControlFrameType::StartService);
        let tags = Tags::decode(packet.payload()).expect("tags should decode");
        assert_eq!(tags.get_str(keys::PROTOCOL_VERSION), Some("5.2.0"));
    }

    #[test]
    fn nav_start_carries_video_tags_only_when_tagged() {
        let params = VideoStreamingParams::default();
        let packet = start_service(5, ServiceType::Nav, 1, false, Some(&params));
        assert_eq!(packet.tags().and_then(|t| t.get_u32(keys::WIDTH)), Some(800));

        let packet = start_service(4, ServiceType::Nav, 1, false, Some(&params));
        assert!(packet.tags().is_none());
        assert!(packet.payload().is_empty());

        let packet = start_service(5, ServiceType::Pcm, 1, false, Some(&params));
        assert!(packet.tags().is_none());
    }

    #[test]
    fn end_service_hash_id_encoding_by_version() {
        let v5 = end_service(5, ServiceType::Rpc, 1, Some(77));
        assert_eq!(v5.tags().and_then(|t| t.get_u32(keys::HASH_ID)), Some(77));

        let v3 = end_service(3, ServiceType::Rpc, 1, Some(77));
        assert_eq!(v3.payload().as_ref(), &[0, 0, 0, 77]);

        let v1 = end_service(1, ServiceType::Rpc, 1, Some(77));
        assert!(v1.payload().is_empty());
    }

    #[test]
    fn heartbeat_ack_mirrors_request() {
        let heartbeat = Packet::control(3, ServiceType::Control, ControlFrameType::Heartbeat).with_session_id(6);
        let ack = heartbeat_ack(&heartbeat);
        assert_eq!(ack.version(), 3);
        assert_eq!(ack.session_id(), 6);
        assert_eq!(ack.control_frame_type().expect("control type"), ControlFrameType::HeartbeatAck);
    }

    #[test]
    fn acked_version_prefers_tag_and_clamps() {
        let tagged = Packet::control(5, ServiceType::Rpc, ControlFrameType::StartServiceAck)
            .with_tags(Tags::new().with(keys::PROTOCOL_VERSION, "9.1.0"));
        assert_eq!(acked_version(&tagged, ProtocolVersion::MAX), ProtocolVersion::MAX);

        let tagged = Packet::control(5, ServiceType::Rpc, ControlFrameType::StartServiceAck)
            .with_tags(Tags::new().with(keys::PROTOCOL_VERSION, "5.0.1"));
        assert_eq!(acked_version(&tagged, ProtocolVersion::MAX), ProtocolVersion::new(5, 0, 1));

        let bare = Packet::control(3, ServiceType::Rpc, ControlFrameType::StartServiceAck);
        assert_eq!(acked_version(&bare, ProtocolVersion::MAX), ProtocolVersion::new(3, 0, 0));

        let untagged_v5 = Packet::control(5, ServiceType::Rpc, ControlFrameType::StartServiceAck);
        assert_eq!(acked_version(&untagged_v5, ProtocolVersion::MAX), ProtocolVersion::new(5, 0, 0));
    }

    #[test]
    fn hash_id_from_header_for_v2_to_v4() {
        let packet = Packet::control(3, ServiceType::Rpc, ControlFrameType::StartServiceAck).with_message_id(0xBEEF);
        assert_eq!(hash_id(&packet, ProtocolVersion::new(3, 0, 0)), 0xBEEF);

        let packet = Packet::control(5, ServiceType::Rpc, ControlFrameType::StartServiceAck)
            .with_tags(Tags::new().with(keys::HASH_ID, 12u32));
        assert_eq!(hash_id(&packet, ProtocolVersion::MAX), 12);

        let packet = Packet::control(1, ServiceType::Rpc, ControlFrameType::StartServiceAck);
        assert_eq!(hash_id(&packet, ProtocolVersion::V1), 0);
    }

    #[test]
    fn transport_params_from_update() {
        let packet = Packet::control(5, ServiceType::Control, ControlFrameType::TransportEventUpdate).with_tags(
            Tags::new()
                .with(keys::TCP_IP_ADDRESS, "192.168.1.5")
                .with(keys::TCP_PORT, 12345u32),
        );
        let params = transport_params(&packet).expect("params should parse");
        assert_eq!(params.ip_address.as_deref(), Some("192.168.1.5"));
        assert_eq!(params.port, Some(12345));
        assert!(params.is_dialable());

        let empty = Packet::control(5, ServiceType::Control, ControlFrameType::TransportEventUpdate)
            .with_tags(Tags::new().with(keys::TCP_IP_ADDRESS, ""));
        let params = transport_params(&empty).expect("params should parse");
        assert!(!params.is_dialable());
    }

    #[test]
    fn service_data_ack_payload() {
        let packet = service_data_ack(3, ServiceType::Nav, 2, 4096);
        assert_eq!(read_u32(&packet), Some(4096));
        assert_eq!(read_u32(&Packet::control(3, ServiceType::Nav, ControlFrameType::ServiceDataAck)), None);
    }
}
