use std::io::Cursor;
use std::sync::Arc;

use hulink_frame::{
    header_len, keys, ControlFrameType, FrameError, Packet, PacketConfig, PacketReader, ProtocolMessage,
    ProtocolVersion, RpcType, ServiceType, Tags, BINARY_HEADER_SIZE, DEFAULT_MAX_PAYLOAD,
};
use hulink_session::control::TAGGED_CONTROL_VERSION;
use hulink_session::{EngineConfig, EngineEvent, ProtocolEngine};
use hulink_transport::{MemoryTransport, TransportKind, TransportRecord};
use tracing::info;

use crate::cmd::PlanArgs;
use crate::exit::{frame_error, protocol_error, CliError, CliResult, PROTOCOL, SUCCESS};
use crate::output::{print_packets, OutputFormat, PacketRow};

const PLAN_SESSION_ID: u8 = 1;
const PLAN_HASH_ID: u32 = 1;
const PLAN_FUNCTION_ID: u32 = 1;

/// Dry-run a message through the engine over an in-memory transport and
/// print the frames it would put on the wire.
pub fn run(args: PlanArgs, format: OutputFormat) -> CliResult<i32> {
    if args.mtu.is_some() && args.version < TAGGED_CONTROL_VERSION {
        return Err(CliError::usage(format!(
            "--mtu needs protocol version {TAGGED_CONTROL_VERSION} or later (got {})",
            args.version
        )));
    }
    if args.mtu == Some(0) {
        return Err(CliError::usage("--mtu must be greater than zero"));
    }

    let primary = TransportRecord::new(TransportKind::Usb);
    let transport = Arc::new(MemoryTransport::new([primary.clone()]));
    let max_payload = DEFAULT_MAX_PAYLOAD.max(args.size + BINARY_HEADER_SIZE);
    let config = EngineConfig {
        max_message_size: max_payload,
        ..EngineConfig::default()
    };
    let (engine, events) = ProtocolEngine::new(config, transport.clone());

    engine
        .on_transport_connected(&primary)
        .map_err(|err| protocol_error("cannot select primary transport", err))?;
    transport.take_sent();
    engine.handle_packet(rpc_ack(&args).with_transport(primary));

    let started = events
        .try_iter()
        .any(|event| matches!(event, EngineEvent::SessionStarted(_)));
    if !started {
        return Err(CliError::new(PROTOCOL, "simulated session did not start"));
    }

    let service = ServiceType::from(args.service);
    let body = vec![b'x'; args.size];
    let message = match service {
        ServiceType::Rpc => ProtocolMessage::rpc(PLAN_SESSION_ID, RpcType::Request, PLAN_FUNCTION_ID, 1, body),
        other => ProtocolMessage::new(PLAN_SESSION_ID, other, body),
    };
    engine
        .send_message(message)
        .map_err(|err| protocol_error("cannot frame message", err))?;

    let rows = decode_sent(&transport, max_payload)?;
    info!(
        version = %engine.protocol_version(),
        mtu = engine.mtu(service),
        frames = rows.len(),
        "message planned"
    );
    print_packets(&rows, format);
    Ok(SUCCESS)
}

/// The StartServiceACK a module at `args.version` would send.
fn rpc_ack(args: &PlanArgs) -> Packet {
    let ack = Packet::control(args.version, ServiceType::Rpc, ControlFrameType::StartServiceAck)
        .with_session_id(PLAN_SESSION_ID);
    if args.version < TAGGED_CONTROL_VERSION {
        return ack.with_message_id(PLAN_HASH_ID);
    }
    let mut tags = Tags::new()
        .with(keys::PROTOCOL_VERSION, ProtocolVersion::MAX.to_string())
        .with(keys::HASH_ID, PLAN_HASH_ID);
    if let Some(mtu) = args.mtu {
        tags.insert(keys::MTU, mtu as u64);
    }
    ack.with_tags(tags)
}

/// Decode everything the engine handed to the in-memory transport.
fn decode_sent(transport: &MemoryTransport, max_payload: usize) -> CliResult<Vec<PacketRow>> {
    let wire: Vec<u8> = transport
        .take_sent()
        .iter()
        .flat_map(|buffer| buffer.bytes.iter().copied())
        .collect();
    let config = PacketConfig {
        max_payload_size: max_payload,
        ..PacketConfig::default()
    };
    let mut reader = PacketReader::with_config(Cursor::new(wire), config);
    let mut rows = Vec::new();
    loop {
        match reader.read_packet() {
            Ok(packet) => {
                let wire_size = header_len(packet.version()) + packet.data_size();
                rows.push(PacketRow::new(rows.len(), &packet, wire_size));
            }
            Err(FrameError::ConnectionClosed) => return Ok(rows),
            Err(err) => return Err(frame_error("cannot decode planned frames", err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::ServiceArg;

    fn args(version: u8, mtu: Option<usize>) -> PlanArgs {
        PlanArgs {
            size: 10,
            version,
            mtu,
            service: ServiceArg::Rpc,
        }
    }

    #[test]
    fn legacy_ack_carries_hash_in_header() {
        let ack = rpc_ack(&args(3, None));
        assert_eq!(ack.version(), 3);
        assert_eq!(ack.message_id(), PLAN_HASH_ID);
        assert!(ack.tags().is_none());
    }

    #[test]
    fn tagged_ack_announces_mtu() {
        let ack = rpc_ack(&args(5, Some(1024)));
        let tags = ack.tags().expect("v5 ack should carry tags");
        assert_eq!(tags.get_u64(keys::MTU), Some(1024));
        assert_eq!(tags.get_u32(keys::HASH_ID), Some(PLAN_HASH_ID));
    }

    #[test]
    fn mtu_below_v5_is_a_usage_error() {
        let err = run(args(4, Some(1024)), OutputFormat::Json).expect_err("mtu on v4 should fail");
        assert_eq!(err.code, crate::exit::USAGE);
    }
}
