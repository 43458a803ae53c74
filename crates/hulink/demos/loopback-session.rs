//! Phone-side engine talking to a simulated head unit in the same process.
//!
//! Run with:
//!   cargo run --example loopback-session
//!
//! The "head unit" here only answers the RPC StartService and reassembles
//! whatever the engine sends, which is enough to watch version negotiation
//! and fragmentation end to end.

use std::sync::Arc;

use bytes::BytesMut;
use hulink::frame::{
    decode_packet, keys, ControlFrameType, FrameAssembler, FrameType, Packet, ProtocolMessage,
    ProtocolVersion, RpcType, ServiceType, Tags, DEFAULT_MAX_PAYLOAD,
};
use hulink::session::{EngineConfig, EngineEvent, ProtocolEngine};
use hulink::transport::{MemoryTransport, TransportKind, TransportRecord};

const MODULE_MTU: u64 = 256;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let usb = TransportRecord::new(TransportKind::Usb);
    let wire = Arc::new(MemoryTransport::new([usb.clone()]));
    let (engine, events) = ProtocolEngine::new(EngineConfig::default(), wire.clone());

    engine.on_transport_connected(&usb)?;
    let module = FrameAssembler::new(DEFAULT_MAX_PAYLOAD);

    for packet in drain(&wire)? {
        if packet.frame_type() == FrameType::Control
            && packet.control_frame_type()? == ControlFrameType::StartService
        {
            eprintln!("module: StartService for {} (v{})", packet.service_type(), packet.version());
            let ack = Packet::control(5, ServiceType::Rpc, ControlFrameType::StartServiceAck)
                .with_session_id(1)
                .with_tags(
                    Tags::new()
                        .with(keys::PROTOCOL_VERSION, ProtocolVersion::MAX.to_string())
                        .with(keys::HASH_ID, 0x5eed_u32)
                        .with(keys::MTU, MODULE_MTU),
                );
            engine.handle_packet(ack.with_transport(usb.clone()));
        }
    }

    for event in events.try_iter() {
        if let EngineEvent::SessionStarted(started) = event {
            eprintln!(
                "phone: session {} started at {} (hash id {:#x})",
                started.session_id, started.version, started.hash_id
            );
        }
    }

    let params = br#"{"appName":"loopback","appId":"demo"}"#.repeat(20);
    engine.send_message(ProtocolMessage::rpc(1, RpcType::Request, 1, 1, params))?;

    let frames = drain(&wire)?;
    eprintln!("phone: message split into {} frames", frames.len());
    for frame in &frames {
        if let Some(message) = module.handle(frame)? {
            eprintln!(
                "module: reassembled {} bytes of params (function {}, correlation {})",
                message.params.len(),
                message.function_id,
                message.correlation_id
            );
        }
    }

    Ok(())
}

fn drain(wire: &MemoryTransport) -> Result<Vec<Packet>, Box<dyn std::error::Error>> {
    let mut packets = Vec::new();
    for buffer in wire.take_sent() {
        let mut bytes = BytesMut::from(buffer.bytes.as_ref());
        while let Some(packet) = decode_packet(&mut bytes, DEFAULT_MAX_PAYLOAD)? {
            packets.push(packet);
        }
    }
    Ok(packets)
}
