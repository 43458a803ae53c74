//! `tokio_util::codec` integration for packet streams.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_packet, encode_packet, DEFAULT_MAX_PAYLOAD};
use crate::error::FrameError;
use crate::packet::Packet;

/// Frames an async byte stream into [`Packet`]s.
#[derive(Debug, Clone)]
pub struct PacketCodec {
    max_payload_size: usize,
}

impl PacketCodec {
    pub fn new(max_payload_size: usize) -> Self {
        Self { max_payload_size }
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD)
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, FrameError> {
        decode_packet(src, self.max_payload_size)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, FrameError> {
        match self.decode(src)? {
            Some(packet) => Ok(Some(packet)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), FrameError> {
        <Self as Encoder<&Packet>>::encode(self, &item, dst)
    }
}

impl Encoder<&Packet> for PacketCodec {
    type Error = FrameError;

    fn encode(&mut self, item: &Packet, dst: &mut BytesMut) -> Result<(), FrameError> {
        if item.data_size() > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: item.data_size(),
                max: self.max_payload_size,
            });
        }
        encode_packet(item, dst)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;
    use crate::packet::{ControlFrameType, FrameType, ServiceType};

    #[tokio::test]
    async fn framed_roundtrip_over_duplex() {
        let (client, server) = tokio::io::duplex(64);
        let mut sink = FramedWrite::new(client, PacketCodec::default());
        let mut stream = FramedRead::new(server, PacketCodec::default());

        let data = Packet::new(3, FrameType::Single, ServiceType::Rpc, 0)
            .with_session_id(1)
            .with_message_id(10)
            .with_payload(vec![0x5A; 300]);
        let heartbeat = Packet::control(3, ServiceType::Control, ControlFrameType::Heartbeat);

        sink.send(data.clone()).await.unwrap();
        sink.send(heartbeat.clone()).await.unwrap();
        drop(sink);

        assert_eq!(stream.next().await.unwrap().unwrap(), data);
        assert_eq!(stream.next().await.unwrap().unwrap(), heartbeat);
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn truncated_stream_at_eof_is_an_error() {
        let mut codec = PacketCodec::default();
        let mut buf = BytesMut::from(&[0x21, 0x07, 0x00][..]);
        assert!(matches!(
            codec.decode_eof(&mut buf),
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[test]
    fn encoder_enforces_limit() {
        let mut codec = PacketCodec::new(4);
        let packet = Packet::new(2, FrameType::Single, ServiceType::Rpc, 0).with_payload(vec![0u8; 8]);
        let mut dst = BytesMut::new();
        assert!(matches!(
            <PacketCodec as Encoder<&Packet>>::encode(&mut codec, &packet, &mut dst),
            Err(FrameError::PayloadTooLarge { .. })
        ));
    }
}
