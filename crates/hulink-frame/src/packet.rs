//! The in-memory form of one wire frame.

use std::fmt;

use bytes::Bytes;
use hulink_transport::TransportRecord;

use crate::error::{FrameError, Result};
use crate::tags::Tags;

/// Sequence number carried by the last consecutive frame of a message.
pub const FINAL_FRAME_SEQUENCE: u8 = 0x00;

/// How a frame participates in a logical message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Control,
    Single,
    First,
    Consecutive,
}

impl FrameType {
    pub fn to_wire(self) -> u8 {
        match self {
            Self::Control => 0x00,
            Self::Single => 0x01,
            Self::First => 0x02,
            Self::Consecutive => 0x03,
        }
    }
}

impl TryFrom<u8> for FrameType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(Self::Control),
            0x01 => Ok(Self::Single),
            0x02 => Ok(Self::First),
            0x03 => Ok(Self::Consecutive),
            other => Err(FrameError::UnknownFrameType(other)),
        }
    }
}

/// Logical services multiplexed over a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ServiceType {
    Control,
    Rpc,
    Pcm,
    Nav,
    BulkData,
}

impl ServiceType {
    pub const ALL: [ServiceType; 5] = [
        Self::Control,
        Self::Rpc,
        Self::Pcm,
        Self::Nav,
        Self::BulkData,
    ];

    pub fn to_wire(self) -> u8 {
        match self {
            Self::Control => 0x00,
            Self::Rpc => 0x07,
            Self::Pcm => 0x0A,
            Self::Nav => 0x0B,
            Self::BulkData => 0x0F,
        }
    }

    /// Audio and video streams. Their payloads never carry a binary frame
    /// header and they may live on a secondary transport.
    pub fn is_streaming(self) -> bool {
        matches!(self, Self::Pcm | Self::Nav)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Control => "CONTROL",
            Self::Rpc => "RPC",
            Self::Pcm => "PCM",
            Self::Nav => "NAV",
            Self::BulkData => "BULK_DATA",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for ServiceType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(Self::Control),
            0x07 => Ok(Self::Rpc),
            0x0A => Ok(Self::Pcm),
            0x0B => Ok(Self::Nav),
            0x0F => Ok(Self::BulkData),
            other => Err(FrameError::UnknownServiceType(other)),
        }
    }
}

/// Control frame sub-types, carried in the frame-info byte of control frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlFrameType {
    Heartbeat,
    StartService,
    StartServiceAck,
    StartServiceNak,
    EndService,
    EndServiceAck,
    EndServiceNak,
    RegisterSecondaryTransport,
    RegisterSecondaryTransportAck,
    RegisterSecondaryTransportNak,
    TransportEventUpdate,
    ServiceDataAck,
    HeartbeatAck,
}

impl ControlFrameType {
    pub fn to_wire(self) -> u8 {
        match self {
            Self::Heartbeat => 0x00,
            Self::StartService => 0x01,
            Self::StartServiceAck => 0x02,
            Self::StartServiceNak => 0x03,
            Self::EndService => 0x04,
            Self::EndServiceAck => 0x05,
            Self::EndServiceNak => 0x06,
            Self::RegisterSecondaryTransport => 0x07,
            Self::RegisterSecondaryTransportAck => 0x08,
            Self::RegisterSecondaryTransportNak => 0x09,
            Self::TransportEventUpdate => 0xFD,
            Self::ServiceDataAck => 0xFE,
            Self::HeartbeatAck => 0xFF,
        }
    }
}

impl TryFrom<u8> for ControlFrameType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(Self::Heartbeat),
            0x01 => Ok(Self::StartService),
            0x02 => Ok(Self::StartServiceAck),
            0x03 => Ok(Self::StartServiceNak),
            0x04 => Ok(Self::EndService),
            0x05 => Ok(Self::EndServiceAck),
            0x06 => Ok(Self::EndServiceNak),
            0x07 => Ok(Self::RegisterSecondaryTransport),
            0x08 => Ok(Self::RegisterSecondaryTransportAck),
            0x09 => Ok(Self::RegisterSecondaryTransportNak),
            0xFD => Ok(Self::TransportEventUpdate),
            0xFE => Ok(Self::ServiceDataAck),
            0xFF => Ok(Self::HeartbeatAck),
            other => Err(FrameError::UnknownControlFrame(other)),
        }
    }
}

/// One wire frame.
///
/// Packets are values: the `with_*` methods consume and return a new packet,
/// and the only in-place mutation is attaching the transport it travels on.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    version: u8,
    encrypted: bool,
    frame_type: FrameType,
    service_type: ServiceType,
    frame_info: u8,
    session_id: u8,
    message_id: u32,
    payload: Bytes,
    tags: Option<Tags>,
    transport: Option<TransportRecord>,
}

impl Packet {
    /// Create a packet with an empty payload.
    pub fn new(version: u8, frame_type: FrameType, service_type: ServiceType, frame_info: u8) -> Self {
        Self {
            version,
            encrypted: false,
            frame_type,
            service_type,
            frame_info,
            session_id: 0,
            message_id: 0,
            payload: Bytes::new(),
            tags: None,
            transport: None,
        }
    }

    /// Create a control packet of the given sub-type.
    pub fn control(version: u8, service_type: ServiceType, control: ControlFrameType) -> Self {
        Self::new(version, FrameType::Control, service_type, control.to_wire())
    }

    pub fn with_session_id(mut self, session_id: u8) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn with_message_id(mut self, message_id: u32) -> Self {
        self.message_id = message_id;
        self
    }

    pub fn with_encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    /// Replace the payload with opaque bytes, dropping any tag dictionary.
    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self.tags = None;
        self
    }

    /// Attach a tag dictionary; the payload becomes its wire encoding.
    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.payload = tags.encode();
        self.tags = Some(tags);
        self
    }

    /// Attach a payload that was already decoded into tags.
    pub(crate) fn with_decoded_tags(mut self, payload: Bytes, tags: Option<Tags>) -> Self {
        self.payload = payload;
        self.tags = tags;
        self
    }

    pub fn with_transport(mut self, record: TransportRecord) -> Self {
        self.transport = Some(record);
        self
    }

    /// Route this packet through a specific transport.
    pub fn set_transport(&mut self, record: TransportRecord) {
        self.transport = Some(record);
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    pub fn frame_type(&self) -> FrameType {
        self.frame_type
    }

    pub fn service_type(&self) -> ServiceType {
        self.service_type
    }

    pub fn frame_info(&self) -> u8 {
        self.frame_info
    }

    pub fn session_id(&self) -> u8 {
        self.session_id
    }

    pub fn message_id(&self) -> u32 {
        self.message_id
    }

    pub fn data_size(&self) -> usize {
        self.payload.len()
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn tags(&self) -> Option<&Tags> {
        self.tags.as_ref()
    }

    pub fn transport(&self) -> Option<&TransportRecord> {
        self.transport.as_ref()
    }

    /// Control sub-type, or an error for non-control frames and unknown codes.
    pub fn control_frame_type(&self) -> Result<ControlFrameType> {
        if self.frame_type != FrameType::Control {
            return Err(FrameError::MalformedHeader(format!(
                "{:?} frame has no control sub-type",
                self.frame_type
            )));
        }
        ControlFrameType::try_from(self.frame_info)
    }

    /// True for the consecutive frame that completes a multi-frame message.
    pub fn is_final_frame(&self) -> bool {
        self.frame_type == FrameType::Consecutive && self.frame_info == FINAL_FRAME_SEQUENCE
    }
}
