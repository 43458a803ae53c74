//! The binary frame header carried at the front of RPC/bulk message payloads
//! for protocol versions above 1.
//!
//! ```text
//! ┌──────────┬──────────────────┬──────────────────┬──────────────┐
//! │ rpc (4b) │ function id (28b)│ correlation (4B) │ json size(4B)│
//! └──────────┴──────────────────┴──────────────────┴──────────────┘
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Binary frame header length.
pub const BINARY_HEADER_SIZE: usize = 12;

const FUNCTION_ID_MASK: u32 = 0x0FFF_FFFF;

/// RPC call kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcType {
    Request,
    Response,
    Notification,
}

impl RpcType {
    pub fn to_wire(self) -> u8 {
        match self {
            Self::Request => 0x0,
            Self::Response => 0x1,
            Self::Notification => 0x2,
        }
    }
}

impl TryFrom<u8> for RpcType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x0 => Ok(Self::Request),
            0x1 => Ok(Self::Response),
            0x2 => Ok(Self::Notification),
            other => Err(FrameError::MalformedHeader(format!("unknown rpc type {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryFrameHeader {
    pub rpc_type: RpcType,
    pub function_id: u32,
    pub correlation_id: u32,
    pub json_size: u32,
}

impl BinaryFrameHeader {
    pub fn encode(&self) -> [u8; BINARY_HEADER_SIZE] {
        let mut out = [0u8; BINARY_HEADER_SIZE];
        let first = (u32::from(self.rpc_type.to_wire()) << 28) | (self.function_id & FUNCTION_ID_MASK);
        out[0..4].copy_from_slice(&first.to_be_bytes());
        out[4..8].copy_from_slice(&self.correlation_id.to_be_bytes());
        out[8..12].copy_from_slice(&self.json_size.to_be_bytes());
        out
    }

    /// Decode the header at the front of `payload`, checking that the declared
    /// JSON size fits in what follows it.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < BINARY_HEADER_SIZE {
            return Err(FrameError::MalformedHeader(format!(
                "binary header needs {BINARY_HEADER_SIZE} bytes, got {}",
                payload.len()
            )));
        }

        let first = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let rpc_type = RpcType::try_from((first >> 28) as u8)?;
        let correlation_id = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
        let json_size = u32::from_be_bytes([payload[8], payload[9], payload[10], payload[11]]);

        let available = payload.len() - BINARY_HEADER_SIZE;
        if json_size as usize > available {
            return Err(FrameError::MalformedHeader(format!(
                "json size {json_size} exceeds available {available} bytes"
            )));
        }

        Ok(Self {
            rpc_type,
            function_id: first & FUNCTION_ID_MASK,
            correlation_id,
            json_size,
        })
    }

    /// Split a message payload into its header, parameter bytes and bulk bytes.
    ///
    /// Bulk is `None` when nothing follows the parameter data.
    pub fn split(payload: &Bytes) -> Result<(Self, Bytes, Option<Bytes>)> {
        let header = Self::decode(payload)?;
        let json_end = BINARY_HEADER_SIZE + header.json_size as usize;
        let json = payload.slice(BINARY_HEADER_SIZE..json_end);
        let bulk = if json_end < payload.len() {
            Some(payload.slice(json_end..))
        } else {
            None
        };
        Ok((header, json, bulk))
    }

    /// Prefix `json` and `bulk` with a header describing them.
    pub fn assemble(
        rpc_type: RpcType,
        function_id: u32,
        correlation_id: u32,
        json: &[u8],
        bulk: Option<&[u8]>,
    ) -> Result<Bytes> {
        let json_size = u32::try_from(json.len()).map_err(|_| FrameError::PayloadTooLarge {
            size: json.len(),
            max: u32::MAX as usize,
        })?;
        let header = Self {
            rpc_type,
            function_id,
            correlation_id,
            json_size,
        };
        let bulk = bulk.unwrap_or_default();
        let mut buf = BytesMut::with_capacity(BINARY_HEADER_SIZE + json.len() + bulk.len());
        buf.put_slice(&header.encode());
        buf.put_slice(json);
        buf.put_slice(bulk);
        Ok(buf.freeze())
    }
}
