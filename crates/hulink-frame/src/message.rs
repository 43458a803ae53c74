//! Complete application messages, before fragmentation and after assembly.

use bytes::Bytes;

use crate::binary_header::{BinaryFrameHeader, RpcType};
use crate::error::Result;
use crate::packet::ServiceType;

/// One logical message exchanged with the module.
///
/// For streaming services and v1 connections the whole payload sits in
/// `params` and the RPC fields are left at their defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolMessage {
    pub session_id: u8,
    pub service: ServiceType,
    pub version: u8,
    pub message_id: u32,
    pub rpc_type: RpcType,
    pub function_id: u32,
    pub correlation_id: u32,
    pub params: Bytes,
    pub bulk: Option<Bytes>,
    pub encrypted: bool,
}

impl ProtocolMessage {
    /// A message with no RPC envelope fields set yet.
    pub fn new(session_id: u8, service: ServiceType, params: impl Into<Bytes>) -> Self {
        Self {
            session_id,
            service,
            version: 1,
            message_id: 0,
            rpc_type: RpcType::Request,
            function_id: 0,
            correlation_id: 0,
            params: params.into(),
            bulk: None,
            encrypted: false,
        }
    }

    /// A request/response/notification carrying JSON parameters.
    pub fn rpc(
        session_id: u8,
        rpc_type: RpcType,
        function_id: u32,
        correlation_id: u32,
        params: impl Into<Bytes>,
    ) -> Self {
        Self {
            rpc_type,
            function_id,
            correlation_id,
            ..Self::new(session_id, ServiceType::Rpc, params)
        }
    }

    pub fn with_bulk(mut self, bulk: impl Into<Bytes>) -> Self {
        self.bulk = Some(bulk.into());
        self
    }

    pub fn with_encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    /// Whether payloads of this message carry a binary frame header at `version`.
    pub fn uses_binary_header(service: ServiceType, version: u8) -> bool {
        version > 1 && !service.is_streaming()
    }

    /// Serialize to the payload bytes that get fragmented onto the wire.
    pub fn to_payload(&self, version: u8) -> Result<Bytes> {
        if Self::uses_binary_header(self.service, version) {
            return BinaryFrameHeader::assemble(
                self.rpc_type,
                self.function_id,
                self.correlation_id,
                &self.params,
                self.bulk.as_deref(),
            );
        }
        match &self.bulk {
            Some(bulk) => {
                let mut out = Vec::with_capacity(self.params.len() + bulk.len());
                out.extend_from_slice(&self.params);
                out.extend_from_slice(bulk);
                Ok(Bytes::from(out))
            }
            None => Ok(self.params.clone()),
        }
    }

    /// Rebuild a message from a fully assembled payload.
    pub fn from_payload(
        session_id: u8,
        service: ServiceType,
        version: u8,
        message_id: u32,
        encrypted: bool,
        payload: Bytes,
    ) -> Result<Self> {
        let mut message = Self::new(session_id, service, Bytes::new());
        message.version = version;
        message.message_id = message_id;
        message.encrypted = encrypted;

        if Self::uses_binary_header(service, version) {
            let (header, params, bulk) = BinaryFrameHeader::split(&payload)?;
            message.rpc_type = header.rpc_type;
            message.function_id = header.function_id;
            message.correlation_id = header.correlation_id;
            message.params = params;
            message.bulk = bulk;
        } else {
            message.params = payload;
        }
        Ok(message)
    }
}
