//! Control-frame tag dictionaries.
//!
//! From protocol v5 on, control frames carry their parameters as a key/value
//! block appended after the fixed header. The block is a compact JSON object.

use bytes::Bytes;
use serde_json::{Map, Value};

use crate::error::{FrameError, Result};

/// Well-known tag names.
pub mod keys {
    pub const PROTOCOL_VERSION: &str = "protocolVersion";
    pub const HASH_ID: &str = "hashId";
    pub const MTU: &str = "mtu";
    pub const SECONDARY_TRANSPORTS: &str = "secondaryTransports";
    pub const AUDIO_SERVICE_TRANSPORTS: &str = "audioServiceTransports";
    pub const VIDEO_SERVICE_TRANSPORTS: &str = "videoServiceTransports";
    pub const REJECTED_PARAMS: &str = "rejectedParams";
    pub const REASON: &str = "reason";
    pub const TCP_IP_ADDRESS: &str = "tcpIpAddress";
    pub const TCP_PORT: &str = "tcpPort";
    pub const AUTH_TOKEN: &str = "authToken";
    pub const HEIGHT: &str = "height";
    pub const WIDTH: &str = "width";
    pub const VIDEO_PROTOCOL: &str = "videoProtocol";
    pub const VIDEO_CODEC: &str = "videoCodec";
}

/// An ordered string-keyed tag dictionary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tags(Map<String, Value>);

impl Tags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a tag.
    pub fn insert(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(Value::as_u64)
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get_u64(key).and_then(|v| u32::try_from(v).ok())
    }

    /// String list; non-string elements are skipped.
    pub fn get_str_list(&self, key: &str) -> Option<Vec<String>> {
        self.0.get(key).and_then(Value::as_array).map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
    }

    /// Integer list; non-integer elements are skipped.
    pub fn get_int_list(&self, key: &str) -> Option<Vec<u64>> {
        self.0
            .get(key)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_u64).collect())
    }

    /// Serialize to the wire representation.
    pub fn encode(&self) -> Bytes {
        Bytes::from(Value::Object(self.0.clone()).to_string())
    }

    /// Parse a wire tag block. Anything other than a JSON object is malformed.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(Value::Object(map)) => Ok(Self(map)),
            Ok(other) => Err(FrameError::MalformedHeader(format!(
                "control tags must be an object, got {}",
                value_kind(&other)
            ))),
            Err(err) => Err(FrameError::MalformedHeader(format!(
                "control tags are not valid: {err}"
            ))),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
