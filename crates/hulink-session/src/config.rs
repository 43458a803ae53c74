use hulink_frame::{ProtocolVersion, DEFAULT_MAX_PAYLOAD};
use hulink_transport::TransportKind;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Engine behavior configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Transports acceptable as primary, most preferred first.
    pub primary_transports: Vec<TransportKind>,
    /// Transports acceptable as secondary, most preferred first.
    pub secondary_transports: Vec<TransportKind>,
    /// Refuse to run Nav/Pcm on a transport that cannot carry them.
    pub require_high_bandwidth: bool,
    /// Highest protocol version offered to the module.
    #[serde(with = "version_string")]
    pub max_protocol_version: ProtocolVersion,
    /// Largest reassembled message accepted from the module.
    pub max_message_size: usize,
    /// Whether falling back to a v1 Bluetooth-only connection is allowed.
    pub legacy_mode_allowed: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            primary_transports: vec![TransportKind::Usb, TransportKind::Bluetooth],
            secondary_transports: vec![TransportKind::Tcp, TransportKind::Usb],
            require_high_bandwidth: false,
            max_protocol_version: ProtocolVersion::MAX,
            max_message_size: DEFAULT_MAX_PAYLOAD,
            legacy_mode_allowed: true,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration document. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn with_primary_transports(mut self, kinds: &[TransportKind]) -> Self {
        self.primary_transports = kinds.to_vec();
        self
    }

    pub fn with_secondary_transports(mut self, kinds: &[TransportKind]) -> Self {
        self.secondary_transports = kinds.to_vec();
        self
    }

    pub fn with_high_bandwidth_required(mut self, required: bool) -> Self {
        self.require_high_bandwidth = required;
        self
    }

    pub fn with_max_protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.max_protocol_version = version;
        self
    }
}

mod version_string {
    use hulink_frame::ProtocolVersion;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(version: &ProtocolVersion, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(version)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ProtocolVersion, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(de::Error::custom)
    }
}
