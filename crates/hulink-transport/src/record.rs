use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TransportError};

/// Physical transport families the stack can multiplex services over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Bluetooth RFCOMM/SPP or iAP over Bluetooth.
    Bluetooth,
    /// Android Open Accessory or iAP over USB.
    Usb,
    /// TCP over WiFi.
    Tcp,
}

impl TransportKind {
    /// Parse a transport name as announced by the module in a
    /// `secondaryTransports` tag.
    pub fn from_wire_name(name: &str) -> Result<Self> {
        match name {
            "TCP_WIFI" => Ok(Self::Tcp),
            "AOA_USB" | "IAP_USB" | "IAP_USB_HOST_MODE" | "IAP_USB_DEVICE_MODE" => Ok(Self::Usb),
            "IAP_BLUETOOTH" | "SPP_BLUETOOTH" => Ok(Self::Bluetooth),
            other => Err(TransportError::UnknownTransport(other.to_string())),
        }
    }

    /// Canonical wire name for this kind.
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Bluetooth => "SPP_BLUETOOTH",
            Self::Usb => "AOA_USB",
            Self::Tcp => "TCP_WIFI",
        }
    }

    /// Whether this transport can carry streaming audio/video.
    pub fn is_high_bandwidth(self) -> bool {
        !matches!(self, Self::Bluetooth)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bluetooth => "bluetooth",
            Self::Usb => "usb",
            Self::Tcp => "tcp",
        };
        f.write_str(name)
    }
}

/// Identifies one connected physical transport.
///
/// Two records are equal when both kind and address match, so a second USB
/// accessory is a different record from the first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransportRecord {
    pub kind: TransportKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl TransportRecord {
    pub fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            address: None,
        }
    }

    pub fn with_address(kind: TransportKind, address: impl Into<String>) -> Self {
        Self {
            kind,
            address: Some(address.into()),
        }
    }
}

impl fmt::Display for TransportRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.address {
            Some(address) => write!(f, "{}({})", self.kind, address),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// Connection parameters for opening a secondary transport, as received in a
/// TransportEventUpdate control frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl TransportParams {
    /// True when enough information is present to dial a TCP secondary.
    pub fn is_dialable(&self) -> bool {
        matches!(&self.ip_address, Some(ip) if !ip.is_empty()) && self.port.is_some()
    }
}
