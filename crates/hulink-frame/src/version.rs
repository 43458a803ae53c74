//! Protocol revisions and the framing parameters each one implies.

use std::fmt;
use std::str::FromStr;

use crate::error::FrameError;

/// Header length for protocol major version 1.
pub const V1_HEADER_SIZE: usize = 8;

/// Header length for protocol major versions 2 and above.
pub const V2_HEADER_SIZE: usize = 12;

/// Base MTU for v1/v2; the header length is subtracted from it.
pub const V1_V2_BASE_MTU: usize = 1500;

/// Default payload MTU for v3 and above.
pub const V3_MTU: usize = 131_072;

/// Highest major version this stack implements.
pub const MAX_MAJOR_VERSION: u8 = 5;

/// A negotiated `major.minor.patch` protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl ProtocolVersion {
    /// Version every connection starts at before negotiation.
    pub const V1: Self = Self::new(1, 0, 0);

    /// First version carrying secondary transport negotiation.
    pub const V5_1: Self = Self::new(5, 1, 0);

    /// Highest version this stack advertises.
    pub const MAX: Self = Self::new(5, 2, 0);

    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Build a version from an acknowledged major byte alone.
    ///
    /// Without a tag nothing is known about the minor version, so the result
    /// is `major.0.0` clamped to `[V1, max]`.
    pub fn from_major(major: u8, max: ProtocolVersion) -> Self {
        Self::new(major.max(1), 0, 0).clamp_to(max)
    }

    /// Clamp a fully specified acknowledged version to `[V1, max]`.
    pub fn clamp_to(self, max: ProtocolVersion) -> Self {
        if self > max {
            max
        } else if self.major == 0 {
            Self::V1
        } else {
            self
        }
    }

    /// Header length used by packets of this version.
    pub fn header_len(self) -> usize {
        header_len(self.major)
    }

    /// Default RPC MTU for this version.
    pub fn default_mtu(self) -> usize {
        default_mtu(self.major)
    }

    /// True when packets of this version carry a binary frame header.
    pub fn has_binary_header(self) -> bool {
        self.major > 1
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::V1
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ProtocolVersion {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let mut next = |label: &str, required: bool| -> Result<u8, FrameError> {
            match parts.next() {
                Some(part) => part.trim().parse::<u8>().map_err(|_| {
                    FrameError::MalformedHeader(format!("invalid version '{s}': non-numeric {label}"))
                }),
                None if required => Err(FrameError::MalformedHeader(format!(
                    "invalid version '{s}': missing {label}"
                ))),
                None => Ok(0),
            }
        };

        let major = next("major", true)?;
        let minor = next("minor", false)?;
        let patch = next("patch", false)?;
        if parts.next().is_some() {
            return Err(FrameError::MalformedHeader(format!(
                "invalid version '{s}': expected '<major>.<minor>.<patch>'"
            )));
        }
        Ok(Self::new(major, minor, patch))
    }
}

/// Header length for a major version byte: 8 for v1, 12 otherwise.
pub fn header_len(major: u8) -> usize {
    if major <= 1 {
        V1_HEADER_SIZE
    } else {
        V2_HEADER_SIZE
    }
}

/// Default RPC MTU for a major version byte.
pub fn default_mtu(major: u8) -> usize {
    if major <= 2 {
        V1_V2_BASE_MTU - header_len(major)
    } else {
        V3_MTU
    }
}
