/// Errors that can occur while encoding, decoding or assembling packets.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The header carries a protocol version this codec cannot frame.
    #[error("unknown protocol version {0}")]
    UnknownVersion(u8),

    /// The header carries a frame type outside Control/Single/First/Consecutive.
    #[error("unknown frame type 0x{0:02x}")]
    UnknownFrameType(u8),

    /// The header carries an unassigned service type.
    #[error("unknown service type 0x{0:02x}")]
    UnknownServiceType(u8),

    /// A control frame carries an unassigned control sub-type.
    #[error("unknown control frame type 0x{0:02x}")]
    UnknownControlFrame(u8),

    /// A binary frame header, first-frame header or tag block is malformed.
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A first frame declared a total message size beyond the configured limit.
    #[error("declared message size {size} exceeds limit {max}")]
    MessageTooLarge { size: usize, max: usize },

    /// The reassembly buffer for a declared message size could not be allocated.
    #[error("cannot allocate {0} bytes for message reassembly")]
    AllocationFailed(usize),

    /// An I/O error occurred while reading or writing packets.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete packet was received.
    #[error("connection closed (incomplete packet)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
