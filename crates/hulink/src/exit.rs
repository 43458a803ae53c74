use std::fmt;
use std::io;

use hulink_frame::FrameError;
use hulink_session::ProtocolError;
use hulink_transport::TransportError;

// sysexits(3) codes.
pub const SUCCESS: i32 = 0;
pub const USAGE: i32 = 64;
/// Capture bytes that do not decode as hulink frames.
pub const DATA_INVALID: i32 = 65;
pub const NO_INPUT: i32 = 66;
pub const INTERNAL: i32 = 70;
pub const IO: i32 = 74;
/// The simulated module and the engine disagreed during `plan`.
pub const PROTOCOL: i32 = 76;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(USAGE, message)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => NO_INPUT,
        _ => IO,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::AllocationFailed(_) => CliError::new(INTERNAL, format!("{context}: {err}")),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn protocol_error(context: &str, err: ProtocolError) -> CliError {
    match err {
        ProtocolError::Frame(err) => frame_error(context, err),
        ProtocolError::Transport(TransportError::Io(source)) => io_error(context, source),
        // Caller-supplied session or service that the dry run never opened.
        ProtocolError::ServiceUnavailable { .. } | ProtocolError::NoMessageLock(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        other => CliError::new(PROTOCOL, format!("{context}: {other}")),
    }
}
