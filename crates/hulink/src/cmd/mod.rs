use clap::{Args, Subcommand, ValueEnum};
use std::path::PathBuf;

use hulink_frame::{ServiceType, DEFAULT_MAX_PAYLOAD, MAX_MAJOR_VERSION};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod decode;
pub mod plan;
pub mod version;
pub mod versions;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Decode a captured byte stream into packets.
    Decode(DecodeArgs),
    /// Show how a message would be framed at a given version and MTU.
    Plan(PlanArgs),
    /// List header sizes and defaults for each protocol version.
    Versions(VersionsArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Decode(args) => decode::run(args, format),
        Command::Plan(args) => plan::run(args, format),
        Command::Versions(args) => versions::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Services a message can be planned for without starting a stream.
#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum ServiceArg {
    Rpc,
    BulkData,
}

impl From<ServiceArg> for ServiceType {
    fn from(arg: ServiceArg) -> Self {
        match arg {
            ServiceArg::Rpc => ServiceType::Rpc,
            ServiceArg::BulkData => ServiceType::BulkData,
        }
    }
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Capture file to read, or `-` for stdin.
    pub input: PathBuf,
    /// Reject packets whose payload exceeds this many bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_PAYLOAD)]
    pub max_payload: usize,
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Message size in bytes.
    #[arg(long)]
    pub size: usize,
    /// Negotiated protocol major version.
    #[arg(long, default_value_t = MAX_MAJOR_VERSION, value_parser = clap::value_parser!(u8).range(1..=MAX_MAJOR_VERSION as i64))]
    pub version: u8,
    /// MTU announced by the module (protocol 5 and later).
    #[arg(long)]
    pub mtu: Option<usize>,
    /// Service carrying the message.
    #[arg(long, value_enum, default_value = "rpc")]
    pub service: ServiceArg,
}

#[derive(Args, Debug, Default)]
pub struct VersionsArgs {}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
