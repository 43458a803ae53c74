mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "hulink", version, about = "Head-unit protocol inspection CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "warn", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::ServiceArg;

    #[test]
    fn parses_plan_subcommand() {
        let cli = Cli::try_parse_from([
            "hulink",
            "plan",
            "--size",
            "4096",
            "--version",
            "5",
            "--mtu",
            "1024",
            "--service",
            "bulk-data",
        ])
        .expect("plan args should parse");

        match cli.command {
            Command::Plan(args) => {
                assert_eq!(args.size, 4096);
                assert_eq!(args.version, 5);
                assert_eq!(args.mtu, Some(1024));
                assert!(matches!(args.service, ServiceArg::BulkData));
            }
            other => panic!("expected plan, got {other:?}"),
        }
    }

    #[test]
    fn rejects_plan_version_out_of_range() {
        let err = Cli::try_parse_from(["hulink", "plan", "--size", "10", "--version", "9"])
            .expect_err("version 9 should be rejected");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn parses_decode_subcommand() {
        let cli = Cli::try_parse_from(["hulink", "decode", "/tmp/capture.bin", "--max-payload", "2048"])
            .expect("decode args should parse");
        match cli.command {
            Command::Decode(args) => assert_eq!(args.max_payload, 2048),
            other => panic!("expected decode, got {other:?}"),
        }
    }

    #[test]
    fn parses_versions_subcommand() {
        let cli = Cli::try_parse_from(["hulink", "versions", "--format", "json"])
            .expect("versions args should parse");
        assert!(matches!(cli.command, Command::Versions(_)));
        assert!(matches!(cli.format, Some(OutputFormat::Json)));
    }
}
