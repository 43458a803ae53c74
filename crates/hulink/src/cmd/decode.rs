use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use hulink_frame::{header_len, FrameError, FrameAssembler, FrameType, PacketConfig, PacketReader};
use tracing::{debug, warn};

use crate::cmd::DecodeArgs;
use crate::exit::{frame_error, io_error, CliResult, SUCCESS};
use crate::output::{print_packets, print_raw, OutputFormat, PacketRow};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let input = open_input(&args.input)?;
    let config = PacketConfig {
        max_payload_size: args.max_payload,
        ..PacketConfig::default()
    };
    let reader = PacketReader::with_config(input, config);
    let assembler = FrameAssembler::new(args.max_payload);

    let mut rows = Vec::new();
    for packet in reader {
        let packet = match packet {
            Ok(packet) => packet,
            Err(FrameError::ConnectionClosed) => {
                warn!(packets = rows.len(), "capture ends mid-packet");
                break;
            }
            Err(err) => return Err(frame_error("decode failed", err)),
        };
        let index = rows.len();
        rows.push(PacketRow::new(
            index,
            &packet,
            header_len(packet.version()) + packet.data_size(),
        ));

        if packet.frame_type() == FrameType::Control {
            continue;
        }
        match assembler.handle(&packet) {
            Ok(Some(message)) => {
                debug!(
                    session_id = message.session_id,
                    service = %message.service,
                    size = message.params.len(),
                    "message reassembled"
                );
                if matches!(format, OutputFormat::Raw) {
                    print_raw(&message.params);
                    if let Some(bulk) = &message.bulk {
                        print_raw(bulk);
                    }
                }
            }
            Ok(None) => {}
            Err(err) => warn!(packet = index, error = %err, "cannot reassemble packet"),
        }
    }

    if assembler.in_flight() > 0 {
        warn!(
            in_flight = assembler.in_flight(),
            "capture ended with incomplete messages"
        );
    }
    print_packets(&rows, format);
    Ok(SUCCESS)
}

fn open_input(path: &Path) -> CliResult<Box<dyn Read>> {
    if path.as_os_str() == "-" {
        return Ok(Box::new(io::stdin().lock()));
    }
    let file = File::open(path).map_err(|err| io_error(&format!("cannot open {}", path.display()), err))?;
    Ok(Box::new(file))
}
