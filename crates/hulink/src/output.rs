use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use hulink_frame::{FrameType, Packet};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

pub const PACKET_SCHEMA_ID: &str = "https://schemas.hulink.dev/cli/v1/packet.schema.json";
pub const VERSION_SCHEMA_ID: &str = "https://schemas.hulink.dev/cli/v1/protocol-version.schema.json";

/// One decoded wire packet, flattened for display.
#[derive(Debug, Serialize)]
pub struct PacketRow {
    pub schema_id: &'static str,
    pub index: usize,
    pub version: u8,
    pub encrypted: bool,
    pub frame_type: &'static str,
    pub service: &'static str,
    pub session_id: u8,
    pub message_id: u32,
    pub frame_info: u8,
    pub data_size: usize,
    pub wire_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<serde_json::Value>,
    pub payload: String,
}

impl PacketRow {
    pub fn new(index: usize, packet: &Packet, wire_size: usize) -> Self {
        let control = match packet.frame_type() {
            FrameType::Control => Some(match packet.control_frame_type() {
                Ok(kind) => format!("{kind:?}"),
                Err(err) => err.to_string(),
            }),
            _ => None,
        };
        let tags = packet.tags().map(|tags| {
            serde_json::Value::Object(
                tags.iter()
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect(),
            )
        });
        Self {
            schema_id: PACKET_SCHEMA_ID,
            index,
            version: packet.version(),
            encrypted: packet.is_encrypted(),
            frame_type: frame_type_name(packet.frame_type()),
            service: packet.service_type().name(),
            session_id: packet.session_id(),
            message_id: packet.message_id(),
            frame_info: packet.frame_info(),
            data_size: packet.data_size(),
            wire_size,
            control,
            tags,
            payload: payload_preview(packet.payload()),
        }
    }
}

/// Properties of one protocol major version.
#[derive(Debug, Serialize)]
pub struct VersionRow {
    pub schema_id: &'static str,
    pub major: u8,
    pub header_len: usize,
    pub default_mtu: usize,
    pub binary_header: bool,
    pub tagged_control: bool,
}

pub fn print_packets(rows: &[PacketRow], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            for row in rows {
                print_json_line(row);
            }
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    "#", "VER", "TYPE", "SERVICE", "SESSION", "MSG ID", "INFO", "SIZE", "CONTROL", "PAYLOAD",
                ]);
            for row in rows {
                table.add_row(vec![
                    row.index.to_string(),
                    format!("{}{}", row.version, if row.encrypted { "*" } else { "" }),
                    row.frame_type.to_string(),
                    row.service.to_string(),
                    row.session_id.to_string(),
                    row.message_id.to_string(),
                    format!("0x{:02x}", row.frame_info),
                    row.data_size.to_string(),
                    row.control.clone().unwrap_or_default(),
                    row.payload.clone(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for row in rows {
                println!(
                    "#{} v{} {} {} session={} message={} info=0x{:02x} size={}{} payload={}",
                    row.index,
                    row.version,
                    row.frame_type,
                    row.service,
                    row.session_id,
                    row.message_id,
                    row.frame_info,
                    row.data_size,
                    row.control
                        .as_ref()
                        .map(|control| format!(" control={control}"))
                        .unwrap_or_default(),
                    row.payload
                );
            }
        }
        OutputFormat::Raw => {}
    }
}

pub fn print_versions(rows: &[VersionRow], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            for row in rows {
                print_json_line(row);
            }
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["MAJOR", "HEADER", "DEFAULT MTU", "BINARY HEADER", "TAGGED CONTROL"]);
            for row in rows {
                table.add_row(vec![
                    row.major.to_string(),
                    row.header_len.to_string(),
                    row.default_mtu.to_string(),
                    yes_no(row.binary_header).to_string(),
                    yes_no(row.tagged_control).to_string(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            for row in rows {
                println!(
                    "v{} header={} mtu={} binary_header={} tagged_control={}",
                    row.major, row.header_len, row.default_mtu, row.binary_header, row.tagged_control
                );
            }
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json_line<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn frame_type_name(frame_type: FrameType) -> &'static str {
    match frame_type {
        FrameType::Control => "CONTROL",
        FrameType::Single => "SINGLE",
        FrameType::First => "FIRST",
        FrameType::Consecutive => "CONSECUTIVE",
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

pub fn payload_preview(payload: &[u8]) -> String {
    const PREVIEW_LIMIT: usize = 48;
    if payload.is_empty() {
        return String::new();
    }
    match std::str::from_utf8(payload) {
        Ok(text) if text.len() <= PREVIEW_LIMIT => text.to_string(),
        Ok(text) => {
            let cut = (0..=PREVIEW_LIMIT)
                .rev()
                .find(|idx| text.is_char_boundary(*idx))
                .unwrap_or(0);
            format!("{}...", &text[..cut])
        }
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hulink_frame::{keys, ControlFrameType, ServiceType, Tags};

    #[test]
    fn packet_row_describes_control_frames() {
        let packet = Packet::control(5, ServiceType::Rpc, ControlFrameType::StartServiceAck)
            .with_session_id(3)
            .with_tags(Tags::new().with(keys::MTU, 1024u32));
        let row = PacketRow::new(0, &packet, 40);
        assert_eq!(row.frame_type, "CONTROL");
        assert_eq!(row.service, "RPC");
        assert_eq!(row.control.as_deref(), Some("StartServiceAck"));
        assert_eq!(row.tags, Some(serde_json::json!({ "mtu": 1024 })));
    }

    #[test]
    fn preview_truncates_and_flags_binary() {
        assert_eq!(payload_preview(b"hello"), "hello");
        assert_eq!(payload_preview(&[0xff, 0x00]), "<binary 2 bytes>");
        let long = "x".repeat(100);
        assert!(payload_preview(long.as_bytes()).ends_with("..."));
    }
}
