use hulink_frame::{ProtocolVersion, MAX_MAJOR_VERSION};
use hulink_session::control::TAGGED_CONTROL_VERSION;

use crate::cmd::VersionsArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_versions, OutputFormat, VersionRow, VERSION_SCHEMA_ID};

pub fn run(_args: VersionsArgs, format: OutputFormat) -> CliResult<i32> {
    print_versions(&version_rows(), format);
    Ok(SUCCESS)
}

fn version_rows() -> Vec<VersionRow> {
    (1..=MAX_MAJOR_VERSION)
        .map(|major| {
            let version = ProtocolVersion::new(major, 0, 0);
            VersionRow {
                schema_id: VERSION_SCHEMA_ID,
                major,
                header_len: version.header_len(),
                default_mtu: version.default_mtu(),
                binary_header: version.has_binary_header(),
                tagged_control: major >= TAGGED_CONTROL_VERSION,
            }
        })
        .collect()
}
