use cvbridge_device::{REPORT_INTERVAL, REPORT_RATE_HZ, SAMPLE_RATE_HZ};
use cvbridge_frame::{COMMAND_FRAME_LEN, COMMAND_SYNC, TELEMETRY_FRAME_LEN, TELEMETRY_SYNC};

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("cvbridge {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: cvbridge");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "build_target: {}",
        option_env!("CVBRIDGE_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "wire: command {COMMAND_FRAME_LEN} bytes sync 0x{COMMAND_SYNC:02X}, telemetry {TELEMETRY_FRAME_LEN} bytes sync 0x{TELEMETRY_SYNC:02X}"
    );
    println!(
        "timing: sample_rate_hz={SAMPLE_RATE_HZ} report_interval={REPORT_INTERVAL} report_rate_hz={REPORT_RATE_HZ}"
    );
    println!("features: device={}, cli=true", cfg!(feature = "device"));

    Ok(SUCCESS)
}
