use cvbridge_frame::{FrameWriter, OutputTargets};

use crate::cmd::{drain_for, open_link, parse_duration, SendArgs, DRAIN_POLL};
use crate::exit::{frame_error, transport_error, CliResult, SUCCESS};
use crate::output::{print_command, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let linger = parse_duration(&args.linger)?;
    let targets = targets_from_args(&args);
    let stream = open_link(&args.link)?;

    let mut writer = FrameWriter::new(stream);
    writer
        .send_command(&targets)
        .map_err(|err| frame_error("send failed", err))?;
    tracing::debug!(flags = targets.flags, channels = ?targets.channels, "command sent");

    let mut stream = writer.into_inner();
    stream
        .set_read_timeout(Some(DRAIN_POLL))
        .map_err(|err| transport_error("configure failed", err))?;
    drain_for(&mut stream, linger);

    print_command(&targets, format);
    Ok(SUCCESS)
}

fn targets_from_args(args: &SendArgs) -> OutputTargets {
    if args.zero {
        return OutputTargets::ZERO;
    }
    OutputTargets::new(0, [args.ch1, args.ch2, args.ch3, args.ch4])
        .with_pulse(0, args.pulse1)
        .with_pulse(1, args.pulse2)
}
