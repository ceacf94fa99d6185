use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cvbridge_frame::{FrameError, FrameReader, FrameWriter, OutputTargets};
use cvbridge_transport::BridgeStream;

use crate::cmd::{
    drain_for, install_ctrlc_handler, open_link, parse_duration, MonitorArgs, DRAIN_POLL,
};
use crate::exit::{frame_error, transport_error, CliError, CliResult, SUCCESS, TIMEOUT};
use crate::output::{print_telemetry, OutputFormat};

/// Read timeout when none is requested, so Ctrl-C is noticed.
const IDLE_POLL: Duration = Duration::from_millis(250);

/// How long the link stays open after the zero command.
const ZERO_LINGER: Duration = Duration::from_millis(50);

/// Why the receive loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ended {
    /// `--count` reached or Ctrl-C.
    Finished,
    /// The card hung up; nothing can be sent back.
    LinkClosed,
}

pub fn run(args: MonitorArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = args.timeout.as_deref().map(parse_duration).transpose()?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut stream = open_link(&args.link)?;
    stream
        .set_read_timeout(Some(timeout.unwrap_or(IDLE_POLL)))
        .map_err(|err| transport_error("configure failed", err))?;
    let mut reader = FrameReader::new(stream);

    let outcome = receive(&mut reader, &args, timeout, &running, format);

    let mut stream = reader.into_inner();
    if args.zero_on_exit && !matches!(outcome, Ok(Ended::LinkClosed)) {
        zero_outputs(&mut stream);
    }
    outcome.map(|_| SUCCESS)
}

fn receive(
    reader: &mut FrameReader<BridgeStream>,
    args: &MonitorArgs,
    timeout: Option<Duration>,
    running: &AtomicBool,
    format: OutputFormat,
) -> CliResult<Ended> {
    let mut printed = 0u64;
    while running.load(Ordering::SeqCst) {
        let snapshot = match reader.read_telemetry() {
            Ok(snapshot) => snapshot,
            Err(FrameError::Io(err)) if is_timeout(&err) => {
                if let Some(timeout) = timeout {
                    return Err(CliError::new(
                        TIMEOUT,
                        format!("no telemetry within {}ms", timeout.as_millis()),
                    ));
                }
                continue;
            }
            Err(FrameError::ConnectionClosed) => {
                tracing::info!(frames = printed, "card closed the link");
                return Ok(Ended::LinkClosed);
            }
            Err(err) => return Err(frame_error("receive failed", err)),
        };

        printed += 1;
        print_telemetry(&snapshot, printed, format);

        if args.count.is_some_and(|count| printed >= count) {
            break;
        }
    }

    Ok(Ended::Finished)
}

/// Set every output to zero, as a host leaving the link should.
///
/// Best effort: failures are logged and never change the exit code.
fn zero_outputs(stream: &mut BridgeStream) {
    let mut writer = FrameWriter::new(&mut *stream);
    if let Err(err) = writer.send_command(&OutputTargets::ZERO) {
        tracing::warn!(error = %err, "could not zero card outputs");
        return;
    }
    tracing::debug!("card outputs zeroed");

    if stream.set_read_timeout(Some(DRAIN_POLL)).is_ok() {
        drain_for(stream, ZERO_LINGER);
    }
}

fn is_timeout(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use cvbridge_frame::{CommandDecoder, COMMAND_FRAME_LEN};
    use cvbridge_transport::ByteTransport;

    use super::*;

    #[test]
    fn zero_outputs_sends_zero_command() {
        let (mut host, mut card) = BridgeStream::pair().unwrap();
        zero_outputs(&mut host);

        let mut decoder = CommandDecoder::new();
        let mut decoded = None;
        for _ in 0..COMMAND_FRAME_LEN {
            let byte = card.read_byte(Duration::from_millis(100)).unwrap();
            decoded = byte.and_then(|b| decoder.push(b));
        }
        assert_eq!(decoded, Some(OutputTargets::ZERO));
    }

    #[test]
    fn zero_outputs_on_closed_link_returns_promptly() {
        let (mut host, card) = BridgeStream::pair().unwrap();
        drop(card);

        let start = Instant::now();
        zero_outputs(&mut host);
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
