use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cvbridge_device::{
    clock, ClockConfig, ClockHandle, HostLoop, HostLoopConfig, RealtimeSampler,
    SharedStateChannel, SimulatedCard, SimulatedInputs, DEFAULT_WRITE_TIMEOUT, REPORT_INTERVAL,
    REPORT_RATE_HZ,
};
use cvbridge_transport::{BridgeStream, SerialPort, VirtualPort};

use crate::cmd::{install_ctrlc_handler, parse_duration, DeviceArgs};
use crate::exit::{device_error, transport_error, CliResult, SUCCESS};
use crate::output::OutputFormat;

/// How often the accept loop re-checks the shutdown flag.
const ACCEPT_POLL: Duration = Duration::from_millis(250);

type Clock = ClockHandle<SimulatedCard, REPORT_INTERVAL>;

pub fn run(args: DeviceArgs, _format: OutputFormat) -> CliResult<i32> {
    let host_config = HostLoopConfig {
        read_timeout: parse_duration(&args.read_timeout)?,
        write_timeout: match args.write_timeout.as_deref() {
            Some(value) => parse_duration(value)?,
            None => DEFAULT_WRITE_TIMEOUT,
        },
    };
    let inputs = SimulatedInputs {
        knobs: [args.knob_main, args.knob_x, args.knob_y],
        switch: args.switch.into(),
        ..SimulatedInputs::default()
    };

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let channel = Arc::new(SharedStateChannel::new());
    let card = if args.patched {
        SimulatedCard::patched(inputs)
    } else {
        SimulatedCard::new(inputs)
    };
    let sampler: RealtimeSampler<_> = RealtimeSampler::new(card, Arc::clone(&channel));
    let clock = clock::spawn(sampler, ClockConfig::default())
        .map_err(|err| device_error("sample clock failed", err))?;

    tracing::info!(
        report_rate_hz = REPORT_RATE_HZ,
        patched = args.patched,
        "simulated card running"
    );

    let result = if args.link.serial {
        serve_serial(&args, &channel, host_config, &running)
    } else {
        serve_virtual_port(&args, &channel, host_config, &running)
    };

    shutdown(clock, &channel);
    result.map(|()| SUCCESS)
}

fn serve_serial(
    args: &DeviceArgs,
    channel: &Arc<SharedStateChannel>,
    config: HostLoopConfig,
    running: &AtomicBool,
) -> CliResult<()> {
    let path = args.link.resolve_path()?;
    let port = SerialPort::open_with_config(&path, &args.link.serial_config())
        .map_err(|err| transport_error("open failed", err))?;
    let stream = BridgeStream::from_serial(port);

    let mut host = HostLoop::with_config(stream, Arc::clone(channel), config);
    host.run_while(running)
        .map_err(|err| device_error("serial link failed", err))
}

fn serve_virtual_port(
    args: &DeviceArgs,
    channel: &Arc<SharedStateChannel>,
    config: HostLoopConfig,
    running: &AtomicBool,
) -> CliResult<()> {
    let path = args.link.resolve_path()?;
    let port = VirtualPort::bind(&path).map_err(|err| transport_error("bind failed", err))?;
    tracing::info!(path = %port.path().display(), "waiting for host");

    while running.load(Ordering::SeqCst) {
        let stream = match port.accept_timeout(ACCEPT_POLL) {
            Ok(Some(stream)) => stream,
            Ok(None) => continue,
            Err(err) => return Err(transport_error("accept failed", err)),
        };
        tracing::info!("host connected");

        let mut host = HostLoop::with_config(stream, Arc::clone(channel), config);
        match host.run_while(running) {
            Ok(()) => {}
            Err(err) if err.is_disconnect() => {
                let stats = host.stats();
                tracing::info!(
                    commands = stats.commands,
                    telemetry_frames = stats.telemetry_frames,
                    telemetry_dropped = stats.telemetry_dropped,
                    bytes_in = stats.bytes_in,
                    "host disconnected"
                );
            }
            Err(err) => return Err(device_error("host loop failed", err)),
        }
    }

    Ok(())
}

fn shutdown(clock: Clock, channel: &SharedStateChannel) {
    match clock.stop() {
        Ok(sampler) => tracing::debug!(ticks = sampler.ticks(), "sampler stopped"),
        Err(err) => tracing::warn!(error = %err, "sample clock did not stop cleanly"),
    }

    let stats = channel.stats();
    tracing::info!(
        published = stats.published,
        overwritten = stats.overwritten,
        torn = stats.torn,
        "snapshot channel summary"
    );
}
