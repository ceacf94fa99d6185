use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Args, Subcommand, ValueEnum};
use cvbridge_frame::{SwitchPosition, NATIVE_MAX, NATIVE_MIN};
use cvbridge_transport::{BridgeStream, SerialConfig, SerialPort, VirtualPort, DEFAULT_BAUD};

use crate::exit::{io_error, transport_error, CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod device;
pub mod monitor;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a simulated card and serve a host on a virtual port or serial TTY.
    Device(DeviceArgs),
    /// Send a single command frame.
    Send(SendArgs),
    /// Print telemetry frames received from a card.
    Monitor(MonitorArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Device(args) => device::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Monitor(args) => monitor::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

fn knob_value() -> clap::builder::RangedI64ValueParser<i16> {
    clap::value_parser!(i16).range(0..=4095)
}

fn channel_value() -> clap::builder::RangedI64ValueParser<i16> {
    clap::value_parser!(i16).range(i64::from(NATIVE_MIN)..=i64::from(NATIVE_MAX))
}

/// Where the link runs: a virtual port socket or a serial TTY.
#[derive(Args, Debug, Clone)]
pub struct LinkArgs {
    /// Virtual port socket, or serial device with --serial (auto-detected
    /// when omitted).
    #[arg(required_unless_present = "serial")]
    pub path: Option<PathBuf>,
    /// Use a serial TTY instead of a virtual port.
    #[arg(long)]
    pub serial: bool,
    /// Serial line rate (with --serial).
    #[arg(long, default_value_t = DEFAULT_BAUD)]
    pub baud: u32,
}

impl LinkArgs {
    /// PATH as given, or the auto-detected card port for `--serial`.
    pub fn resolve_path(&self) -> CliResult<PathBuf> {
        match (&self.path, self.serial) {
            (Some(path), _) => Ok(path.clone()),
            (None, true) => find_card_port(),
            (None, false) => Err(CliError::new(USAGE, "a virtual port PATH is required")),
        }
    }

    pub fn serial_config(&self) -> SerialConfig {
        SerialConfig {
            baud: self.baud,
            ..SerialConfig::default()
        }
    }
}

#[derive(Args, Debug)]
pub struct DeviceArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Main knob position (0-4095).
    #[arg(long, default_value = "0", value_parser = knob_value())]
    pub knob_main: i16,
    /// X knob position (0-4095).
    #[arg(long, default_value = "0", value_parser = knob_value())]
    pub knob_x: i16,
    /// Y knob position (0-4095).
    #[arg(long, default_value = "0", value_parser = knob_value())]
    pub knob_y: i16,
    /// Three-way switch position.
    #[arg(long, value_enum, default_value = "middle")]
    pub switch: SwitchArg,
    /// Cable every output back to the matching input.
    #[arg(long)]
    pub patched: bool,
    /// Bounded wait for one inbound byte (e.g. 100us, 2ms).
    #[arg(long, default_value = "100us")]
    pub read_timeout: String,
    /// Longest wait for the host to take a telemetry frame (e.g. 1ms).
    /// Frames are dropped immediately when omitted.
    #[arg(long)]
    pub write_timeout: Option<String>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Channel 1: Audio Out 1.
    #[arg(long, default_value = "0", value_parser = channel_value(), allow_negative_numbers = true)]
    pub ch1: i16,
    /// Channel 2: Audio Out 2.
    #[arg(long, default_value = "0", value_parser = channel_value(), allow_negative_numbers = true)]
    pub ch2: i16,
    /// Channel 3: CV Out 1.
    #[arg(long, default_value = "0", value_parser = channel_value(), allow_negative_numbers = true)]
    pub ch3: i16,
    /// Channel 4: CV Out 2.
    #[arg(long, default_value = "0", value_parser = channel_value(), allow_negative_numbers = true)]
    pub ch4: i16,
    /// Drive pulse out 1 high.
    #[arg(long)]
    pub pulse1: bool,
    /// Drive pulse out 2 high.
    #[arg(long)]
    pub pulse2: bool,
    /// Send all outputs at zero, pulses low.
    #[arg(long, conflicts_with_all = ["ch1", "ch2", "ch3", "ch4", "pulse1", "pulse2"])]
    pub zero: bool,
    /// Keep the link open this long after sending (e.g. 50ms) so the card
    /// reads the whole frame before it sees the hang-up.
    #[arg(long, default_value = "50ms")]
    pub linger: String,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Exit after printing N frames.
    #[arg(long)]
    pub count: Option<u64>,
    /// Give up when no frame arrives for this long (e.g. 5s, 500ms).
    #[arg(long)]
    pub timeout: Option<String>,
    /// Send an all-zero command before exiting so the card's outputs do not
    /// hold their last values.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub zero_on_exit: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum SwitchArg {
    Down,
    Middle,
    Up,
}

impl From<SwitchArg> for SwitchPosition {
    fn from(arg: SwitchArg) -> Self {
        match arg {
            SwitchArg::Down => SwitchPosition::Down,
            SwitchArg::Middle => SwitchPosition::Middle,
            SwitchArg::Up => SwitchPosition::Up,
        }
    }
}

/// Parse "5s", "150ms", "100us" or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix("us") {
        (num, "us")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "us" => Ok(Duration::from_micros(value)),
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

/// Longest a host tool waits for the card to take a command frame.
const HOST_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Open the host end of a link: connect to a virtual port, or open a TTY.
pub fn open_link(link: &LinkArgs) -> CliResult<BridgeStream> {
    let path = link.resolve_path()?;
    let mut stream = if link.serial {
        SerialPort::open_with_config(&path, &link.serial_config())
            .map(BridgeStream::from_serial)
            .map_err(|err| transport_error("open failed", err))?
    } else {
        VirtualPort::connect(&path).map_err(|err| transport_error("connect failed", err))?
    };
    stream
        .set_write_timeout(Some(HOST_WRITE_TIMEOUT))
        .map_err(|err| transport_error("configure failed", err))?;
    tracing::debug!(path = %path.display(), serial = link.serial, "link open");
    Ok(stream)
}

/// Device names a card enumerates as over USB CDC ACM.
fn is_card_port_name(name: &str) -> bool {
    name.starts_with("ttyACM") || name.starts_with("cu.usbmodem")
}

/// Pick the card's port from device paths: exactly one match is required.
pub fn select_card_port(candidates: impl IntoIterator<Item = PathBuf>) -> CliResult<PathBuf> {
    let mut matches: Vec<PathBuf> = candidates
        .into_iter()
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(is_card_port_name)
        })
        .collect();
    matches.sort();

    match matches.len() {
        0 => Err(CliError::new(
            USAGE,
            "no serial card found (looked for ttyACM* and cu.usbmodem*); pass PATH",
        )),
        1 => Ok(matches.remove(0)),
        _ => {
            let names: Vec<String> = matches.iter().map(|p| p.display().to_string()).collect();
            Err(CliError::new(
                USAGE,
                format!("several serial cards found ({}); pass PATH", names.join(", ")),
            ))
        }
    }
}

/// Scan /dev for the card's serial port.
pub fn find_card_port() -> CliResult<PathBuf> {
    let entries =
        std::fs::read_dir(Path::new("/dev")).map_err(|err| io_error("cannot list /dev", err))?;
    let port = select_card_port(entries.filter_map(|entry| entry.ok()).map(|entry| entry.path()))?;
    tracing::info!(path = %port.display(), "auto-detected serial port");
    Ok(port)
}

/// Read timeout while draining telemetry before hanging up.
pub const DRAIN_POLL: Duration = Duration::from_millis(5);

/// Discard inbound telemetry until `linger` has passed or the card hangs up.
///
/// The card writes telemetry while it reads commands; closing the link early
/// makes those writes fail and the card drops the unread part of the frame.
/// The stream's read timeout should be short (see [`DRAIN_POLL`]).
pub fn drain_for(stream: &mut BridgeStream, linger: Duration) {
    let deadline = Instant::now() + linger;
    let mut discard = [0u8; 256];
    while Instant::now() < deadline {
        match stream.read(&mut discard) {
            Ok(0) => break,
            Ok(_) => {}
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock
                        | std::io::ErrorKind::TimedOut
                        | std::io::ErrorKind::Interrupted
                ) => {}
            Err(_) => break,
        }
    }
}

/// Clear `running` on Ctrl-C / SIGTERM.
pub fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
