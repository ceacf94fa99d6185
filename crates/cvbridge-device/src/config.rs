//! Fixed timing configuration.
//!
//! The report rate is a fixed ratio of the sample clock so per-tick timing can
//! be reasoned about statically. Nothing here is adjustable at runtime.

use std::time::Duration;

/// Card sample clock.
pub const SAMPLE_RATE_HZ: u32 = 48_000;

/// Sample clock ticks per published input snapshot (decimation factor).
pub const REPORT_INTERVAL: u32 = 48;

/// Input snapshots published per second.
pub const REPORT_RATE_HZ: u32 = SAMPLE_RATE_HZ / REPORT_INTERVAL;

/// How long the host loop waits for one inbound byte.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_micros(100);

/// How long the host loop may wait for the link to take a telemetry frame.
///
/// Zero: a frame the link cannot take immediately is dropped.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::ZERO;

/// Full-scale activity indicator level.
pub const INDICATOR_MAX: u16 = 4095;

const _: () = assert!(
    SAMPLE_RATE_HZ % REPORT_INTERVAL == 0,
    "report interval must divide the sample rate"
);
