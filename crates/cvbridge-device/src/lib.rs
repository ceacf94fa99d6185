//! Card-side runtime for the cvbridge serial link.
//!
//! Two execution contexts share one [`SharedStateChannel`]:
//!
//! - the sampling context runs [`RealtimeSampler::tick`] once per sample
//!   period. It applies the latest output targets and publishes an input
//!   snapshot every [`REPORT_INTERVAL`] ticks. It never blocks.
//! - the I/O context runs [`HostLoop`]. It decodes command frames from the
//!   transport into output targets and writes published snapshots back as
//!   telemetry frames.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use cvbridge_device::{clock, ClockConfig, HostLoop, RealtimeSampler, SharedStateChannel};
//! use cvbridge_device::{SimulatedCard, SimulatedInputs};
//! use cvbridge_transport::VirtualPort;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let channel = Arc::new(SharedStateChannel::new());
//! let sampler: RealtimeSampler<_> =
//!     RealtimeSampler::new(SimulatedCard::new(SimulatedInputs::default()), Arc::clone(&channel));
//! let _clock = clock::spawn(sampler, ClockConfig::default())?;
//!
//! let port = VirtualPort::bind("/tmp/cvbridge.sock")?;
//! let mut host = HostLoop::new(port.accept()?, channel);
//! host.run()?;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod hardware;
pub mod host_loop;
pub mod sampler;
pub mod shared;

pub use clock::{ClockConfig, ClockHandle};
pub use config::{
    DEFAULT_READ_TIMEOUT, DEFAULT_WRITE_TIMEOUT, INDICATOR_MAX, REPORT_INTERVAL, REPORT_RATE_HZ,
    SAMPLE_RATE_HZ,
};
pub use error::{DeviceError, Result};
pub use hardware::{Hardware, Knob, SimulatedCard, SimulatedInputs};
pub use host_loop::{HostLoop, HostLoopConfig, HostLoopStats, Iteration};
pub use sampler::{activity_level, RealtimeSampler};
pub use shared::{ChannelStats, SharedStateChannel};
