//! Sample clock for host builds.
//!
//! On the card the sampler runs from the converter interrupt. On a host it runs
//! on a dedicated thread that tracks an absolute deadline per tick. The OS
//! cannot wake a thread every sample period, so the thread sleeps until the
//! next deadline and then runs every tick that has come due in one burst.
//! Sample timing jitters; the tick count over time does not drift.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::SAMPLE_RATE_HZ;
use crate::error::{DeviceError, Result};
use crate::hardware::Hardware;
use crate::sampler::RealtimeSampler;

/// Sample clock settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockConfig {
    pub sample_rate_hz: u32,
    /// Most ticks run in one catch-up burst. When the thread falls further
    /// behind, the remaining backlog is skipped and counted as an overrun.
    pub max_catch_up: u32,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: SAMPLE_RATE_HZ,
            // 10 ms of samples.
            max_catch_up: SAMPLE_RATE_HZ / 100,
        }
    }
}

impl ClockConfig {
    /// Length of one sample period.
    pub fn period(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.sample_rate_hz.max(1)))
    }
}

/// Counters maintained by the clock thread.
#[derive(Debug, Default)]
struct ClockCounters {
    ticks: AtomicU64,
    overruns: AtomicU64,
}

/// Handle to a running sample clock.
///
/// Dropping the handle signals the thread to stop but does not wait for it.
/// Use [`ClockHandle::stop`] to join and recover the sampler.
pub struct ClockHandle<H, const D: u32> {
    running: Arc<AtomicBool>,
    counters: Arc<ClockCounters>,
    thread: Option<JoinHandle<RealtimeSampler<H, D>>>,
}

/// Start driving `sampler` from a dedicated "sampler" thread.
pub fn spawn<H, const D: u32>(
    sampler: RealtimeSampler<H, D>,
    config: ClockConfig,
) -> Result<ClockHandle<H, D>>
where
    H: Hardware + Send + 'static,
{
    if config.sample_rate_hz == 0 {
        return Err(DeviceError::Clock("sample rate must be non-zero".into()));
    }

    let running = Arc::new(AtomicBool::new(true));
    let counters = Arc::new(ClockCounters::default());

    info!(
        sample_rate_hz = config.sample_rate_hz,
        report_interval = D,
        "starting sample clock"
    );

    let thread = {
        let running = Arc::clone(&running);
        let counters = Arc::clone(&counters);
        thread::Builder::new()
            .name("sampler".into())
            .spawn(move || run(sampler, config, &running, &counters))
            .map_err(|err| DeviceError::Clock(format!("failed to spawn sampler thread: {err}")))?
    };

    Ok(ClockHandle {
        running,
        counters,
        thread: Some(thread),
    })
}

fn run<H: Hardware, const D: u32>(
    mut sampler: RealtimeSampler<H, D>,
    config: ClockConfig,
    running: &AtomicBool,
    counters: &ClockCounters,
) -> RealtimeSampler<H, D> {
    let period = config.period();
    let max_catch_up = config.max_catch_up.max(1);
    let mut deadline = Instant::now() + period;

    while running.load(Ordering::Acquire) {
        let now = Instant::now();
        if now < deadline {
            thread::sleep(deadline - now);
            continue;
        }

        let mut burst = 0u32;
        while deadline <= now && burst < max_catch_up {
            sampler.tick();
            deadline += period;
            burst += 1;
        }
        counters.ticks.fetch_add(u64::from(burst), Ordering::Relaxed);

        if deadline <= now {
            // Too far behind to catch up: resume from the present.
            counters.overruns.fetch_add(1, Ordering::Relaxed);
            deadline = now + period;
        }
    }

    sampler
}

impl<H, const D: u32> ClockHandle<H, D> {
    /// Ticks executed so far.
    pub fn ticks(&self) -> u64 {
        self.counters.ticks.load(Ordering::Relaxed)
    }

    /// Times the backlog exceeded one catch-up burst.
    pub fn overruns(&self) -> u64 {
        self.counters.overruns.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the clock and return the sampler with its hardware.
    pub fn stop(mut self) -> Result<RealtimeSampler<H, D>> {
        self.running.store(false, Ordering::Release);

        let thread = self
            .thread
            .take()
            .ok_or_else(|| DeviceError::Clock("sampler thread already joined".into()))?;
        debug!("waiting for sampler thread to exit");
        let sampler = thread
            .join()
            .map_err(|_| DeviceError::Clock("sampler thread panicked".into()))?;

        let overruns = self.overruns();
        if overruns > 0 {
            warn!(overruns, "sample clock fell behind");
        }
        info!(ticks = self.ticks(), overruns, "sample clock stopped");
        Ok(sampler)
    }
}

impl<H, const D: u32> Drop for ClockHandle<H, D> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

impl<H, const D: u32> std::fmt::Debug for ClockHandle<H, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClockHandle")
            .field("ticks", &self.ticks())
            .field("overruns", &self.overruns())
            .finish_non_exhaustive()
    }
}
