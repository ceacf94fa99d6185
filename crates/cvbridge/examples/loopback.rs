//! Patched simulated card plus a host, wired through a virtual port.
//!
//! The card's outputs are cabled to its inputs, so every command the host sends
//! comes back in the telemetry stream.
//!
//! Run with:
//!   cargo run --example loopback

use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use cvbridge::device::{
    clock, ClockConfig, HostLoop, RealtimeSampler, SharedStateChannel, SimulatedCard,
    SimulatedInputs,
};
use cvbridge::frame::{FrameReader, FrameWriter, OutputTargets};
use cvbridge::transport::VirtualPort;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dir = std::env::temp_dir().join(format!("cvbridge-loopback-{}", std::process::id()));
    fs::create_dir_all(&dir)?;
    let path = dir.join("card.sock");

    // Card side: sampler on the sample clock, host loop on its own thread.
    let channel = Arc::new(SharedStateChannel::new());
    let sampler: RealtimeSampler<_> = RealtimeSampler::new(
        SimulatedCard::patched(SimulatedInputs::default()),
        Arc::clone(&channel),
    );
    let clock = clock::spawn(sampler, ClockConfig::default())?;

    let port = VirtualPort::bind(&path)?;
    let running = Arc::new(AtomicBool::new(true));
    let card = {
        let channel = Arc::clone(&channel);
        let running = Arc::clone(&running);
        thread::spawn(move || -> Result<(), cvbridge::device::DeviceError> {
            let stream = port.accept()?;
            HostLoop::new(stream, channel).run_while(&running)
        })
    };

    // Host side.
    let stream = VirtualPort::connect(&path)?;
    let mut writer = FrameWriter::new(stream.try_clone()?);
    let mut reader = FrameReader::new(stream);

    for step in 0..8i16 {
        let targets = OutputTargets::new(0x01, [step * 256, -step * 256, step, -step]);
        writer.send_command(&targets)?;

        // Skip telemetry sampled before the command landed.
        let snapshot = loop {
            let snapshot = reader.read_telemetry()?;
            if snapshot.audio == [targets.channels[0], targets.channels[1]] {
                break snapshot;
            }
        };
        eprintln!(
            "sent {:?} -> audio_in {:?} cv_in {:?} pulse_in_1 {}",
            targets.channels,
            snapshot.audio,
            snapshot.cv,
            snapshot.pulse(0)
        );
    }
    writer.send_command(&OutputTargets::ZERO)?;

    running.store(false, Ordering::Release);
    let _ = card.join();
    let sampler = clock.stop()?;
    eprintln!("sample clock ran {} ticks", sampler.ticks());
    eprintln!("channel stats: {:?}", channel.stats());

    let _ = fs::remove_dir_all(&dir);
    Ok(())
}
