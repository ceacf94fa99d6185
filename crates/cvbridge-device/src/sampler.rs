//! Per-tick sampling work.
//!
//! The sampler runs on the sample clock and must finish inside one sample
//! period: no allocation, no locks, no logging, no blocking calls.

use std::sync::Arc;

use cvbridge_frame::{InputSnapshot, OutputTargets, INDICATOR_COUNT};

use crate::config::{INDICATOR_MAX, REPORT_INTERVAL};
use crate::hardware::{Hardware, Knob};
use crate::shared::SharedStateChannel;

/// Indicator level for an output value: `|value| * 2`, saturated.
///
/// The native range -2048..=2047 maps onto 0..=4095.
#[inline]
pub fn activity_level(value: i16) -> u16 {
    let level = value.unsigned_abs().saturating_mul(2);
    level.min(INDICATOR_MAX)
}

/// Applies output targets every tick and publishes inputs every `D` ticks.
///
/// `D` is the decimation factor and is fixed at compile time.
pub struct RealtimeSampler<H, const D: u32 = REPORT_INTERVAL> {
    hardware: H,
    channel: Arc<SharedStateChannel>,
    counter: u32,
    ticks: u64,
}

impl<H: Hardware, const D: u32> RealtimeSampler<H, D> {
    const NONZERO_INTERVAL: () = assert!(D > 0, "decimation factor must be non-zero");

    pub fn new(hardware: H, channel: Arc<SharedStateChannel>) -> Self {
        let () = Self::NONZERO_INTERVAL;
        Self {
            hardware,
            channel,
            counter: 0,
            ticks: 0,
        }
    }

    /// One sample period of work. Returns true when a snapshot was published.
    #[inline]
    pub fn tick(&mut self) -> bool {
        let targets = self.channel.read_targets();
        self.apply(&targets);

        self.ticks = self.ticks.wrapping_add(1);
        self.counter += 1;
        if self.counter < D {
            return false;
        }
        self.counter = 0;

        let snapshot = self.sample_inputs();
        self.channel.publish_snapshot(&snapshot);
        true
    }

    fn apply(&mut self, targets: &OutputTargets) {
        let [ch1, ch2, ch3, ch4] = targets.channels;
        self.hardware.write_audio_out(0, ch1);
        self.hardware.write_audio_out(1, ch2);
        self.hardware.write_cv_out(0, ch3);
        self.hardware.write_cv_out(1, ch4);
        self.hardware.write_pulse_out(0, targets.pulse(0));
        self.hardware.write_pulse_out(1, targets.pulse(1));

        for (index, &value) in targets.channels.iter().enumerate().take(INDICATOR_COUNT) {
            self.hardware.set_indicator(index, activity_level(value));
        }
    }

    fn sample_inputs(&mut self) -> InputSnapshot {
        let hw = &mut self.hardware;
        let cv = [hw.read_cv_in(0), hw.read_cv_in(1)];
        let audio = [hw.read_audio_in(0), hw.read_audio_in(1)];
        let controls = Knob::ALL.map(|knob| hw.read_knob(knob));
        let flags =
            InputSnapshot::pack_flags(hw.read_pulse_in(0), hw.read_pulse_in(1), hw.read_switch());
        InputSnapshot {
            flags,
            cv,
            audio,
            controls,
        }
    }

    /// Ticks executed since construction (wrapping).
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Decimation factor.
    pub const fn interval(&self) -> u32 {
        D
    }

    pub fn channel(&self) -> &Arc<SharedStateChannel> {
        &self.channel
    }

    pub fn hardware(&self) -> &H {
        &self.hardware
    }

    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hardware
    }

    pub fn into_hardware(self) -> H {
        self.hardware
    }
}

impl<H, const D: u32> std::fmt::Debug for RealtimeSampler<H, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeSampler")
            .field("interval", &D)
            .field("counter", &self.counter)
            .field("ticks", &self.ticks)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use cvbridge_frame::SwitchPosition;

    use super::*;
    use crate::hardware::{SimulatedCard, SimulatedInputs};

    fn sampler<const D: u32>(card: SimulatedCard) -> RealtimeSampler<SimulatedCard, D> {
        RealtimeSampler::new(card, Arc::new(SharedStateChannel::new()))
    }

    #[test]
    fn activity_level_scales_and_saturates() {
        assert_eq!(activity_level(0), 0);
        assert_eq!(activity_level(100), 200);
        assert_eq!(activity_level(-100), 200);
        assert_eq!(activity_level(2047), 4094);
        assert_eq!(activity_level(-2048), INDICATOR_MAX);
        assert_eq!(activity_level(i16::MAX), INDICATOR_MAX);
        assert_eq!(activity_level(i16::MIN), INDICATOR_MAX);
    }

    #[test]
    fn publishes_floor_n_over_d_times_at_multiples_of_d() {
        let mut sampler = sampler::<4>(SimulatedCard::default());
        let mut published = Vec::new();
        for _ in 0..19 {
            if sampler.tick() {
                published.push(sampler.ticks());
            }
        }
        assert_eq!(published, vec![4, 8, 12, 16]);
        assert_eq!(sampler.channel().stats().published, 4);
    }

    #[test]
    fn default_interval_is_report_interval() {
        let mut sampler: RealtimeSampler<SimulatedCard> =
            RealtimeSampler::new(SimulatedCard::default(), Arc::new(SharedStateChannel::new()));
        assert_eq!(sampler.interval(), REPORT_INTERVAL);

        for _ in 0..REPORT_INTERVAL - 1 {
            assert!(!sampler.tick());
        }
        assert!(sampler.tick());
    }

    #[test]
    fn interval_of_one_publishes_every_tick() {
        let mut sampler = sampler::<1>(SimulatedCard::default());
        assert!((0..10).all(|_| sampler.tick()));
    }

    #[test]
    fn targets_drive_outputs_and_indicators() {
        let mut sampler = sampler::<48>(SimulatedCard::default());
        sampler
            .channel()
            .set_targets(&OutputTargets::new(0x02, [2047, -2048, 300, -5]));
        sampler.tick();

        let card = sampler.hardware();
        assert_eq!(card.audio_out(), [2047, -2048]);
        assert_eq!(card.cv_out(), [300, -5]);
        assert_eq!(card.pulse_out(), [false, true]);
        assert_eq!(card.indicators(), [4094, 4095, 600, 10]);
    }

    #[test]
    fn snapshot_carries_every_input() {
        let inputs = SimulatedInputs {
            knobs: [4095, 0, 2048],
            switch: SwitchPosition::Middle,
            pulse: [false, true],
            cv: [100, -50],
            audio: [0, 0],
        };
        let mut sampler = sampler::<2>(SimulatedCard::new(inputs));
        sampler.tick();
        sampler.tick();

        let snapshot = sampler.channel().take_snapshot_if_ready().unwrap();
        assert_eq!(
            snapshot,
            InputSnapshot {
                flags: 0b0110,
                cv: [100, -50],
                audio: [0, 0],
                controls: [4095, 0, 2048],
            }
        );
    }

    #[test]
    fn patched_card_reports_targets_back() {
        let mut sampler = sampler::<1>(SimulatedCard::patched(SimulatedInputs::default()));
        sampler
            .channel()
            .set_targets(&OutputTargets::new(0x01, [1, 2, 3, 4]));
        sampler.tick();

        let snapshot = sampler.channel().take_snapshot_if_ready().unwrap();
        assert_eq!(snapshot.audio, [1, 2]);
        assert_eq!(snapshot.cv, [3, 4]);
        assert!(snapshot.pulse(0));
        assert!(!snapshot.pulse(1));
    }

    #[test]
    fn into_hardware_returns_card() {
        let mut sampler = sampler::<3>(SimulatedCard::default());
        sampler.hardware_mut().inputs_mut().knobs[0] = 9;
        let text = format!("{sampler:?}");
        assert!(text.contains("interval: 3"));
        assert_eq!(sampler.into_hardware().inputs().knobs[0], 9);
    }
}
