//! Card I/O boundary.
//!
//! The sampler only touches hardware through [`Hardware`]. Every call is
//! assumed infallible, non-blocking and bounded by one sample period, so the
//! trait has no error type. [`SimulatedCard`] stands in for the physical card
//! on a host machine.

use cvbridge_frame::{SwitchPosition, INDICATOR_COUNT};

/// Rotary controls on the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Knob {
    Main = 0,
    X = 1,
    Y = 2,
}

impl Knob {
    /// Knobs in telemetry order.
    pub const ALL: [Knob; 3] = [Knob::Main, Knob::X, Knob::Y];
}

/// Per-channel hardware primitives used by the sampler.
///
/// Channel indices are 0-based. Implementations must ignore out-of-range
/// indices on writes and return 0 (or `false`) on reads.
pub trait Hardware {
    fn write_audio_out(&mut self, index: usize, value: i16);
    fn write_cv_out(&mut self, index: usize, value: i16);
    fn write_pulse_out(&mut self, index: usize, high: bool);
    /// Activity indicator brightness, 0..=[`INDICATOR_MAX`](crate::INDICATOR_MAX).
    fn set_indicator(&mut self, index: usize, level: u16);

    fn read_cv_in(&mut self, index: usize) -> i16;
    fn read_audio_in(&mut self, index: usize) -> i16;
    fn read_knob(&mut self, knob: Knob) -> i16;
    fn read_pulse_in(&mut self, index: usize) -> bool;
    fn read_switch(&mut self) -> SwitchPosition;
}

impl<H: Hardware + ?Sized> Hardware for &mut H {
    fn write_audio_out(&mut self, index: usize, value: i16) {
        (**self).write_audio_out(index, value)
    }

    fn write_cv_out(&mut self, index: usize, value: i16) {
        (**self).write_cv_out(index, value)
    }

    fn write_pulse_out(&mut self, index: usize, high: bool) {
        (**self).write_pulse_out(index, high)
    }

    fn set_indicator(&mut self, index: usize, level: u16) {
        (**self).set_indicator(index, level)
    }

    fn read_cv_in(&mut self, index: usize) -> i16 {
        (**self).read_cv_in(index)
    }

    fn read_audio_in(&mut self, index: usize) -> i16 {
        (**self).read_audio_in(index)
    }

    fn read_knob(&mut self, knob: Knob) -> i16 {
        (**self).read_knob(knob)
    }

    fn read_pulse_in(&mut self, index: usize) -> bool {
        (**self).read_pulse_in(index)
    }

    fn read_switch(&mut self) -> SwitchPosition {
        (**self).read_switch()
    }
}

/// Front-panel state of a simulated card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatedInputs {
    /// Main, X, Y knob positions (0..=4095).
    pub knobs: [i16; 3],
    pub switch: SwitchPosition,
    /// Pulse inputs driven externally.
    pub pulse: [bool; 2],
    /// CV inputs driven externally (unpatched jacks).
    pub cv: [i16; 2],
    /// Audio inputs driven externally (unpatched jacks).
    pub audio: [i16; 2],
}

impl Default for SimulatedInputs {
    fn default() -> Self {
        Self {
            knobs: [0; 3],
            switch: SwitchPosition::Middle,
            pulse: [false; 2],
            cv: [0; 2],
            audio: [0; 2],
        }
    }
}

/// In-memory card.
///
/// Unpatched, inputs read the fixed [`SimulatedInputs`]. Patched, each output
/// jack is cabled to the matching input jack: CV and audio inputs read back the
/// last written output and pulse inputs read the output OR the external level.
#[derive(Debug, Clone, Default)]
pub struct SimulatedCard {
    inputs: SimulatedInputs,
    patched: bool,
    audio_out: [i16; 2],
    cv_out: [i16; 2],
    pulse_out: [bool; 2],
    indicators: [u16; INDICATOR_COUNT],
}

impl SimulatedCard {
    pub fn new(inputs: SimulatedInputs) -> Self {
        Self {
            inputs,
            ..Self::default()
        }
    }

    /// A card with every output cabled back to its input.
    pub fn patched(inputs: SimulatedInputs) -> Self {
        Self {
            inputs,
            patched: true,
            ..Self::default()
        }
    }

    pub fn inputs(&self) -> &SimulatedInputs {
        &self.inputs
    }

    /// Change front-panel state (knobs, switch, external jacks).
    pub fn inputs_mut(&mut self) -> &mut SimulatedInputs {
        &mut self.inputs
    }

    pub fn is_patched(&self) -> bool {
        self.patched
    }

    pub fn audio_out(&self) -> [i16; 2] {
        self.audio_out
    }

    pub fn cv_out(&self) -> [i16; 2] {
        self.cv_out
    }

    pub fn pulse_out(&self) -> [bool; 2] {
        self.pulse_out
    }

    pub fn indicators(&self) -> [u16; INDICATOR_COUNT] {
        self.indicators
    }
}

fn set<T: Copy, const N: usize>(slots: &mut [T; N], index: usize, value: T) {
    if let Some(slot) = slots.get_mut(index) {
        *slot = value;
    }
}

fn get<T: Copy + Default, const N: usize>(slots: &[T; N], index: usize) -> T {
    slots.get(index).copied().unwrap_or_default()
}

impl Hardware for SimulatedCard {
    fn write_audio_out(&mut self, index: usize, value: i16) {
        set(&mut self.audio_out, index, value);
    }

    fn write_cv_out(&mut self, index: usize, value: i16) {
        set(&mut self.cv_out, index, value);
    }

    fn write_pulse_out(&mut self, index: usize, high: bool) {
        set(&mut self.pulse_out, index, high);
    }

    fn set_indicator(&mut self, index: usize, level: u16) {
        set(&mut self.indicators, index, level);
    }

    fn read_cv_in(&mut self, index: usize) -> i16 {
        if self.patched {
            get(&self.cv_out, index)
        } else {
            get(&self.inputs.cv, index)
        }
    }

    fn read_audio_in(&mut self, index: usize) -> i16 {
        if self.patched {
            get(&self.audio_out, index)
        } else {
            get(&self.inputs.audio, index)
        }
    }

    fn read_knob(&mut self, knob: Knob) -> i16 {
        self.inputs.knobs[knob as usize]
    }

    fn read_pulse_in(&mut self, index: usize) -> bool {
        let external = get(&self.inputs.pulse, index);
        external || (self.patched && get(&self.pulse_out, index))
    }

    fn read_switch(&mut self) -> SwitchPosition {
        self.inputs.switch
    }
}
