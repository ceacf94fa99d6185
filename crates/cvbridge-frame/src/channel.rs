//! Card channel map and flag bits.
//!
//! Output channels 1-4 are carried in command frames in this order:
//!
//! | Channel | Card output |
//! |---|---|
//! | 1 | Audio Out 1 (DAC, sample-rate) |
//! | 2 | Audio Out 2 (DAC, sample-rate) |
//! | 3 | CV Out 1 (PWM) |
//! | 4 | CV Out 2 (PWM) |

/// Number of continuous output channels in a command frame.
pub const OUTPUT_CHANNELS: usize = 4;

/// Number of activity indicators driven from the output channels.
pub const INDICATOR_COUNT: usize = OUTPUT_CHANNELS;

/// Flag bit for pulse (digital) line 1, in both directions.
pub const PULSE_1: u8 = 0x01;

/// Flag bit for pulse (digital) line 2, in both directions.
pub const PULSE_2: u8 = 0x02;

/// Telemetry flags: shift and mask of the 3-way switch field.
pub const SWITCH_SHIFT: u8 = 2;
pub const SWITCH_MASK: u8 = 0x03;

/// Returns the flag bit for pulse line `index` (0 or 1).
pub fn pulse_bit(index: usize) -> u8 {
    match index {
        0 => PULSE_1,
        1 => PULSE_2,
        _ => 0,
    }
}

/// Returns a human-readable name for output channel `index` (0-based).
pub fn output_name(index: usize) -> &'static str {
    match index {
        0 => "audio_out_1",
        1 => "audio_out_2",
        2 => "cv_out_1",
        3 => "cv_out_2",
        _ => "unknown",
    }
}

/// Position of the card's three-way switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SwitchPosition {
    Down = 0,
    Middle = 1,
    Up = 2,
}

impl SwitchPosition {
    /// Convert from the two-bit wire value. `3` is not a position.
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(SwitchPosition::Down),
            1 => Some(SwitchPosition::Middle),
            2 => Some(SwitchPosition::Up),
            _ => None,
        }
    }

    /// The two-bit wire value.
    pub fn bits(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            SwitchPosition::Down => "down",
            SwitchPosition::Middle => "middle",
            SwitchPosition::Up => "up",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switch_bits_roundtrip() {
        for pos in [
            SwitchPosition::Down,
            SwitchPosition::Middle,
            SwitchPosition::Up,
        ] {
            assert_eq!(SwitchPosition::from_bits(pos.bits()), Some(pos));
        }
        assert_eq!(SwitchPosition::from_bits(3), None);
    }

    #[test]
    fn pulse_bits_are_distinct() {
        assert_eq!(pulse_bit(0), PULSE_1);
        assert_eq!(pulse_bit(1), PULSE_2);
        assert_eq!(pulse_bit(2), 0);
        assert_eq!(PULSE_1 & PULSE_2, 0);
    }

    #[test]
    fn output_names_follow_channel_map() {
        assert_eq!(output_name(0), "audio_out_1");
        assert_eq!(output_name(3), "cv_out_2");
        assert_eq!(output_name(4), "unknown");
    }
}
