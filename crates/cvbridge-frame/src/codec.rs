use bytes::{Buf, BufMut, BytesMut};

use crate::channel::{pulse_bit, SwitchPosition, OUTPUT_CHANNELS, SWITCH_MASK, SWITCH_SHIFT};

/// Sync marker opening every host → card command frame.
pub const COMMAND_SYNC: u8 = 0xC0;

/// Sync marker opening every card → host telemetry frame.
pub const TELEMETRY_SYNC: u8 = 0xC1;

/// Command frame: sync (1) + flags (1) + 4 × i16 = 10 bytes.
pub const COMMAND_FRAME_LEN: usize = 10;

/// Telemetry frame: sync (1) + flags (1) + 7 × i16 = 16 bytes.
pub const TELEMETRY_FRAME_LEN: usize = 16;

/// Lower bound of the card's native channel range.
///
/// The codec transports any `i16`; the range is informational.
pub const NATIVE_MIN: i16 = -2048;

/// Upper bound of the card's native channel range.
pub const NATIVE_MAX: i16 = 2047;

/// Target values for the card outputs, as carried by one command frame.
///
/// Every field is independently valid; there is no cross-field invariant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputTargets {
    /// Bit 0: pulse out 1, bit 1: pulse out 2. Other bits are carried as-is.
    pub flags: u8,
    /// Channels 1-4 in native units.
    pub channels: [i16; OUTPUT_CHANNELS],
}

impl OutputTargets {
    /// All outputs at zero, both pulses low.
    pub const ZERO: Self = Self {
        flags: 0,
        channels: [0; OUTPUT_CHANNELS],
    };

    pub fn new(flags: u8, channels: [i16; OUTPUT_CHANNELS]) -> Self {
        Self { flags, channels }
    }

    /// State of pulse output `index` (0 or 1).
    pub fn pulse(&self, index: usize) -> bool {
        let bit = pulse_bit(index);
        bit != 0 && self.flags & bit != 0
    }

    /// Return a copy with pulse output `index` set or cleared.
    pub fn with_pulse(mut self, index: usize, high: bool) -> Self {
        let bit = pulse_bit(index);
        if high {
            self.flags |= bit;
        } else {
            self.flags &= !bit;
        }
        self
    }

    /// Serialize into a complete command frame.
    ///
    /// ```text
    /// ┌──────┬───────┬────────┬────────┬────────┬────────┐
    /// │ 0xC0 │ flags │ ch1 LE │ ch2 LE │ ch3 LE │ ch4 LE │
    /// └──────┴───────┴────────┴────────┴────────┴────────┘
    /// ```
    pub fn to_frame(&self) -> [u8; COMMAND_FRAME_LEN] {
        let mut frame = [0u8; COMMAND_FRAME_LEN];
        let mut dst = &mut frame[..];
        dst.put_u8(COMMAND_SYNC);
        dst.put_u8(self.flags);
        for value in self.channels {
            dst.put_i16_le(value);
        }
        frame
    }

    /// Extract fields from a complete command frame.
    ///
    /// The sync byte is not checked; the decoder only emits frames that start
    /// with it.
    pub fn from_frame(frame: &[u8; COMMAND_FRAME_LEN]) -> Self {
        let mut src = &frame[1..];
        let flags = src.get_u8();
        let mut channels = [0i16; OUTPUT_CHANNELS];
        for value in &mut channels {
            *value = src.get_i16_le();
        }
        Self { flags, channels }
    }
}

/// One reading of every card input, as carried by one telemetry frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputSnapshot {
    /// Bit 0: pulse in 1, bit 1: pulse in 2, bits 2-3: switch position.
    pub flags: u8,
    /// CV in 1-2, native units.
    pub cv: [i16; 2],
    /// Audio in 1-2, native units.
    pub audio: [i16; 2],
    /// Main, X and Y knobs (0..=4095).
    pub controls: [i16; 3],
}

impl InputSnapshot {
    /// Pack the discrete inputs into a telemetry flags byte.
    pub fn pack_flags(pulse1: bool, pulse2: bool, switch: SwitchPosition) -> u8 {
        let mut flags = 0;
        if pulse1 {
            flags |= pulse_bit(0);
        }
        if pulse2 {
            flags |= pulse_bit(1);
        }
        flags | (switch.bits() << SWITCH_SHIFT)
    }

    /// State of pulse input `index` (0 or 1).
    pub fn pulse(&self, index: usize) -> bool {
        let bit = pulse_bit(index);
        bit != 0 && self.flags & bit != 0
    }

    /// Raw two-bit switch field.
    pub fn switch_bits(&self) -> u8 {
        (self.flags >> SWITCH_SHIFT) & SWITCH_MASK
    }

    /// Decoded switch position, `None` for the unused value 3.
    pub fn switch_position(&self) -> Option<SwitchPosition> {
        SwitchPosition::from_bits(self.switch_bits())
    }

    /// Serialize into a complete telemetry frame.
    ///
    /// ```text
    /// ┌──────┬───────┬────────────┬──────────────┬────────────────────┐
    /// │ 0xC1 │ flags │ cv1 cv2 LE │ aud1 aud2 LE │ main  x  y  LE     │
    /// │ [0]  │ [1]   │ [2..6]     │ [6..10]      │ [10..16]           │
    /// └──────┴───────┴────────────┴──────────────┴────────────────────┘
    /// ```
    pub fn to_frame(&self) -> [u8; TELEMETRY_FRAME_LEN] {
        let mut frame = [0u8; TELEMETRY_FRAME_LEN];
        let mut dst = &mut frame[..];
        dst.put_u8(TELEMETRY_SYNC);
        dst.put_u8(self.flags);
        for value in self.cv.into_iter().chain(self.audio).chain(self.controls) {
            dst.put_i16_le(value);
        }
        frame
    }

    /// Extract fields from a complete telemetry frame.
    pub fn from_frame(frame: &[u8; TELEMETRY_FRAME_LEN]) -> Self {
        let mut src = &frame[1..];
        let flags = src.get_u8();
        let cv = [src.get_i16_le(), src.get_i16_le()];
        let audio = [src.get_i16_le(), src.get_i16_le()];
        let controls = [src.get_i16_le(), src.get_i16_le(), src.get_i16_le()];
        Self {
            flags,
            cv,
            audio,
            controls,
        }
    }
}

/// Append an encoded command frame to `dst`.
pub fn encode_command(targets: &OutputTargets, dst: &mut BytesMut) {
    dst.reserve(COMMAND_FRAME_LEN);
    dst.put_slice(&targets.to_frame());
}

/// Encode a telemetry frame. Pure; no allocation.
pub fn encode_telemetry(snapshot: &InputSnapshot) -> [u8; TELEMETRY_FRAME_LEN] {
    snapshot.to_frame()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_scenario_single_channel() {
        let frame = [COMMAND_SYNC, 0x00, 0x00, 0x08, 0, 0, 0, 0, 0, 0];
        let targets = OutputTargets::from_frame(&frame);
        assert_eq!(targets.flags, 0);
        assert_eq!(targets.channels, [2048, 0, 0, 0]);
    }

    #[test]
    fn telemetry_scenario_bytes() {
        let snapshot = InputSnapshot {
            flags: 0b0110,
            cv: [100, -50],
            audio: [0, 0],
            controls: [4095, 0, 2048],
        };
        assert_eq!(
            encode_telemetry(&snapshot),
            [
                0xC1, 0x06, 0x64, 0x00, 0xCE, 0xFF, 0x00, 0x00, 0x00, 0x00, 0xFF, 0x0F, 0x00,
                0x00, 0x00, 0x08
            ]
        );
        assert!(snapshot.pulse(1));
        assert!(!snapshot.pulse(0));
        assert_eq!(snapshot.switch_position(), Some(SwitchPosition::Middle));
    }

    #[test]
    fn telemetry_fields_survive_encoding() {
        let cases = [
            InputSnapshot::default(),
            InputSnapshot {
                flags: InputSnapshot::pack_flags(true, true, SwitchPosition::Up),
                cv: [NATIVE_MIN, NATIVE_MAX],
                audio: [-1, 1],
                controls: [0, 4095, 2047],
            },
            InputSnapshot {
                flags: 0xFF,
                cv: [i16::MIN, i16::MAX],
                audio: [i16::MAX, i16::MIN],
                controls: [-1, 0x00C0, 0x00C1],
            },
        ];
        for snapshot in cases {
            assert_eq!(InputSnapshot::from_frame(&snapshot.to_frame()), snapshot);
        }
    }

    #[test]
    fn command_layout_is_little_endian() {
        let targets = OutputTargets::new(0x03, [1, -1, 0x1234, NATIVE_MIN]);
        assert_eq!(
            targets.to_frame(),
            [0xC0, 0x03, 0x01, 0x00, 0xFF, 0xFF, 0x34, 0x12, 0x00, 0xF8]
        );
    }

    #[test]
    fn pulse_helpers() {
        let targets = OutputTargets::ZERO.with_pulse(1, true);
        assert_eq!(targets.flags, 0x02);
        assert!(targets.pulse(1));
        assert!(!targets.pulse(0));
        assert!(!targets.pulse(7));
        assert_eq!(targets.with_pulse(1, false), OutputTargets::ZERO);
    }

    #[test]
    fn pack_flags_places_switch_in_bits_two_and_three() {
        assert_eq!(
            InputSnapshot::pack_flags(false, true, SwitchPosition::Middle),
            0b0110
        );
        assert_eq!(
            InputSnapshot::pack_flags(true, false, SwitchPosition::Up),
            0b1001
        );
    }

    #[test]
    fn encode_command_appends() {
        let mut buf = BytesMut::new();
        encode_command(&OutputTargets::ZERO, &mut buf);
        encode_command(&OutputTargets::new(1, [0; 4]), &mut buf);
        assert_eq!(buf.len(), 2 * COMMAND_FRAME_LEN);
        assert_eq!(buf[0], COMMAND_SYNC);
        assert_eq!(buf[COMMAND_FRAME_LEN], COMMAND_SYNC);
        assert_eq!(buf[COMMAND_FRAME_LEN + 1], 1);
    }
}
