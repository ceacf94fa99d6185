//! Fixed-length framing for the cvbridge card/host link.
//!
//! The link carries two frame kinds, one per direction, each opened by its own
//! sync marker:
//! - command (host → card, 10 bytes): `0xC0`, flags, four `i16` channel targets
//! - telemetry (card → host, 16 bytes): `0xC1`, flags, seven `i16` readings
//!
//! All multi-byte fields are little-endian. There are no length fields, no
//! checksums and no escaping: a decoder re-aligns on the next sync byte after
//! any corruption or mid-stream attach.

pub mod channel;
pub mod codec;
pub mod decoder;
pub mod error;
pub mod reader;
pub mod writer;

pub use channel::{
    output_name, SwitchPosition, INDICATOR_COUNT, OUTPUT_CHANNELS, PULSE_1, PULSE_2,
};
pub use codec::{
    encode_command, encode_telemetry, InputSnapshot, OutputTargets, COMMAND_FRAME_LEN,
    COMMAND_SYNC, NATIVE_MAX, NATIVE_MIN, TELEMETRY_FRAME_LEN, TELEMETRY_SYNC,
};
pub use decoder::{CommandDecoder, SyncDecoder, TelemetryDecoder};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
