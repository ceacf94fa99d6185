//! Serial bridge between a host and a real-time CV/audio card.
//!
//! The card exchanges fixed-length frames with the host over a serial link:
//! 10-byte command frames set the card's outputs, 16-byte telemetry frames
//! report its inputs at a fixed decimated rate.
//!
//! # Crate Structure
//!
//! - [`transport`]: Byte transports (serial TTY, virtual port)
//! - [`frame`]: Wire codec, resynchronizing decoders, blocking frame reader/writer
//! - [`device`]: Card-side runtime: shared state, sampler, host loop (behind `device` feature)

/// Re-export transport types.
pub mod transport {
    pub use cvbridge_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use cvbridge_frame::*;
}

/// Re-export card runtime types (requires `device` feature).
#[cfg(feature = "device")]
pub mod device {
    pub use cvbridge_device::*;
}
