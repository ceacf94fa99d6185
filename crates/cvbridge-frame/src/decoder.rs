//! Resynchronizing byte-at-a-time frame decoder.
//!
//! The link has no delimiter other than the sync marker, so the decoder keeps
//! one rule: a sync byte always starts a frame. For each byte `b`:
//!
//! 1. mid-frame and `b` is the sync marker: drop the partial frame, restart at `b`
//! 2. idle and `b` is not the sync marker: drop `b`
//! 3. otherwise append `b`
//! 4. buffer full: emit the frame and go idle
//!
//! After any corruption, disconnect or mid-stream attach the decoder is
//! aligned again at the next sync byte, losing at most the frame in flight.
//!
//! Payload bytes are not escaped. A payload byte equal to the sync marker
//! restarts the frame exactly like a real sync would; senders cannot avoid
//! this without changing the wire format.

use crate::codec::{
    InputSnapshot, OutputTargets, COMMAND_FRAME_LEN, COMMAND_SYNC, TELEMETRY_FRAME_LEN,
    TELEMETRY_SYNC,
};

/// Fixed-length frame assembler keyed on a single sync byte.
///
/// Constant time per byte, no allocation, never blocks.
#[derive(Debug, Clone)]
pub struct SyncDecoder<const N: usize> {
    sync: u8,
    buf: [u8; N],
    pos: usize,
}

impl<const N: usize> SyncDecoder<N> {
    /// Create an idle decoder for frames of `N` bytes opened by `sync`.
    pub const fn new(sync: u8) -> Self {
        assert!(N >= 2, "a frame needs a sync byte and a payload");
        Self {
            sync,
            buf: [0; N],
            pos: 0,
        }
    }

    /// Feed one byte; returns the frame it completes, if any.
    #[inline]
    pub fn push(&mut self, byte: u8) -> Option<[u8; N]> {
        if byte == self.sync {
            // Start of frame, or resynchronization if one was in flight.
            self.buf[0] = byte;
            self.pos = 1;
            return None;
        }
        if self.pos == 0 {
            return None;
        }

        self.buf[self.pos] = byte;
        self.pos += 1;
        if self.pos == N {
            self.pos = 0;
            return Some(self.buf);
        }
        None
    }

    /// Bytes of the frame currently in flight (0 when idle).
    pub fn pending(&self) -> usize {
        self.pos
    }

    /// True when waiting for a sync byte.
    pub fn is_idle(&self) -> bool {
        self.pos == 0
    }

    /// Drop any partial frame.
    pub fn reset(&mut self) {
        self.pos = 0;
    }

    /// The sync marker this decoder aligns on.
    pub fn sync(&self) -> u8 {
        self.sync
    }
}

/// Decoder for host → card command frames.
#[derive(Debug, Clone)]
pub struct CommandDecoder {
    inner: SyncDecoder<COMMAND_FRAME_LEN>,
}

impl CommandDecoder {
    pub const fn new() -> Self {
        Self {
            inner: SyncDecoder::new(COMMAND_SYNC),
        }
    }

    /// Feed one byte; returns the command it completes, if any.
    #[inline]
    pub fn push(&mut self, byte: u8) -> Option<OutputTargets> {
        self.inner.push(byte).map(|frame| OutputTargets::from_frame(&frame))
    }

    /// Feed a chunk of any length, yielding every command it completes.
    pub fn feed<'a>(&'a mut self, bytes: &'a [u8]) -> impl Iterator<Item = OutputTargets> + 'a {
        bytes.iter().filter_map(move |&b| self.push(b))
    }

    pub fn pending(&self) -> usize {
        self.inner.pending()
    }

    pub fn reset(&mut self) {
        self.inner.reset();
    }
}

impl Default for CommandDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decoder for card → host telemetry frames.
#[derive(Debug, Clone)]
pub struct TelemetryDecoder {
    inner: SyncDecoder<TELEMETRY_FRAME_LEN>,
}

impl TelemetryDecoder {
    pub const fn new() -> Self {
        Self {
            inner: SyncDecoder::new(TELEMETRY_SYNC),
        }
    }

    /// Feed one byte; returns the snapshot it completes, if any.
    #[inline]
    pub fn push(&mut self, byte: u8) -> Option<InputSnapshot> {
        self.inner
            .push(byte)
            .map(|frame| InputSnapshot::from_frame(&frame))
    }

    /// Feed a chunk of any length, yielding every snapshot it completes.
    pub fn feed<'a>(&'a mut self, bytes: &'a [u8]) -> impl Iterator<Item = InputSnapshot> + 'a {
        bytes.iter().filter_map(move |&b| self.push(b))
    }

    pub fn pending(&self) -> usize {
        self.inner.pending()
    }

    pub fn reset(&mut self) {
        self.inner.reset();
    }
}

impl Default for TelemetryDecoder {
    fn default() -> Self {
        Self::new()
    }
}
