use std::io::{ErrorKind, Read};

use bytes::{Buf, BytesMut};
use tracing::debug;

use crate::codec::{InputSnapshot, OutputTargets};
use crate::decoder::{CommandDecoder, TelemetryDecoder};
use crate::error::{FrameError, Result};

const READ_CHUNK_SIZE: usize = 256;

/// Reads complete frames from any `Read` stream.
///
/// Handles partial reads, leading garbage and corrupted frames internally;
/// callers only ever see complete frames. Bytes read past the end of a frame
/// are kept for the next call.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    commands: CommandDecoder,
    telemetry: TelemetryDecoder,
}

impl<T: Read> FrameReader<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
            commands: CommandDecoder::new(),
            telemetry: TelemetryDecoder::new(),
        }
    }

    /// Read the next telemetry frame (blocking, host side).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_telemetry(&mut self) -> Result<InputSnapshot> {
        loop {
            while self.buf.has_remaining() {
                if let Some(snapshot) = self.telemetry.push(self.buf.get_u8()) {
                    return Ok(snapshot);
                }
            }
            self.fill()?;
        }
    }

    /// Read the next command frame (blocking, card side).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_command(&mut self) -> Result<OutputTargets> {
        loop {
            while self.buf.has_remaining() {
                if let Some(targets) = self.commands.push(self.buf.get_u8()) {
                    return Ok(targets);
                }
            }
            self.fill()?;
        }
    }

    fn fill(&mut self) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            match self.inner.read(&mut chunk) {
                Ok(0) => {
                    debug!(
                        partial_command = self.commands.pending(),
                        partial_telemetry = self.telemetry.pending(),
                        "stream closed"
                    );
                    return Err(FrameError::ConnectionClosed);
                }
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    return Ok(());
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}
