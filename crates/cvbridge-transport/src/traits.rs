use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use crate::error::{Result, TransportError};

/// A byte pipe with a bounded-wait single-byte read.
///
/// This is the only transport surface the host loop needs: it polls for one
/// byte at a time with a short timeout and occasionally writes a whole frame.
pub trait ByteTransport {
    /// Wait up to `timeout` for the next byte.
    ///
    /// `Ok(None)` means the wait elapsed with nothing to read. That is a normal
    /// outcome, not an error.
    fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>>;

    /// Write every byte of `buf`.
    fn write_all(&mut self, buf: &[u8]) -> Result<()>;

    /// Write as much of `buf` as the link accepts within `timeout`.
    ///
    /// Returns the number of bytes written. A short count is not an error: it
    /// means the far end is not draining the link. A zero timeout never waits.
    fn write_bounded(&mut self, buf: &[u8], timeout: Duration) -> Result<usize>;

    /// Transport name for diagnostics.
    fn transport_name(&self) -> &'static str;
}

impl<T: ByteTransport + ?Sized> ByteTransport for &mut T {
    fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>> {
        (**self).read_byte(timeout)
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        (**self).write_all(buf)
    }

    fn write_bounded(&mut self, buf: &[u8], timeout: Duration) -> Result<usize> {
        (**self).write_bounded(buf, timeout)
    }

    fn transport_name(&self) -> &'static str {
        (**self).transport_name()
    }
}

/// A connected card/host link.
///
/// Wraps either a serial TTY or one end of a virtual port.
pub struct BridgeStream {
    inner: BridgeStreamInner,
}

enum BridgeStreamInner {
    #[cfg(unix)]
    Socket(std::os::unix::net::UnixStream),
    #[cfg(unix)]
    Serial(crate::serial::SerialPort),
}

impl BridgeStream {
    /// Create a stream from a connected Unix domain socket.
    #[cfg(unix)]
    pub fn from_socket(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: BridgeStreamInner::Socket(stream),
        }
    }

    /// Create a stream from an opened serial port.
    #[cfg(unix)]
    pub fn from_serial(port: crate::serial::SerialPort) -> Self {
        Self {
            inner: BridgeStreamInner::Serial(port),
        }
    }

    /// A connected pair of in-process streams, one per link end.
    #[cfg(unix)]
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = std::os::unix::net::UnixStream::pair()?;
        Ok((Self::from_socket(left), Self::from_socket(right)))
    }

    /// A second handle to the same link, e.g. for a reader and a writer thread.
    ///
    /// Socket timeouts are shared between handles, including the one
    /// [`ByteTransport::read_byte`] installs on every call.
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            #[cfg(unix)]
            BridgeStreamInner::Socket(stream) => Ok(Self::from_socket(stream.try_clone()?)),
            #[cfg(unix)]
            BridgeStreamInner::Serial(port) => Ok(Self::from_serial(port.try_clone()?)),
        }
    }

    /// Set a write timeout for the blocking `Write` implementation.
    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            BridgeStreamInner::Socket(stream) => {
                stream.set_write_timeout(timeout).map_err(Into::into)
            }
            #[cfg(unix)]
            BridgeStreamInner::Serial(port) => {
                port.set_write_timeout(timeout);
                Ok(())
            }
        }
    }

    /// Set a read timeout for the blocking `Read` implementation.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            BridgeStreamInner::Socket(stream) => {
                stream.set_read_timeout(timeout).map_err(Into::into)
            }
            #[cfg(unix)]
            BridgeStreamInner::Serial(port) => {
                port.set_read_timeout(timeout);
                Ok(())
            }
        }
    }
}

impl ByteTransport for BridgeStream {
    fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>> {
        match &mut self.inner {
            #[cfg(unix)]
            BridgeStreamInner::Socket(stream) => {
                // Set on every call: a clone may have changed the shared timeout.
                // A zero timeout means "block forever" to setsockopt.
                stream.set_read_timeout(Some(timeout.max(Duration::from_micros(1))))?;

                let mut byte = [0u8; 1];
                match stream.read(&mut byte) {
                    Ok(0) => Err(TransportError::Io(std::io::Error::from(
                        ErrorKind::UnexpectedEof,
                    ))),
                    Ok(_) => Ok(Some(byte[0])),
                    Err(err)
                        if matches!(
                            err.kind(),
                            ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                        ) =>
                    {
                        Ok(None)
                    }
                    Err(err) => Err(TransportError::Io(err)),
                }
            }
            #[cfg(unix)]
            BridgeStreamInner::Serial(port) => port.read_byte(timeout),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        Write::write_all(self, buf)?;
        Ok(())
    }

    fn write_bounded(&mut self, buf: &[u8], timeout: Duration) -> Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            BridgeStreamInner::Socket(stream) => {
                use std::os::fd::AsRawFd;

                let fd = stream.as_raw_fd();
                Ok(crate::poll::write_within(fd, buf, timeout, |chunk| {
                    send_nonblocking(fd, chunk)
                })?)
            }
            #[cfg(unix)]
            BridgeStreamInner::Serial(port) => port.write_bounded(buf, timeout),
        }
    }

    fn transport_name(&self) -> &'static str {
        match &self.inner {
            #[cfg(unix)]
            BridgeStreamInner::Socket(_) => "virtual-port",
            #[cfg(unix)]
            BridgeStreamInner::Serial(_) => "serial",
        }
    }
}

impl Read for BridgeStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            BridgeStreamInner::Socket(stream) => stream.read(buf),
            #[cfg(unix)]
            BridgeStreamInner::Serial(port) => port.read(buf),
        }
    }
}

impl Write for BridgeStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            BridgeStreamInner::Socket(stream) => stream.write(buf),
            #[cfg(unix)]
            BridgeStreamInner::Serial(port) => port.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            BridgeStreamInner::Socket(stream) => stream.flush(),
            #[cfg(unix)]
            BridgeStreamInner::Serial(port) => port.flush(),
        }
    }
}

/// `send(2)` that fails with `WouldBlock` instead of waiting, without
/// switching the shared descriptor to non-blocking mode.
#[cfg(unix)]
fn send_nonblocking(fd: std::os::fd::RawFd, buf: &[u8]) -> std::io::Result<usize> {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    const FLAGS: libc::c_int = libc::MSG_DONTWAIT | libc::MSG_NOSIGNAL;
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    const FLAGS: libc::c_int = libc::MSG_DONTWAIT;

    // SAFETY: `buf` is valid for `buf.len()` bytes and `fd` is an open socket
    // owned by the calling stream for the duration of the call.
    let rc = unsafe { libc::send(fd, buf.as_ptr().cast(), buf.len(), FLAGS) };
    if rc < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(rc as usize)
}

impl std::fmt::Debug for BridgeStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeStream")
            .field("type", &self.transport_name())
            .finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn read_byte_times_out_without_data() {
        let (mut card, _host) = BridgeStream::pair().unwrap();
        let got = card.read_byte(Duration::from_millis(5)).unwrap();
        assert_eq!(got, None);
    }

    #[test]
    fn read_byte_returns_bytes_in_order() {
        let (mut card, mut host) = BridgeStream::pair().unwrap();
        ByteTransport::write_all(&mut host, &[0xC0, 0x01, 0x02]).unwrap();

        let timeout = Duration::from_millis(50);
        assert_eq!(card.read_byte(timeout).unwrap(), Some(0xC0));
        assert_eq!(card.read_byte(timeout).unwrap(), Some(0x01));
        assert_eq!(card.read_byte(timeout).unwrap(), Some(0x02));
        assert_eq!(card.read_byte(Duration::from_millis(1)).unwrap(), None);
    }

    #[test]
    fn read_byte_reports_peer_hangup_as_disconnect() {
        let (mut card, host) = BridgeStream::pair().unwrap();
        drop(host);
        let err = card.read_byte(Duration::from_millis(50)).unwrap_err();
        assert!(err.is_disconnect());
    }

    #[test]
    fn cloned_stream_shares_the_link() {
        let (card, mut host) = BridgeStream::pair().unwrap();
        let mut card_writer = card.try_clone().unwrap();
        let mut card_reader = card;

        ByteTransport::write_all(&mut card_writer, &[0xC1]).unwrap();
        assert_eq!(host.read_byte(Duration::from_millis(50)).unwrap(), Some(0xC1));

        ByteTransport::write_all(&mut host, &[0xC0]).unwrap();
        assert_eq!(
            card_reader.read_byte(Duration::from_millis(50)).unwrap(),
            Some(0xC0)
        );
    }

    #[test]
    fn read_byte_ignores_timeout_set_through_a_clone() {
        let (mut card, _host) = BridgeStream::pair().unwrap();
        assert_eq!(card.read_byte(Duration::from_millis(5)).unwrap(), None);

        let mut other = card.try_clone().unwrap();
        other.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        let start = Instant::now();
        assert_eq!(card.read_byte(Duration::from_millis(5)).unwrap(), None);
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn bounded_write_returns_when_peer_stops_reading() {
        let (mut card, _host) = BridgeStream::pair().unwrap();
        let frame = [0xC1; 16];

        let mut short = None;
        for _ in 0..1_000_000 {
            let written = card.write_bounded(&frame, Duration::ZERO).unwrap();
            if written < frame.len() {
                short = Some(written);
                break;
            }
        }
        assert!(short.is_some(), "socket buffer never filled");

        let start = Instant::now();
        let written = card.write_bounded(&frame, Duration::from_millis(20)).unwrap();
        assert!(written < frame.len());
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn bounded_write_delivers_whole_frame_to_a_reader() {
        let (mut card, mut host) = BridgeStream::pair().unwrap();
        let written = card
            .write_bounded(&[0xC1, 1, 2, 3], Duration::ZERO)
            .unwrap();
        assert_eq!(written, 4);

        let mut buf = [0u8; 4];
        host.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [0xC1, 1, 2, 3]);
    }

    #[test]
    fn bounded_write_to_closed_peer_is_disconnect() {
        let (mut card, host) = BridgeStream::pair().unwrap();
        drop(host);
        let err = card.write_bounded(&[0xC1], Duration::ZERO).unwrap_err();
        assert!(err.is_disconnect());
    }

    #[test]
    fn zero_timeout_does_not_block_forever() {
        let (mut card, _host) = BridgeStream::pair().unwrap();
        assert_eq!(card.read_byte(Duration::ZERO).unwrap(), None);
    }

    #[test]
    fn mutable_reference_is_a_transport() {
        fn name_of<T: ByteTransport>(t: T) -> &'static str {
            t.transport_name()
        }
        let (mut card, _host) = BridgeStream::pair().unwrap();
        assert_eq!(name_of(&mut card), "virtual-port");
        assert!(format!("{card:?}").contains("virtual-port"));
    }
}
