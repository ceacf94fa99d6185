use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::poll;

/// Default line rate. USB CDC ACM devices ignore it, real UARTs do not.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Serial line configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Line rate in bits per second.
    pub baud: u32,
    /// Discard bytes queued by the driver before the port was opened.
    pub flush_on_open: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud: DEFAULT_BAUD,
            flush_on_open: true,
        }
    }
}

/// A TTY configured for raw 8N1 byte transfer.
///
/// The descriptor is non-blocking in both directions; waiting is done with
/// `poll(2)` so the caller controls every timeout.
pub struct SerialPort {
    file: File,
    path: PathBuf,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl SerialPort {
    /// Open a serial device with default configuration.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, &SerialConfig::default())
    }

    /// Open a serial device and switch it to raw mode.
    pub fn open_with_config(path: impl AsRef<Path>, config: &SerialConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let speed = baud_constant(config.baud)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(&path)
            .map_err(|e| TransportError::Open {
                path: path.clone(),
                source: e,
            })?;
        let fd = file.as_raw_fd();

        // SAFETY: `fd` is an open descriptor owned by `file` for this whole scope.
        if unsafe { libc::isatty(fd) } != 1 {
            return Err(TransportError::NotATerminal(path));
        }

        let open_err = |path: &Path| TransportError::Open {
            path: path.to_path_buf(),
            source: std::io::Error::last_os_error(),
        };

        // SAFETY: termios is a plain C struct; an all-zero value is valid input
        // for tcgetattr, which overwrites it.
        let mut tio: libc::termios = unsafe { std::mem::zeroed() };
        // SAFETY: `fd` is a valid terminal descriptor and `tio` is writable.
        if unsafe { libc::tcgetattr(fd, &mut tio) } != 0 {
            return Err(open_err(&path));
        }

        // SAFETY: `tio` was initialised by tcgetattr above.
        unsafe {
            libc::cfmakeraw(&mut tio);
            libc::cfsetispeed(&mut tio, speed);
            libc::cfsetospeed(&mut tio, speed);
        }
        tio.c_cflag |= libc::CLOCAL | libc::CREAD;
        tio.c_cc[libc::VMIN] = 0;
        tio.c_cc[libc::VTIME] = 0;

        // SAFETY: `fd` is a valid terminal descriptor and `tio` is fully initialised.
        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tio) } != 0 {
            return Err(open_err(&path));
        }

        if config.flush_on_open {
            // SAFETY: `fd` is a valid terminal descriptor.
            if unsafe { libc::tcflush(fd, libc::TCIFLUSH) } != 0 {
                return Err(open_err(&path));
            }
            debug!(?path, "flushed stale input");
        }

        info!(?path, baud = config.baud, "opened serial port");

        Ok(Self {
            file,
            path,
            read_timeout: None,
            write_timeout: None,
        })
    }

    /// Wait up to `timeout` for the next byte.
    pub fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>> {
        if !self.wait_readable(Some(timeout))? {
            return Ok(None);
        }

        let mut byte = [0u8; 1];
        match self.file.read(&mut byte) {
            Ok(1) => Ok(Some(byte[0])),
            // Readable but empty: the line was hung up.
            Ok(_) => Err(TransportError::Io(std::io::Error::from(
                ErrorKind::UnexpectedEof,
            ))),
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                Ok(None)
            }
            Err(err) => Err(TransportError::Io(err)),
        }
    }

    /// Write as much of `buf` as the line accepts within `timeout`.
    pub fn write_bounded(&mut self, buf: &[u8], timeout: Duration) -> Result<usize> {
        let fd = self.file.as_raw_fd();
        let file = &mut self.file;
        Ok(poll::write_within(fd, buf, timeout, |chunk| file.write(chunk))?)
    }

    /// Timeout applied by the blocking `Read` implementation (`None` blocks).
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    /// Timeout applied by the blocking `Write` implementation (`None` blocks).
    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) {
        self.write_timeout = timeout;
    }

    /// A second handle to the same open device.
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            file: self.file.try_clone()?,
            path: self.path.clone(),
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
        })
    }

    /// The device path this port was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn wait_readable(&self, timeout: Option<Duration>) -> std::io::Result<bool> {
        poll::wait(self.file.as_raw_fd(), libc::POLLIN, timeout)
    }
}

impl Read for SerialPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if !self.wait_readable(self.read_timeout)? {
            return Err(std::io::Error::from(ErrorKind::TimedOut));
        }
        self.file.read(buf)
    }
}

impl Write for SerialPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        loop {
            match self.file.write(buf) {
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if !poll::wait(self.file.as_raw_fd(), libc::POLLOUT, self.write_timeout)? {
                        return Err(std::io::Error::from(ErrorKind::TimedOut));
                    }
                }
                other => return other,
            }
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

impl std::fmt::Debug for SerialPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialPort").field("path", &self.path).finish()
    }
}

fn baud_constant(baud: u32) -> Result<libc::speed_t> {
    let speed = match baud {
        9_600 => libc::B9600,
        19_200 => libc::B19200,
        38_400 => libc::B38400,
        57_600 => libc::B57600,
        115_200 => libc::B115200,
        230_400 => libc::B230400,
        other => return Err(TransportError::UnsupportedBaud(other)),
    };
    Ok(speed)
}
