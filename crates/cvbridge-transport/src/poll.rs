//! `poll(2)` waits shared by the unix backends.

use std::io::{self, ErrorKind};
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

/// Wait up to `timeout` (`None` waits forever) for `events` on `fd`.
///
/// Returns `Ok(false)` when the wait elapsed or a signal interrupted it.
pub(crate) fn wait(fd: RawFd, events: libc::c_short, timeout: Option<Duration>) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };
    let millis = timeout.map_or(-1, millis);

    // SAFETY: `pfd` is a valid pollfd and we pass a count of exactly one.
    let rc = unsafe { libc::poll(&mut pfd, 1, millis) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    if rc == 0 {
        return Ok(false);
    }
    if pfd.revents & events == 0
        && pfd.revents & (libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0
    {
        return Err(io::Error::from(ErrorKind::ConnectionReset));
    }
    Ok(true)
}

/// Round a timeout up to whole milliseconds; poll(2) has no finer resolution.
pub(crate) fn millis(timeout: Duration) -> libc::c_int {
    timeout
        .as_micros()
        .div_ceil(1000)
        .min(libc::c_int::MAX as u128) as libc::c_int
}

/// Push `buf` through the non-blocking `attempt` until it is written or
/// `timeout` runs out. Returns the number of bytes written.
///
/// A zero timeout makes exactly one pass: whatever the link accepts right now.
pub(crate) fn write_within(
    fd: RawFd,
    buf: &[u8],
    timeout: Duration,
    mut attempt: impl FnMut(&[u8]) -> io::Result<usize>,
) -> io::Result<usize> {
    let deadline = Instant::now() + timeout;
    let mut written = 0;

    while written < buf.len() {
        match attempt(&buf[written..]) {
            Ok(0) => return Err(io::Error::from(ErrorKind::WriteZero)),
            Ok(n) => written += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() || !wait(fd, libc::POLLOUT, Some(remaining))? {
                    break;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Ok(written)
}
