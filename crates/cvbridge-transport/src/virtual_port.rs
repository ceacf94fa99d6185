use std::os::fd::AsRawFd;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::poll;
use crate::traits::BridgeStream;

/// A serial cable emulated over a Unix domain socket.
///
/// The simulated card binds the port and accepts one host at a time; host
/// tools connect to it. Bytes are delivered unframed, exactly as a TTY would.
pub struct VirtualPort {
    listener: UnixListener,
    path: PathBuf,
    /// `(dev, ino)` of the socket file we created; only that file is removed on drop.
    identity: (u64, u64),
}

impl VirtualPort {
    /// Permission mode for created socket files.
    pub const SOCKET_MODE: u32 = 0o600;

    /// `sockaddr_un.sun_path` capacity.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind the card end of a virtual port at `path`.
    ///
    /// A stale socket left by a previous run is replaced; any other kind of
    /// file at `path` is an error.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let bind_err = |source: std::io::Error| TransportError::Bind {
            path: path.clone(),
            source,
        };

        let len = path.as_os_str().len();
        if len >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len,
                max: Self::MAX_PATH_LEN,
            });
        }

        match std::fs::symlink_metadata(&path) {
            Ok(meta) if meta.file_type().is_socket() => {
                debug!(?path, "replacing stale virtual port");
                std::fs::remove_file(&path).map_err(bind_err)?;
            }
            Ok(_) => {
                return Err(bind_err(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                )));
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(bind_err(err)),
        }

        let listener = UnixListener::bind(&path).map_err(bind_err)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(Self::SOCKET_MODE))
            .map_err(bind_err)?;
        let meta = std::fs::symlink_metadata(&path).map_err(bind_err)?;

        info!(?path, "virtual port ready");

        Ok(Self {
            listener,
            path,
            identity: (meta.dev(), meta.ino()),
        })
    }

    /// Accept the next host connection (blocking).
    pub fn accept(&self) -> Result<BridgeStream> {
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(path = ?self.path, "host attached");
        Ok(BridgeStream::from_socket(stream))
    }

    /// Accept the next host connection, giving up after `timeout`.
    ///
    /// Lets a caller interleave waiting for a host with checking a shutdown flag.
    pub fn accept_timeout(&self, timeout: Duration) -> Result<Option<BridgeStream>> {
        let ready = poll::wait(self.listener.as_raw_fd(), libc::POLLIN, Some(timeout))
            .map_err(TransportError::Accept)?;
        if !ready {
            return Ok(None);
        }
        self.accept().map(Some)
    }

    /// Connect the host end to a bound virtual port.
    pub fn connect(path: impl AsRef<Path>) -> Result<BridgeStream> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).map_err(|e| TransportError::Connect {
            path: path.to_path_buf(),
            source: e,
        })?;
        debug!(?path, "connected to virtual port");
        Ok(BridgeStream::from_socket(stream))
    }

    /// The path this port is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for VirtualPort {
    fn drop(&mut self) {
        let Ok(meta) = std::fs::symlink_metadata(&self.path) else {
            return;
        };
        if meta.file_type().is_socket() && (meta.dev(), meta.ino()) == self.identity {
            debug!(path = ?self.path, "removing virtual port");
            let _ = std::fs::remove_file(&self.path);
        } else {
            debug!(path = ?self.path, "virtual port path replaced; leaving it");
        }
    }
}

impl std::fmt::Debug for VirtualPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualPort").field("path", &self.path).finish()
    }
}
