/// Errors that can occur in the card-side runtime.
///
/// The real-time path has no error type: sampling cannot fail. Everything here
/// comes from the I/O context or from starting the sample clock.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// Transport-level error (host gone, I/O failure).
    #[error("transport error: {0}")]
    Transport(#[from] cvbridge_transport::TransportError),

    /// The sample clock thread could not be started or did not stop cleanly.
    #[error("sample clock error: {0}")]
    Clock(String),
}

impl DeviceError {
    /// Returns true when the host side of the link has gone away.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, DeviceError::Transport(err) if err.is_disconnect())
    }
}

pub type Result<T> = std::result::Result<T, DeviceError>;
