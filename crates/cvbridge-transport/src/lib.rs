//! Byte transports for the cvbridge serial link.
//!
//! The card and the host exchange an unframed byte stream. This crate hides
//! where those bytes travel:
//! - [`SerialPort`]: a TTY (USB CDC ACM device or pseudo-terminal)
//! - [`VirtualPort`]: a Unix domain socket standing in for a serial cable
//!
//! Both produce a [`BridgeStream`], which implements [`ByteTransport`] as well
//! as `Read + Write`. Everything above this layer is transport-agnostic.

pub mod error;
pub mod traits;

#[cfg(unix)]
mod poll;
#[cfg(unix)]
pub mod serial;
#[cfg(unix)]
pub mod virtual_port;

pub use error::{Result, TransportError};
pub use traits::{BridgeStream, ByteTransport};

#[cfg(unix)]
pub use serial::{SerialConfig, SerialPort, DEFAULT_BAUD};
#[cfg(unix)]
pub use virtual_port::VirtualPort;
