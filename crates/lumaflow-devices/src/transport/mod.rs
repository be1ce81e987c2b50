/*!
 * Transports.
 *
 * A [`Transport`] is an open/close/read/write channel bound to one
 * [`Location`]. Protocol exchanges address it through [`Hint`]s, each of
 * which routes to at most one transfer helper (a pair of USB endpoints, or
 * the single byte stream of a socket or serial line).
 *
 * Transports that can enumerate their bus expose it through
 * [`Transport::as_probeable`] rather than through downcasting.
 */
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::location::{BusFamily, Location};

pub mod stream;
pub mod usb;

pub use stream::{ByteStream, Connector, StreamTransport, TcpConnector, UnsupportedConnector};
pub use usb::{EndpointPair, NullUsbBackend, UsbBackend, UsbHandle, UsbTransport};

#[cfg(feature = "serial")]
pub use stream::SerialConnector;

/// Routing key naming the transfer channel an exchange needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hint {
    /// Legacy command/response channel
    Control,
    /// Legacy bulk spectrum channel
    Spectrum,
    /// Length-framed binary protocol channel
    Binary,
}

impl fmt::Display for Hint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Hint::Control => "control",
            Hint::Spectrum => "spectrum",
            Hint::Binary => "binary",
        };
        f.write_str(name)
    }
}

/// Error reported by a native transport collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Native error {code}: {message}")]
pub struct NativeError {
    /// Implementation-defined numeric code
    pub code: i32,
    /// Human readable detail
    pub message: String,
}

impl NativeError {
    /// Generic I/O failure
    pub const IO: i32 = -1;
    /// The device is gone
    pub const NO_DEVICE: i32 = -4;
    /// The handle is not (or no longer) valid
    pub const INVALID_HANDLE: i32 = -5;
    /// The operation timed out
    pub const TIMEOUT: i32 = -7;
    /// The endpoint stalled
    pub const PIPE: i32 = -9;

    /// Create a native error
    pub fn new<S: Into<String>>(code: i32, message: S) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Whether the error is a timeout
    pub fn is_timeout(&self) -> bool {
        self.code == Self::TIMEOUT
    }
}

/// Error type for transport operations
#[derive(Error, Debug)]
pub enum TransportError {
    /// The transport is unbound or not open
    #[error("Transport not ready: {0}")]
    NotReady(String),

    /// A location of the wrong bus family was bound
    #[error("Incompatible location {location}: transport serves {expected} buses")]
    IncompatibleLocation {
        /// The rejected location
        location: String,
        /// The bus family the transport serves
        expected: BusFamily,
    },

    /// The transport has no transfer helper for the hint
    #[error("No transfer channel for hint {0}")]
    NoSuchHint(Hint),

    /// The location is valid but this transport cannot serve it
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Fewer bytes were moved than required
    #[error("Short transfer: expected {expected} bytes, moved {actual}")]
    ShortTransfer {
        /// Bytes required
        expected: usize,
        /// Bytes actually moved
        actual: usize,
    },

    /// Native collaborator failure
    #[error(transparent)]
    Native(#[from] NativeError),

    /// Stream I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether the transfer gave up waiting for data
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Native(native) if native.is_timeout())
    }
}

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

/// A transport that can enumerate devices on its bus
pub trait Probeable {
    /// Locations currently observable on the bus
    ///
    /// Enumeration only: implementations must not open or claim devices.
    fn probe_devices(&self) -> Result<Vec<Location>>;
}

/// An open/close/read/write channel bound to one location
///
/// Each transport is exclusively owned by one device. Opening and closing
/// are idempotent; transfers on a closed transport fail with
/// [`TransportError::NotReady`].
pub trait Transport: fmt::Debug + Send {
    /// The bus family this transport serves
    fn bus_family(&self) -> BusFamily;

    /// The bound location, if any
    fn location(&self) -> Option<&Location>;

    /// Bind a location and build the hint map
    ///
    /// A location of another bus family is rejected and leaves the transport
    /// unbound.
    fn set_location(&mut self, location: &Location) -> Result<()>;

    /// Acquire the native resource
    fn open(&mut self) -> Result<()>;

    /// Release the native resource
    fn close(&mut self);

    /// Whether the native resource is held
    fn is_open(&self) -> bool;

    /// Hints with a transfer helper on this transport
    fn hints(&self) -> Vec<Hint>;

    /// Whether the hint has a transfer helper
    fn supports_hint(&self, hint: Hint) -> bool {
        self.hints().contains(&hint)
    }

    /// Write bytes on the channel routed by `hint`
    fn write(&mut self, hint: Hint, data: &[u8]) -> Result<usize>;

    /// Read up to `buf.len()` bytes from the channel routed by `hint`
    ///
    /// Returns the number of bytes read; zero means the channel has ended.
    fn read(&mut self, hint: Hint, buf: &mut [u8]) -> Result<usize>;

    /// Clear a stall condition on the channel routed by `hint`
    fn clear_stall(&mut self, _hint: Hint) -> Result<()> {
        Ok(())
    }

    /// The probing capability of this transport, if it has one
    fn as_probeable(&self) -> Option<&dyn Probeable> {
        None
    }
}

/// Write all of `data`, reporting a short transfer otherwise
pub fn write_all(transport: &mut dyn Transport, hint: Hint, data: &[u8]) -> Result<()> {
    let written = transport.write(hint, data)?;
    if written != data.len() {
        return Err(TransportError::ShortTransfer {
            expected: data.len(),
            actual: written,
        });
    }
    Ok(())
}

/// Fill `buf` completely, reporting a short transfer if the channel ends first
pub fn read_exact(transport: &mut dyn Transport, hint: Hint, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = transport.read(hint, &mut buf[filled..])?;
        if n == 0 {
            return Err(TransportError::ShortTransfer {
                expected: buf.len(),
                actual: filled,
            });
        }
        filled += n;
    }
    Ok(())
}
