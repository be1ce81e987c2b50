/*!
 * Byte-stream transports (TCP sockets and serial lines).
 *
 * A stream carries a single channel, so a [`StreamTransport`] exposes only
 * the binary-protocol hint. Streams are obtained from a [`Connector`], the
 * native collaborator for sockets and serial ports.
 */
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use lumaflow_core::config::TransportConfig;

use crate::location::{BusFamily, Location, NetworkProtocol};

use super::{Hint, NativeError, Result, Transport, TransportError};

/// A bidirectional byte stream
pub trait ByteStream: Read + Write + Send + fmt::Debug {}

impl<T: Read + Write + Send + fmt::Debug> ByteStream for T {}

/// Opens byte streams to locations
pub trait Connector: fmt::Debug + Send + Sync {
    /// Open a stream to the location
    fn connect(&self, location: &Location) -> Result<Box<dyn ByteStream>>;
}

/// Connector for TCP locations using blocking sockets
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
    read_timeout: Option<Duration>,
}

impl TcpConnector {
    /// Create a connector with explicit timeouts; `None` reads wait indefinitely
    pub fn new(connect_timeout: Duration, read_timeout: Option<Duration>) -> Self {
        Self {
            connect_timeout,
            read_timeout,
        }
    }

    /// Create a connector from the transport configuration section
    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(config.connect_timeout(), config.read_timeout())
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::from_config(&TransportConfig::default())
    }
}

impl Connector for TcpConnector {
    fn connect(&self, location: &Location) -> Result<Box<dyn ByteStream>> {
        let network = match location {
            Location::Network(network) => network,
            other => {
                return Err(TransportError::IncompatibleLocation {
                    location: other.to_string(),
                    expected: BusFamily::Network,
                })
            }
        };
        if network.protocol() != NetworkProtocol::Tcp {
            return Err(TransportError::Unsupported(format!(
                "{} streams are not supported",
                network.protocol().scheme()
            )));
        }

        let mut last_error = None;
        for addr in (network.address(), network.port()).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(self.read_timeout)?;
                    stream.set_nodelay(true)?;
                    debug!("Connected to {}", addr);
                    return Ok(Box::new(stream));
                }
                Err(e) => {
                    debug!("Connection to {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(e) => e.into(),
            None => TransportError::Unsupported(format!("{} resolved to no address", location)),
        })
    }
}

/// Connector for serial locations using the `serialport` crate
#[cfg(feature = "serial")]
#[derive(Debug, Clone)]
pub struct SerialConnector {
    read_timeout: Duration,
}

#[cfg(feature = "serial")]
impl SerialConnector {
    // serialport needs a finite timeout; a day stands in for an indefinite wait
    const INDEFINITE: Duration = Duration::from_secs(24 * 60 * 60);

    /// Create a connector from the transport configuration section
    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            read_timeout: config.read_timeout().unwrap_or(Self::INDEFINITE),
        }
    }
}

#[cfg(feature = "serial")]
struct SerialStream(Box<dyn serialport::SerialPort>);

#[cfg(feature = "serial")]
impl fmt::Debug for SerialStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SerialStream").field(&self.0.name()).finish()
    }
}

#[cfg(feature = "serial")]
impl Read for SerialStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }
}

#[cfg(feature = "serial")]
impl Write for SerialStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

#[cfg(feature = "serial")]
impl Connector for SerialConnector {
    fn connect(&self, location: &Location) -> Result<Box<dyn ByteStream>> {
        let serial = match location {
            Location::Serial(serial) => serial,
            other => {
                return Err(TransportError::IncompatibleLocation {
                    location: other.to_string(),
                    expected: BusFamily::Serial,
                })
            }
        };
        let port = serialport::new(serial.path(), serial.baud_rate())
            .timeout(self.read_timeout)
            .open()
            .map_err(|e| TransportError::Io(e.into()))?;
        Ok(Box::new(SerialStream(port)))
    }
}

/// Connector for a bus family this build cannot reach
#[derive(Debug, Clone)]
pub struct UnsupportedConnector {
    reason: String,
}

impl UnsupportedConnector {
    /// Create a connector that refuses every location with `reason`
    pub fn new<S: Into<String>>(reason: S) -> Self {
        Self { reason: reason.into() }
    }
}

impl Connector for UnsupportedConnector {
    fn connect(&self, location: &Location) -> Result<Box<dyn ByteStream>> {
        Err(TransportError::Unsupported(format!("{}: {}", location, self.reason)))
    }
}

/// Transport over a TCP socket or serial line
pub struct StreamTransport {
    family: BusFamily,
    connector: Arc<dyn Connector>,
    location: Option<Location>,
    stream: Option<Box<dyn ByteStream>>,
    hints: Vec<Hint>,
}

impl fmt::Debug for StreamTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamTransport")
            .field("family", &self.family)
            .field("location", &self.location)
            .field("open", &self.stream.is_some())
            .finish()
    }
}

impl StreamTransport {
    /// Create an unbound network transport
    pub fn network(connector: Arc<dyn Connector>) -> Self {
        Self::new(BusFamily::Network, connector)
    }

    /// Create an unbound serial transport
    pub fn serial(connector: Arc<dyn Connector>) -> Self {
        Self::new(BusFamily::Serial, connector)
    }

    fn new(family: BusFamily, connector: Arc<dyn Connector>) -> Self {
        Self {
            family,
            connector,
            location: None,
            stream: None,
            hints: Vec::new(),
        }
    }

    fn stream(&mut self, hint: Hint) -> Result<&mut Box<dyn ByteStream>> {
        if !self.hints.contains(&hint) {
            return Err(TransportError::NoSuchHint(hint));
        }
        self.stream
            .as_mut()
            .ok_or_else(|| TransportError::NotReady("stream is not open".to_string()))
    }
}

impl Transport for StreamTransport {
    fn bus_family(&self) -> BusFamily {
        self.family
    }

    fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }

    fn set_location(&mut self, location: &Location) -> Result<()> {
        if location.bus_family() != self.family {
            return Err(TransportError::IncompatibleLocation {
                location: location.to_string(),
                expected: self.family,
            });
        }
        if self.stream.is_some() {
            return Err(TransportError::NotReady(
                "cannot rebind an open stream transport".to_string(),
            ));
        }
        self.location = Some(location.clone());
        self.hints = vec![Hint::Binary];
        Ok(())
    }

    fn open(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let location = self
            .location
            .as_ref()
            .ok_or_else(|| TransportError::NotReady("stream transport is unbound".to_string()))?;
        let stream = self.connector.connect(location)?;
        info!("Opened stream to {}", location);
        self.stream = Some(stream);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.flush() {
                warn!("Failed to flush stream on close: {}", e);
            }
            debug!("Closed stream transport");
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn hints(&self) -> Vec<Hint> {
        self.hints.clone()
    }

    fn write(&mut self, hint: Hint, data: &[u8]) -> Result<usize> {
        let stream = self.stream(hint)?;
        stream.write_all(data)?;
        stream.flush()?;
        debug!(len = data.len(), "Stream write");
        Ok(data.len())
    }

    fn read(&mut self, hint: Hint, buf: &mut [u8]) -> Result<usize> {
        let stream = self.stream(hint)?;
        let read = stream.read(buf).map_err(read_error)?;
        debug!(len = read, "Stream read");
        Ok(read)
    }
}

/// Report an expired read timeout the way native transports do
fn read_error(error: io::Error) -> TransportError {
    match error.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
            NativeError::new(NativeError::TIMEOUT, error.to_string()).into()
        }
        _ => error.into(),
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.close();
    }
}
