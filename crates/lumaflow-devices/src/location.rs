/*!
 * Device locations.
 *
 * A [`Location`] says where an instrument sits on one kind of bus. It is a
 * plain value: cloning it never shares transport resources, and its identity
 * is the pair of bus family and unique location hash.
 */
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The family of bus a location belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusFamily {
    /// Universal Serial Bus
    Usb,
    /// IP network (TCP or UDP)
    Network,
    /// RS-232 style serial line
    Serial,
}

impl fmt::Display for BusFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BusFamily::Usb => "usb",
            BusFamily::Network => "network",
            BusFamily::Serial => "serial",
        };
        f.write_str(name)
    }
}

/// IP transport protocol of a network location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkProtocol {
    /// Stream socket
    Tcp,
    /// Datagram socket
    Udp,
}

impl NetworkProtocol {
    /// URI scheme used when rendering locations
    pub fn scheme(&self) -> &'static str {
        match self {
            NetworkProtocol::Tcp => "tcp",
            NetworkProtocol::Udp => "udp",
        }
    }
}

/// Location of a USB device, as assigned by the native USB stack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbLocation {
    device_id: u64,
}

impl UsbLocation {
    /// Create a USB location from the opaque bus-assigned identifier
    pub fn new(device_id: u64) -> Self {
        Self { device_id }
    }

    /// The opaque bus-assigned identifier
    pub fn device_id(&self) -> u64 {
        self.device_id
    }
}

/// Location of a network-attached device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkLocation {
    protocol: NetworkProtocol,
    address: String,
    port: u16,
}

impl NetworkLocation {
    /// Create a network location
    pub fn new<S: Into<String>>(protocol: NetworkProtocol, address: S, port: u16) -> Self {
        Self {
            protocol,
            address: address.into(),
            port,
        }
    }

    /// The IP transport protocol
    pub fn protocol(&self) -> NetworkProtocol {
        self.protocol
    }

    /// Host name or IP address
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Port number
    pub fn port(&self) -> u16 {
        self.port
    }
}

/// Location of a serial-attached device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialLocation {
    path: String,
    baud_rate: u32,
}

impl SerialLocation {
    /// Baud rate assumed when a location string does not name one
    pub const DEFAULT_BAUD_RATE: u32 = 115_200;

    /// Create a serial location
    pub fn new<S: Into<String>>(path: S, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
        }
    }

    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Line speed
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

/// Error raised when a location string cannot be parsed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid location {input:?}: {reason}")]
pub struct LocationError {
    /// The text that failed to parse
    pub input: String,
    /// Why it failed
    pub reason: String,
}

impl LocationError {
    fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

/// Where a device lives
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "bus", rename_all = "snake_case")]
pub enum Location {
    /// A USB slot
    Usb(UsbLocation),
    /// An address, port and IP protocol
    Network(NetworkLocation),
    /// A serial device path and line speed
    Serial(SerialLocation),
}

impl Location {
    /// Shorthand for a USB location
    pub fn usb(device_id: u64) -> Self {
        Location::Usb(UsbLocation::new(device_id))
    }

    /// Shorthand for a TCP location
    pub fn tcp<S: Into<String>>(address: S, port: u16) -> Self {
        Location::Network(NetworkLocation::new(NetworkProtocol::Tcp, address, port))
    }

    /// Shorthand for a serial location
    pub fn serial<S: Into<String>>(path: S, baud_rate: u32) -> Self {
        Location::Serial(SerialLocation::new(path, baud_rate))
    }

    /// The bus family this location belongs to
    pub fn bus_family(&self) -> BusFamily {
        match self {
            Location::Usb(_) => BusFamily::Usb,
            Location::Network(_) => BusFamily::Network,
            Location::Serial(_) => BusFamily::Serial,
        }
    }

    /// A hash of the descriptive fields
    ///
    /// For USB this is the bus-assigned identifier itself. For the other
    /// families it is a deterministic hash, stable for the process lifetime.
    pub fn unique_location(&self) -> u64 {
        match self {
            Location::Usb(usb) => usb.device_id,
            Location::Network(net) => {
                let mut hasher = DefaultHasher::new();
                net.protocol.hash(&mut hasher);
                net.address.to_ascii_lowercase().hash(&mut hasher);
                net.port.hash(&mut hasher);
                hasher.finish()
            }
            Location::Serial(serial) => {
                let mut hasher = DefaultHasher::new();
                serial.path.hash(&mut hasher);
                serial.baud_rate.hash(&mut hasher);
                hasher.finish()
            }
        }
    }

    /// Parse a location string, using `default_baud_rate` for serial
    /// locations that do not name a line speed
    ///
    /// Accepted forms: `usb:<id>` (decimal or `0x` hex), `tcp://<host>:<port>`,
    /// `udp://<host>:<port>`, `serial:<path>[@<baud>]`.
    pub fn parse(input: &str, default_baud_rate: u32) -> Result<Self, LocationError> {
        let input = input.trim();

        if let Some(rest) = input.strip_prefix("tcp://") {
            return parse_network(input, rest, NetworkProtocol::Tcp);
        }
        if let Some(rest) = input.strip_prefix("udp://") {
            return parse_network(input, rest, NetworkProtocol::Udp);
        }
        if let Some(rest) = input.strip_prefix("usb:") {
            let parsed = match rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
                Some(hex) => u64::from_str_radix(hex, 16),
                None => rest.parse::<u64>(),
            };
            return parsed
                .map(Location::usb)
                .map_err(|e| LocationError::new(input, format!("bad USB id: {}", e)));
        }
        if let Some(rest) = input.strip_prefix("serial:") {
            let (path, baud_rate) = match rest.rsplit_once('@') {
                Some((path, baud)) => {
                    let baud = baud
                        .parse::<u32>()
                        .map_err(|e| LocationError::new(input, format!("bad baud rate: {}", e)))?;
                    (path, baud)
                }
                None => (rest, default_baud_rate),
            };
            if path.is_empty() {
                return Err(LocationError::new(input, "empty serial path"));
            }
            if baud_rate == 0 {
                return Err(LocationError::new(input, "baud rate must be non-zero"));
            }
            return Ok(Location::serial(path, baud_rate));
        }

        Err(LocationError::new(
            input,
            "expected one of usb:, tcp://, udp:// or serial:",
        ))
    }
}

fn parse_network(input: &str, rest: &str, protocol: NetworkProtocol) -> Result<Location, LocationError> {
    let (host, port) = rest
        .rsplit_once(':')
        .ok_or_else(|| LocationError::new(input, "missing port"))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(LocationError::new(input, "empty host"));
    }
    let port = port
        .parse::<u16>()
        .map_err(|e| LocationError::new(input, format!("bad port: {}", e)))?;
    Ok(Location::Network(NetworkLocation::new(protocol, host, port)))
}

impl PartialEq for Location {
    fn eq(&self, other: &Self) -> bool {
        self.bus_family() == other.bus_family() && self.unique_location() == other.unique_location()
    }
}

impl Eq for Location {}

impl Hash for Location {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bus_family().hash(state);
        self.unique_location().hash(state);
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Usb(usb) => write!(f, "usb:{}", usb.device_id),
            Location::Network(net) if net.address.contains(':') => {
                write!(f, "{}://[{}]:{}", net.protocol.scheme(), net.address, net.port)
            }
            Location::Network(net) => {
                write!(f, "{}://{}:{}", net.protocol.scheme(), net.address, net.port)
            }
            Location::Serial(serial) => write!(f, "serial:{}@{}", serial.path, serial.baud_rate),
        }
    }
}

impl FromStr for Location {
    type Err = LocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Location::parse(s, SerialLocation::DEFAULT_BAUD_RATE)
    }
}

impl From<UsbLocation> for Location {
    fn from(location: UsbLocation) -> Self {
        Location::Usb(location)
    }
}

impl From<NetworkLocation> for Location {
    fn from(location: NetworkLocation) -> Self {
        Location::Network(location)
    }
}

impl From<SerialLocation> for Location {
    fn from(location: SerialLocation) -> Self {
        Location::Serial(location)
    }
}
