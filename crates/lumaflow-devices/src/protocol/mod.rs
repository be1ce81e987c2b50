/*!
 * Protocol implementations.
 *
 * A protocol implementation is the set of exchanges that realize one
 * capability in one wire format. Each implementation names the transport
 * hints it needs, which is how a feature decides at runtime whether the
 * implementation can run on a given transport.
 */
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::exchange::ExchangeError;
use crate::transport::Hint;

pub mod integration_time;
pub mod serial_number;
pub mod spectrum;
pub mod thermo_electric;

pub use integration_time::{BinaryIntegrationTime, IntegrationTimeProtocol, LegacyIntegrationTime};
pub use serial_number::{BinarySerialNumber, LegacySerialNumber, SerialNumberProtocol};
pub use spectrum::{BinarySpectrum, LegacySpectrum, SpectrumProtocol};
pub use thermo_electric::{BinaryThermoElectric, LegacyThermoElectric, ThermoElectricProtocol};

/// Wire format spoken by an instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    /// Opcode-led legacy commands
    Legacy,
    /// Length-framed binary messages
    Binary,
}

impl WireFormat {
    /// Hints every exchange of this format travels on
    pub fn hints(&self) -> &'static [Hint] {
        match self {
            WireFormat::Legacy => &[Hint::Control],
            WireFormat::Binary => &[Hint::Binary],
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireFormat::Legacy => f.write_str("legacy"),
            WireFormat::Binary => f.write_str("binary"),
        }
    }
}

/// Error type for protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// An exchange failed
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    /// The argument cannot be expressed in this wire format
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl ProtocolError {
    /// Whether the device answered but refused or garbled the request
    ///
    /// Transfer failures are not protocol-level.
    pub fn is_protocol_level(&self) -> bool {
        match self {
            ProtocolError::Exchange(e) => e.is_decode(),
            ProtocolError::InvalidArgument(_) => false,
        }
    }
}

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// A capability realized in one wire format
pub trait ProtocolImpl: fmt::Debug + Send + Sync {
    /// Implementation name used in logs
    fn name(&self) -> &'static str;

    /// Wire format of the implementation
    fn wire_format(&self) -> WireFormat;

    /// Hints the transport must all support for this implementation to run
    fn required_hints(&self) -> &'static [Hint] {
        self.wire_format().hints()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::DecodeError;
    use crate::transport::TransportError;

    #[test]
    fn test_wire_format_hints() {
        assert_eq!(WireFormat::Legacy.hints(), &[Hint::Control]);
        assert_eq!(WireFormat::Binary.hints(), &[Hint::Binary]);
        assert_eq!(WireFormat::Binary.to_string(), "binary");
    }

    #[test]
    fn test_protocol_level_classification() {
        let decode: ProtocolError = ExchangeError::Decode {
            exchange: "x",
            source: DecodeError::DeviceStatus(1),
        }
        .into();
        assert!(decode.is_protocol_level());

        let transfer: ProtocolError = ExchangeError::Transfer {
            exchange: "x",
            source: TransportError::NotReady("closed".to_string()),
        }
        .into();
        assert!(!transfer.is_protocol_level());
        assert!(!ProtocolError::InvalidArgument("x".to_string()).is_protocol_level());
    }
}
