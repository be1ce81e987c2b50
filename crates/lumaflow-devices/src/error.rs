/*!
 * Driver-level errors.
 */
use thiserror::Error;

use lumaflow_core::types::DeviceId;

use crate::device::DeviceError;
use crate::location::LocationError;

/// Error type for the device manager
#[derive(Error, Debug)]
pub enum DriverError {
    /// No device kind with this name or index is registered
    #[error("Unknown device kind: {0}")]
    UnknownKind(String),

    /// A device kind with this name is already registered
    #[error("Device kind already registered: {0}")]
    DuplicateKind(String),

    /// The id was never issued or its device is gone
    #[error("No such device: {0}")]
    NoSuchDevice(DeviceId),

    /// A location string could not be parsed
    #[error(transparent)]
    Location(#[from] LocationError),

    /// A new device could not be bound to its location
    #[error("Cannot place {kind} at {location}")]
    Placement {
        /// Device kind name
        kind: String,
        /// The location
        location: String,
        /// Underlying failure
        #[source]
        source: DeviceError,
    },

    /// An operation on an existing device failed
    #[error("Device {id} failed")]
    Device {
        /// The device id
        id: DeviceId,
        /// Underlying failure
        #[source]
        source: DeviceError,
    },

    /// The id space is used up
    #[error("Device ids exhausted")]
    IdsExhausted,
}

/// Result type for the device manager
pub type Result<T> = std::result::Result<T, DriverError>;
