/*!
 * LumaFlow Devices
 *
 * This crate provides locations, transports, wire protocols, capability
 * features and device discovery for the LumaFlow spectrometer driver.
 *
 * Layers, bottom up:
 *
 * - [`location`]: where an instrument sits on a bus
 * - [`transport`]: hint-routed byte channels over USB, TCP and serial
 * - [`exchange`]: typed request/response units and the binary frame codec
 * - [`protocol`]: one capability realized in one wire format
 * - [`feature`]: protocol selection and dispatch per capability
 * - [`device`]: transports plus features for one instrument
 * - [`discovery`]: the device manager and its mark-and-sweep pass
 * - [`facade`]: numeric ids and error codes for bindings
 */

#![warn(missing_docs)]

// Re-export core types
pub use lumaflow_core::prelude;

pub mod adapter;
pub mod device;
pub mod devices;
pub mod discovery;
pub mod error;
pub mod exchange;
pub mod facade;
pub mod feature;
pub mod location;
pub mod protocol;
pub mod registry;
pub mod sim;
pub mod transport;

pub use adapter::{DeviceAdapter, DeviceInfo};
pub use device::{Device, DeviceError, FeatureInfo};
pub use discovery::{DeviceManager, DiscoveryReport};
pub use error::DriverError;
pub use facade::{Driver, ErrorCode};
pub use feature::{Availability, FeatureKind, FeatureState};
pub use location::{BusFamily, Location};
pub use registry::{DeviceKindRegistry, RegistryEvent};

/// LumaFlow devices crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the device system
pub fn init() -> Result<(), lumaflow_core::error::Error> {
    tracing::info!("LumaFlow Devices {} initialized", VERSION);
    Ok(())
}

/// Bus families this build can reach
pub fn available_bus_families() -> Vec<BusFamily> {
    let mut families = vec![BusFamily::Usb, BusFamily::Network];

    #[cfg(feature = "serial")]
    families.push(BusFamily::Serial);

    families
}
