/*!
 * Built-in instrument catalogue.
 *
 * Each instrument model is a factory that assembles a [`Device`] from the
 * transports it can be reached over and the features it offers. The
 * factories take their native collaborators from a [`Backends`] value, so
 * the same catalogue runs against real hardware or the simulator.
 */
use std::sync::Arc;

use lumaflow_core::config::{Config, TransportConfig};

use crate::device::Device;
use crate::error::Result;
use crate::registry::DeviceKindRegistry;
use crate::sim::{SimulatedConnector, SimulatedUsbBus};
use crate::transport::{Connector, NullUsbBackend, TcpConnector, UsbBackend};

mod lx;
mod nb100;

pub use lx::{lx_2000, lx_65c, LX_2000_PIXELS, LX_65C_PIXELS, LX_INTEGRATION_LIMITS};
pub use nb100::{nb_100, NB_100_INTEGRATION_LIMITS, NB_100_PIXELS, NB_100_TCP_PORT};

/// USB vendor id shared by every built-in model
pub const VENDOR_ID: u16 = 0x1d5b;

/// USB product ids
pub mod product {
    /// LX-2000
    pub const LX_2000: u16 = 0x2000;
    /// LX-65C
    pub const LX_65C: u16 = 0x2065;
    /// NB-100
    pub const NB_100: u16 = 0x0100;
}

/// USB bulk endpoint addresses
pub mod endpoint {
    /// Commands and binary frames out
    pub const COMMAND_OUT: u8 = 0x01;
    /// Command replies and binary frames in
    pub const COMMAND_IN: u8 = 0x81;
    /// Legacy spectrum data in
    pub const SPECTRUM_IN: u8 = 0x82;
}

/// Kind name of the LX-2000
pub const LX_2000: &str = "LX-2000";
/// Kind name of the LX-65C
pub const LX_65C: &str = "LX-65C";
/// Kind name of the NB-100
pub const NB_100: &str = "NB-100";

/// Native collaborators the catalogue builds transports from
#[derive(Debug, Clone)]
pub struct Backends {
    /// USB stack
    pub usb: Arc<dyn UsbBackend>,
    /// Socket connector
    pub network: Arc<dyn Connector>,
    /// Serial line connector
    pub serial: Arc<dyn Connector>,
}

impl Backends {
    /// Backends wired to simulated hardware
    pub fn simulated(bus: Arc<SimulatedUsbBus>, connector: Arc<SimulatedConnector>) -> Self {
        Self {
            usb: bus,
            network: connector.clone(),
            serial: connector,
        }
    }

    /// Backends for the host this process runs on
    ///
    /// No native USB stack is linked, so USB buses always probe empty.
    pub fn system(config: &TransportConfig) -> Self {
        Self {
            usb: Arc::new(NullUsbBackend),
            network: Arc::new(TcpConnector::from_config(config)),
            serial: system_serial(config),
        }
    }
}

#[cfg(feature = "serial")]
fn system_serial(config: &TransportConfig) -> Arc<dyn Connector> {
    Arc::new(crate::transport::SerialConnector::from_config(config))
}

#[cfg(not(feature = "serial"))]
fn system_serial(_config: &TransportConfig) -> Arc<dyn Connector> {
    Arc::new(crate::transport::UnsupportedConnector::new(
        "built without the serial feature",
    ))
}

/// Registry holding every built-in model
pub fn builtin_registry(backends: &Backends, config: &Config) -> Result<DeviceKindRegistry> {
    let mut registry = DeviceKindRegistry::new();
    let factories: [(&str, fn(&Backends, &Config) -> Device); 3] =
        [(LX_2000, lx_2000), (LX_65C, lx_65c), (NB_100, nb_100)];
    for (name, factory) in factories {
        let backends = backends.clone();
        let config = config.clone();
        registry.register(name, move || factory(&backends, &config))?;
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::FeatureKind;
    use crate::location::BusFamily;

    fn backends() -> Backends {
        Backends::simulated(Arc::new(SimulatedUsbBus::new()), Arc::new(SimulatedConnector::new()))
    }

    #[test]
    fn test_builtin_registry_order() -> Result<()> {
        let registry = builtin_registry(&backends(), &Config::default())?;
        assert_eq!(registry.names(), vec![LX_2000, LX_65C, NB_100]);
        assert_eq!(registry.create_by_index(2)?.kind(), NB_100);
        Ok(())
    }

    #[test]
    fn test_model_layouts() {
        let config = Config::default();
        let backends = backends();

        let lx = lx_2000(&backends, &config);
        assert_eq!(lx.bus_families(), vec![BusFamily::Usb]);
        let kinds: Vec<FeatureKind> = lx.features().iter().map(|f| f.kind).collect();
        assert_eq!(
            kinds,
            vec![FeatureKind::SerialNumber, FeatureKind::IntegrationTime, FeatureKind::Spectrum]
        );

        let cooled = lx_65c(&backends, &config);
        assert_eq!(cooled.features().len(), 4);
        assert_eq!(cooled.feature_ids(FeatureKind::ThermoElectric).len(), 1);

        let nb = nb_100(&backends, &config);
        assert_eq!(
            nb.bus_families(),
            vec![BusFamily::Usb, BusFamily::Network, BusFamily::Serial]
        );
        assert_eq!(nb.features().len(), 4);
    }

    #[test]
    fn test_system_backends_probe_no_usb() -> Result<()> {
        let backends = Backends::system(&TransportConfig::default());
        let device = lx_2000(&backends, &Config::default());
        let probes = device.probe_transports();
        assert_eq!(probes.len(), 1);
        assert!(matches!(&probes[0], (BusFamily::Usb, Ok(found)) if found.is_empty()));
        Ok(())
    }
}
