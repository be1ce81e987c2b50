/*!
 * Devices.
 *
 * A [`Device`] composes the transports an instrument model can be reached
 * over with the capability features it offers. Binding a location selects
 * the transport of the matching bus family; opening the device opens that
 * transport and initializes every feature against it.
 */
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use lumaflow_core::types::FeatureId;

use crate::feature::{
    Availability, DeviceFeature, FeatureError, FeatureKind, FeatureState, IntegrationTimeLimits,
};
use crate::location::{BusFamily, Location};
use crate::transport::{self, Transport, TransportError};

/// Error type for device operations
#[derive(Error, Debug)]
pub enum DeviceError {
    /// No transport of the device serves the location's bus family
    #[error("Device kind {kind} cannot be reached at {location}")]
    IncompatibleLocation {
        /// Device kind name
        kind: String,
        /// The rejected location
        location: String,
    },

    /// No location has been bound
    #[error("Device has no location")]
    NotBound,

    /// The device is not open
    #[error("Device is not open")]
    NotOpen,

    /// The feature id does not name a feature of the requested capability
    #[error("No such feature: {0}")]
    NoSuchFeature(FeatureId),

    /// Transport failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Feature failure
    #[error(transparent)]
    Feature(#[from] FeatureError),
}

/// Result type for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Snapshot of one feature of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureInfo {
    /// Feature id within the device
    pub id: FeatureId,
    /// Capability served
    pub kind: FeatureKind,
    /// Current state
    pub state: FeatureState,
}

/// An instrument: transports plus capability features
#[derive(Debug)]
pub struct Device {
    kind: String,
    transports: Vec<Box<dyn Transport>>,
    active: Option<usize>,
    location: Option<Location>,
    features: Vec<DeviceFeature>,
    open: bool,
}

impl Device {
    /// Create a device of the named kind with no transports or features
    pub fn new<S: Into<String>>(kind: S) -> Self {
        Self {
            kind: kind.into(),
            transports: Vec::new(),
            active: None,
            location: None,
            features: Vec::new(),
            open: false,
        }
    }

    /// Add a transport
    pub fn with_transport<T: Transport + 'static>(mut self, transport: T) -> Self {
        self.transports.push(Box::new(transport));
        self
    }

    /// Add a feature; feature ids follow insertion order starting at 1
    pub fn with_feature<F: Into<DeviceFeature>>(mut self, feature: F) -> Self {
        self.features.push(feature.into());
        self
    }

    /// Device kind name
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The bound location
    pub fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }

    /// Bus families this device can be reached over
    pub fn bus_families(&self) -> Vec<BusFamily> {
        self.transports.iter().map(|t| t.bus_family()).collect()
    }

    /// Whether the device is open
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Bind a location to the transport of its bus family
    pub fn set_location(&mut self, location: &Location) -> Result<()> {
        let index = self
            .transports
            .iter()
            .position(|t| t.bus_family() == location.bus_family())
            .ok_or_else(|| DeviceError::IncompatibleLocation {
                kind: self.kind.clone(),
                location: location.to_string(),
            })?;
        self.transports[index].set_location(location)?;
        self.active = Some(index);
        self.location = Some(location.clone());
        debug!("Device {} bound to {}", self.kind, location);
        Ok(())
    }

    /// Open the bound transport and initialize every feature
    ///
    /// Absent features are not an error. Any other initialization failure
    /// closes the transport again, returns the features readied by this
    /// attempt to unbound and is returned.
    pub fn open(&mut self) -> Result<()> {
        if self.open {
            return Ok(());
        }
        let index = self.active.ok_or(DeviceError::NotBound)?;
        let transport = self.transports.get_mut(index).ok_or(DeviceError::NotBound)?;
        transport.open()?;

        let unbound: Vec<bool> = self
            .features
            .iter()
            .map(|f| f.state() == FeatureState::Unbound)
            .collect();
        for position in 0..self.features.len() {
            let feature = &mut self.features[position];
            match feature.initialize(transport.as_mut()) {
                Ok(Availability::Ready) => debug!("Feature {} ready", feature.kind()),
                Ok(Availability::Absent) => debug!("Feature {} absent", feature.kind()),
                Err(e) => {
                    warn!("Closing {} after feature failure: {}", self.kind, e);
                    transport.close();
                    for (feature, was_unbound) in self.features[..position].iter_mut().zip(&unbound) {
                        if *was_unbound {
                            feature.reset();
                        }
                    }
                    return Err(e.into());
                }
            }
        }

        self.open = true;
        info!(
            "Opened {} at {}",
            self.kind,
            self.location.as_ref().map(|l| l.to_string()).unwrap_or_default()
        );
        Ok(())
    }

    /// Close the bound transport
    pub fn close(&mut self) {
        if !self.open {
            return;
        }
        if let Some(transport) = self.active.and_then(|i| self.transports.get_mut(i)) {
            transport.close();
        }
        self.open = false;
        debug!("Closed {}", self.kind);
    }

    /// Probe every probeable transport
    ///
    /// Each entry carries the transport's bus family so a failed probe can be
    /// told apart from an empty bus.
    pub fn probe_transports(&self) -> Vec<(BusFamily, transport::Result<Vec<Location>>)> {
        self.transports
            .iter()
            .filter_map(|t| t.as_probeable().map(|p| (t.bus_family(), p.probe_devices())))
            .collect()
    }

    /// Snapshot of every feature
    pub fn features(&self) -> Vec<FeatureInfo> {
        self.features
            .iter()
            .enumerate()
            .map(|(index, feature)| FeatureInfo {
                id: feature_id(index),
                kind: feature.kind(),
                state: feature.state(),
            })
            .collect()
    }

    /// Ids of the features of one capability that are not absent
    pub fn feature_ids(&self, kind: FeatureKind) -> Vec<FeatureId> {
        self.features()
            .into_iter()
            .filter(|f| f.kind == kind && f.state != FeatureState::Absent)
            .map(|f| f.id)
            .collect()
    }

    fn session(&mut self, id: FeatureId) -> Result<(&mut DeviceFeature, &mut dyn Transport)> {
        let feature = (id.as_u32() as usize)
            .checked_sub(1)
            .and_then(|index| self.features.get_mut(index))
            .ok_or(DeviceError::NoSuchFeature(id))?;
        if !self.open {
            return Err(DeviceError::NotOpen);
        }
        let transport = self
            .active
            .and_then(|index| self.transports.get_mut(index))
            .ok_or(DeviceError::NotBound)?;
        Ok((feature, transport.as_mut()))
    }

    /// Read the serial number
    pub fn serial_number(&mut self, id: FeatureId) -> Result<String> {
        match self.session(id)? {
            (DeviceFeature::SerialNumber(f), t) => Ok(f.serial_number(t)?),
            _ => Err(DeviceError::NoSuchFeature(id)),
        }
    }

    /// Set the integration time in microseconds
    pub fn set_integration_time_micros(&mut self, id: FeatureId, micros: u32) -> Result<()> {
        match self.session(id)? {
            (DeviceFeature::IntegrationTime(f), t) => Ok(f.set_integration_time_micros(t, micros)?),
            _ => Err(DeviceError::NoSuchFeature(id)),
        }
    }

    /// Accepted integration time range
    pub fn integration_time_limits(&mut self, id: FeatureId) -> Result<IntegrationTimeLimits> {
        match self.session(id)? {
            (DeviceFeature::IntegrationTime(f), _) => Ok(f.limits()),
            _ => Err(DeviceError::NoSuchFeature(id)),
        }
    }

    /// Read the detector temperature in degrees Celsius
    pub fn read_temperature_celsius(&mut self, id: FeatureId) -> Result<f64> {
        match self.session(id)? {
            (DeviceFeature::ThermoElectric(f), t) => Ok(f.read_temperature_celsius(t)?),
            _ => Err(DeviceError::NoSuchFeature(id)),
        }
    }

    /// Set the cooler set-point in degrees Celsius
    pub fn set_tec_setpoint_celsius(&mut self, id: FeatureId, celsius: f64) -> Result<()> {
        match self.session(id)? {
            (DeviceFeature::ThermoElectric(f), t) => Ok(f.set_setpoint_celsius(t, celsius)?),
            _ => Err(DeviceError::NoSuchFeature(id)),
        }
    }

    /// Enable or disable the cooler
    pub fn set_tec_enable(&mut self, id: FeatureId, enable: bool) -> Result<()> {
        match self.session(id)? {
            (DeviceFeature::ThermoElectric(f), t) => Ok(f.set_enable(t, enable)?),
            _ => Err(DeviceError::NoSuchFeature(id)),
        }
    }

    /// Acquire one spectrum
    pub fn read_spectrum(&mut self, id: FeatureId) -> Result<Vec<u16>> {
        match self.session(id)? {
            (DeviceFeature::Spectrum(f), t) => Ok(f.read_spectrum(t)?),
            _ => Err(DeviceError::NoSuchFeature(id)),
        }
    }

    /// Number of detector pixels
    pub fn pixel_count(&mut self, id: FeatureId) -> Result<usize> {
        match self.session(id)? {
            (DeviceFeature::Spectrum(f), _) => Ok(f.pixel_count()?),
            _ => Err(DeviceError::NoSuchFeature(id)),
        }
    }
}

fn feature_id(index: usize) -> FeatureId {
    FeatureId::from_raw(index as u32 + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use lumaflow_core::config::Config;

    use crate::devices::{self, product, Backends, VENDOR_ID};
    use crate::sim::{InstrumentProfile, SimulatedConnector, SimulatedInstrument, SimulatedUsbBus};

    struct Rig {
        bus: Arc<SimulatedUsbBus>,
        connector: Arc<SimulatedConnector>,
        backends: Backends,
    }

    fn rig() -> Rig {
        let bus = Arc::new(SimulatedUsbBus::new());
        let connector = Arc::new(SimulatedConnector::new());
        let backends = Backends::simulated(bus.clone(), connector.clone());
        Rig { bus, connector, backends }
    }

    fn first(device: &Device, kind: FeatureKind) -> FeatureId {
        device.feature_ids(kind)[0]
    }

    #[test]
    fn test_set_location_selects_transport_by_bus_family() -> Result<()> {
        let rig = rig();
        let mut device = devices::nb_100(&rig.backends, &Config::default());
        assert_eq!(
            device.bus_families(),
            vec![BusFamily::Usb, BusFamily::Network, BusFamily::Serial]
        );

        let location = Location::tcp("10.1.2.3", 57357);
        device.set_location(&location)?;
        assert_eq!(device.location(), Some(&location));
        Ok(())
    }

    #[test]
    fn test_incompatible_location() {
        let rig = rig();
        let mut device = devices::lx_2000(&rig.backends, &Config::default());
        let err = device
            .set_location(&Location::tcp("10.1.2.3", 1))
            .expect_err("LX-2000 is USB only");
        assert!(matches!(err, DeviceError::IncompatibleLocation { .. }));
        assert!(device.location().is_none());
        assert!(matches!(device.open(), Err(DeviceError::NotBound)));
    }

    #[test]
    fn test_open_initializes_features_and_hides_absent_ones() -> Result<()> {
        let rig = rig();
        let location = Location::tcp("10.1.2.3", 57357);
        let profile = InstrumentProfile::for_kind(devices::NB_100, "NB0001").expect("known kind");
        rig.connector.attach(location.clone(), SimulatedInstrument::new(profile));

        let mut device = devices::nb_100(&rig.backends, &Config::default());
        device.set_location(&location)?;
        device.open()?;

        assert!(device.feature_ids(FeatureKind::ThermoElectric).is_empty());
        let serial = first(&device, FeatureKind::SerialNumber);
        assert_eq!(device.serial_number(serial)?, "NB0001");
        let spectrum = first(&device, FeatureKind::Spectrum);
        assert_eq!(device.pixel_count(spectrum)?, devices::NB_100_PIXELS);
        assert_eq!(device.read_spectrum(spectrum)?.len(), devices::NB_100_PIXELS);
        Ok(())
    }

    #[test]
    fn test_capability_calls_require_open_device() -> Result<()> {
        let rig = rig();
        let id = rig.bus.attach(VENDOR_ID, product::LX_2000, SimulatedInstrument::new(
            InstrumentProfile::new("LX0001", crate::protocol::WireFormat::Legacy),
        ));
        let mut device = devices::lx_2000(&rig.backends, &Config::default());
        device.set_location(&Location::usb(id))?;

        let serial = first(&device, FeatureKind::SerialNumber);
        assert!(matches!(device.serial_number(serial), Err(DeviceError::NotOpen)));
        assert!(matches!(
            device.serial_number(FeatureId::from_raw(99)),
            Err(DeviceError::NoSuchFeature(_))
        ));
        Ok(())
    }

    #[test]
    fn test_feature_of_other_capability_is_no_such_feature() -> Result<()> {
        let rig = rig();
        let profile = InstrumentProfile::for_kind(devices::LX_2000, "LX0001").expect("known kind");
        let id = rig.bus.attach(VENDOR_ID, product::LX_2000, SimulatedInstrument::new(profile));
        let mut device = devices::lx_2000(&rig.backends, &Config::default());
        device.set_location(&Location::usb(id))?;
        device.open()?;

        let serial = first(&device, FeatureKind::SerialNumber);
        assert!(matches!(
            device.read_spectrum(serial),
            Err(DeviceError::NoSuchFeature(found)) if found == serial
        ));
        Ok(())
    }

    #[test]
    fn test_hard_feature_failure_closes_transport() -> Result<()> {
        let rig = rig();
        // an LX-65C that never answers cooler commands
        let profile = InstrumentProfile::for_kind(devices::LX_2000, "LX0001").expect("known kind");
        let id = rig.bus.attach(VENDOR_ID, product::LX_65C, SimulatedInstrument::new(profile));
        let mut device = devices::lx_65c(&rig.backends, &Config::default());
        device.set_location(&Location::usb(id))?;

        let err = device.open().expect_err("cooler probe times out");
        assert!(matches!(err, DeviceError::Feature(FeatureError::Initialization { .. })));
        assert!(!device.is_open());
        assert_eq!(rig.bus.open_handle_count(), 0);
        Ok(())
    }

    #[test]
    fn test_failed_open_pushes_cooler_defaults_again() -> Result<()> {
        use crate::devices::endpoint;
        use crate::exchange::legacy::opcode;
        use crate::feature::{SerialNumberFeature, ThermoElectricFeature};
        use crate::protocol::{LegacySerialNumber, LegacyThermoElectric};
        use crate::transport::{EndpointPair, Hint, UsbTransport};
        use lumaflow_core::config::ThermoElectricConfig;

        let rig = rig();
        let profile = InstrumentProfile::for_kind(devices::LX_65C, "LX6501").expect("known kind");
        let instrument = SimulatedInstrument::new(profile);
        let id = rig.bus.attach(VENDOR_ID, product::LX_65C, instrument.clone());
        let defaults = ThermoElectricConfig {
            default_enable: true,
            default_setpoint_celsius: -10.0,
        };
        // cooler first, so it is ready before the serial number probe runs
        let mut device = Device::new(devices::LX_65C)
            .with_transport(
                UsbTransport::new(rig.backends.usb.clone(), VENDOR_ID, product::LX_65C)
                    .with_endpoints(Hint::Control, EndpointPair::new(endpoint::COMMAND_OUT, endpoint::COMMAND_IN)),
            )
            .with_feature(ThermoElectricFeature::new(vec![Box::new(LegacyThermoElectric)], defaults))
            .with_feature(SerialNumberFeature::new(vec![Box::new(LegacySerialNumber)]));
        device.set_location(&Location::usb(id))?;

        instrument.silence(opcode::QUERY_INFO, true);
        assert!(device.open().is_err());
        assert_eq!(instrument.setpoint_celsius(), -10.0);
        assert!(device.features().iter().all(|f| f.state == FeatureState::Unbound));

        instrument.power_cycle();
        instrument.silence(opcode::QUERY_INFO, false);
        device.open()?;
        assert_eq!(instrument.setpoint_celsius(), -10.0);
        assert!(instrument.tec_enabled());
        Ok(())
    }

    #[test]
    fn test_close_is_idempotent() -> Result<()> {
        let rig = rig();
        let profile = InstrumentProfile::for_kind(devices::LX_65C, "LX6501").expect("known kind");
        let id = rig.bus.attach(VENDOR_ID, product::LX_65C, SimulatedInstrument::new(profile));
        let mut device = devices::lx_65c(&rig.backends, &Config::default());
        device.set_location(&Location::usb(id))?;
        device.open()?;
        device.open()?;
        assert_eq!(rig.bus.open_handle_count(), 1);

        let tec = first(&device, FeatureKind::ThermoElectric);
        device.set_tec_setpoint_celsius(tec, -5.0)?;
        device.set_tec_enable(tec, true)?;
        assert_eq!(device.read_temperature_celsius(tec)?, -5.0);

        device.close();
        device.close();
        assert_eq!(rig.bus.open_handle_count(), 0);
        Ok(())
    }
}
