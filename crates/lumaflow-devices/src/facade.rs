/*!
 * Flat numeric facade.
 *
 * [`Driver`] exposes the device manager through plain numbers, slices and
 * an [`ErrorCode`] out-parameter, the shape foreign-language bindings want.
 * Every call writes the out-parameter, and no call order or id can make it
 * panic.
 */
use std::fmt;

use serde::Serialize;
use tracing::debug;

use lumaflow_core::types::{DeviceId, FeatureId};

use crate::device::DeviceError;
use crate::discovery::DeviceManager;
use crate::error::DriverError;
use crate::exchange::ExchangeError;
use crate::feature::{FeatureError, FeatureKind};
use crate::location::Location;
use crate::protocol::ProtocolError;
use crate::transport::TransportError;

/// Status reported by every facade call
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The call succeeded
    Success = 0,
    /// The device id is unknown or stale
    NoSuchDevice = 1,
    /// The feature id does not name a feature of that capability
    NoSuchFeature = 2,
    /// The feature is absent or unbound
    Unsupported = 3,
    /// Bytes could not be moved
    TransferFailed = 4,
    /// The device refused or garbled a request
    ControlFailed = 5,
    /// Unknown kind, bad location or similar setup failure
    Configuration = 6,
    /// The device is not open
    NotOpen = 7,
    /// An argument is out of range
    InvalidArgument = 8,
    /// The caller's buffer cannot hold the result
    BufferTooSmall = 9,
}

impl ErrorCode {
    /// Numeric value of the code
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Whether the code is [`ErrorCode::Success`]
    pub fn is_success(self) -> bool {
        self == ErrorCode::Success
    }
}

impl Default for ErrorCode {
    fn default() -> Self {
        ErrorCode::Success
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ErrorCode::Success => "success",
            ErrorCode::NoSuchDevice => "no such device",
            ErrorCode::NoSuchFeature => "no such feature",
            ErrorCode::Unsupported => "feature unsupported",
            ErrorCode::TransferFailed => "transfer failed",
            ErrorCode::ControlFailed => "control failed",
            ErrorCode::Configuration => "configuration error",
            ErrorCode::NotOpen => "device not open",
            ErrorCode::InvalidArgument => "invalid argument",
            ErrorCode::BufferTooSmall => "buffer too small",
        };
        f.write_str(text)
    }
}

impl From<&ProtocolError> for ErrorCode {
    fn from(error: &ProtocolError) -> Self {
        match error {
            ProtocolError::Exchange(ExchangeError::Encode { .. }) => ErrorCode::InvalidArgument,
            ProtocolError::Exchange(ExchangeError::Transfer { .. }) => ErrorCode::TransferFailed,
            ProtocolError::Exchange(ExchangeError::Decode { .. }) => ErrorCode::ControlFailed,
            ProtocolError::InvalidArgument(_) => ErrorCode::InvalidArgument,
        }
    }
}

impl From<&FeatureError> for ErrorCode {
    fn from(error: &FeatureError) -> Self {
        match error {
            FeatureError::Unsupported { .. } => ErrorCode::Unsupported,
            FeatureError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            FeatureError::Control { source, .. } | FeatureError::Initialization { source, .. } => source.into(),
        }
    }
}

impl From<&DeviceError> for ErrorCode {
    fn from(error: &DeviceError) -> Self {
        match error {
            DeviceError::IncompatibleLocation { .. } | DeviceError::NotBound => ErrorCode::Configuration,
            DeviceError::NotOpen => ErrorCode::NotOpen,
            DeviceError::NoSuchFeature(_) => ErrorCode::NoSuchFeature,
            DeviceError::Transport(TransportError::NotReady(_)) => ErrorCode::NotOpen,
            DeviceError::Transport(_) => ErrorCode::TransferFailed,
            DeviceError::Feature(feature) => feature.into(),
        }
    }
}

impl From<&DriverError> for ErrorCode {
    fn from(error: &DriverError) -> Self {
        match error {
            DriverError::NoSuchDevice(_) => ErrorCode::NoSuchDevice,
            DriverError::Device { source, .. } => source.into(),
            DriverError::UnknownKind(_)
            | DriverError::DuplicateKind(_)
            | DriverError::Location(_)
            | DriverError::Placement { .. }
            | DriverError::IdsExhausted => ErrorCode::Configuration,
        }
    }
}

impl From<DriverError> for ErrorCode {
    fn from(error: DriverError) -> Self {
        debug!("Facade call failed: {}", error);
        ErrorCode::from(&error)
    }
}

type Outcome<T> = std::result::Result<T, ErrorCode>;

/// Store the outcome in `error` and return the value or `fallback`
fn report<T>(error: &mut ErrorCode, fallback: T, outcome: Outcome<T>) -> T {
    match outcome {
        Ok(value) => {
            *error = ErrorCode::Success;
            value
        }
        Err(code) => {
            *error = code;
            fallback
        }
    }
}

fn device_id(raw: i64) -> Outcome<DeviceId> {
    DeviceId::try_from(raw).map_err(|_| ErrorCode::NoSuchDevice)
}

fn feature_id(raw: i64) -> Outcome<FeatureId> {
    u32::try_from(raw)
        .map(FeatureId::from_raw)
        .map_err(|_| ErrorCode::NoSuchFeature)
}

fn count(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

/// Numeric-id facade over a [`DeviceManager`]
#[derive(Debug)]
pub struct Driver {
    manager: DeviceManager,
}

impl Driver {
    /// Wrap a device manager
    pub fn new(manager: DeviceManager) -> Self {
        Self { manager }
    }

    /// The wrapped manager
    pub fn manager(&self) -> &DeviceManager {
        &self.manager
    }

    /// The wrapped manager, mutably
    pub fn manager_mut(&mut self) -> &mut DeviceManager {
        &mut self.manager
    }

    fn with_device<T, F>(&mut self, id: i64, f: F) -> Outcome<T>
    where
        F: FnOnce(&mut crate::device::Device) -> crate::device::Result<T>,
    {
        let id = device_id(id)?;
        Ok(self.manager.with_device(id, f)?)
    }

    /// Number of registered device kinds
    pub fn device_kind_count(&self) -> i32 {
        count(self.manager.kinds().len())
    }

    /// Name of the device kind at `index`
    pub fn device_kind_name(&self, index: i32, error: &mut ErrorCode) -> String {
        let outcome = usize::try_from(index)
            .ok()
            .and_then(|index| self.manager.kinds().names().get(index).map(|n| n.to_string()))
            .ok_or(ErrorCode::Configuration);
        report(error, String::new(), outcome)
    }

    /// Run one discovery pass, returning the size of the probed pool
    ///
    /// Specified devices are not counted.
    pub fn probe_devices(&mut self, error: &mut ErrorCode) -> i32 {
        let outcome = self
            .manager
            .discover()
            .map(|report| count(report.pool_size))
            .map_err(ErrorCode::from);
        report(error, 0, outcome)
    }

    /// Number of live device ids
    pub fn device_id_count(&self) -> i32 {
        count(self.manager.device_ids().len())
    }

    /// Copy live device ids into `buffer`, returning how many were copied
    ///
    /// A buffer too short for every id is filled and reported as
    /// [`ErrorCode::BufferTooSmall`].
    pub fn get_device_ids(&self, buffer: &mut [i64], error: &mut ErrorCode) -> i32 {
        let ids = self.manager.device_ids();
        let copied = ids.len().min(buffer.len());
        for (slot, id) in buffer.iter_mut().zip(&ids) {
            *slot = i64::from(*id);
        }
        let outcome = if copied < ids.len() {
            Err(ErrorCode::BufferTooSmall)
        } else {
            Ok(())
        };
        report(error, (), outcome);
        count(copied)
    }

    /// Add a device of a named kind at a location string, returning its id
    pub fn add_device(&mut self, kind: &str, location: &str, default_baud_rate: u32, error: &mut ErrorCode) -> i64 {
        let outcome = Location::parse(location, default_baud_rate)
            .map_err(DriverError::from)
            .and_then(|location| self.manager.add_specified(kind, location))
            .map(i64::from)
            .map_err(ErrorCode::from);
        report(error, 0, outcome)
    }

    /// Add a device of the kind at a registry index, returning its id
    pub fn add_device_by_index(
        &mut self,
        index: i32,
        location: &str,
        default_baud_rate: u32,
        error: &mut ErrorCode,
    ) -> i64 {
        let outcome = usize::try_from(index)
            .map_err(|_| ErrorCode::Configuration)
            .and_then(|index| {
                Location::parse(location, default_baud_rate)
                    .map_err(DriverError::from)
                    .and_then(|location| self.manager.add_specified_by_index(index, location))
                    .map(i64::from)
                    .map_err(ErrorCode::from)
            });
        report(error, 0, outcome)
    }

    /// Remove a device
    pub fn remove_device(&mut self, id: i64, error: &mut ErrorCode) {
        let outcome = device_id(id).and_then(|id| Ok(self.manager.remove_device(id)?));
        report(error, (), outcome)
    }

    /// Open a device
    pub fn open_device(&mut self, id: i64, error: &mut ErrorCode) {
        let outcome = device_id(id).and_then(|id| Ok(self.manager.open_device(id)?));
        report(error, (), outcome)
    }

    /// Close a device
    pub fn close_device(&mut self, id: i64, error: &mut ErrorCode) {
        let outcome = device_id(id).and_then(|id| Ok(self.manager.close_device(id)?));
        report(error, (), outcome)
    }

    /// Kind name of a device
    pub fn device_kind(&self, id: i64, error: &mut ErrorCode) -> String {
        let outcome = device_id(id).and_then(|id| Ok(self.manager.adapter(id)?.kind().to_string()));
        report(error, String::new(), outcome)
    }

    /// Copy the ids of a device's features of one capability into `buffer`
    ///
    /// Absent features are not listed.
    pub fn get_feature_ids(&self, id: i64, kind: FeatureKind, buffer: &mut [i64], error: &mut ErrorCode) -> i32 {
        let outcome = device_id(id)
            .and_then(|id| Ok(self.manager.adapter(id)?.device().feature_ids(kind)))
            .and_then(|ids| {
                if ids.len() > buffer.len() {
                    return Err(ErrorCode::BufferTooSmall);
                }
                for (slot, feature) in buffer.iter_mut().zip(&ids) {
                    *slot = i64::from(feature.as_u32());
                }
                Ok(count(ids.len()))
            });
        report(error, 0, outcome)
    }

    /// Copy the serial number into `buffer` as ASCII, returning its length
    pub fn get_serial_number(&mut self, id: i64, feature: i64, buffer: &mut [u8], error: &mut ErrorCode) -> i32 {
        let outcome = feature_id(feature)
            .and_then(|feature| self.with_device(id, |device| device.serial_number(feature)))
            .and_then(|serial| {
                let bytes = serial.as_bytes();
                let slot = buffer.get_mut(..bytes.len()).ok_or(ErrorCode::BufferTooSmall)?;
                slot.copy_from_slice(bytes);
                Ok(count(bytes.len()))
            });
        report(error, 0, outcome)
    }

    /// Set the integration time in microseconds
    pub fn set_integration_time_micros(&mut self, id: i64, feature: i64, micros: u32, error: &mut ErrorCode) {
        let outcome = feature_id(feature)
            .and_then(|feature| self.with_device(id, |device| device.set_integration_time_micros(feature, micros)));
        report(error, (), outcome)
    }

    /// Shortest accepted integration time in microseconds
    pub fn get_minimum_integration_time_micros(&mut self, id: i64, feature: i64, error: &mut ErrorCode) -> u32 {
        let outcome = feature_id(feature)
            .and_then(|feature| self.with_device(id, |device| device.integration_time_limits(feature)))
            .map(|limits| limits.min_micros);
        report(error, 0, outcome)
    }

    /// Longest accepted integration time in microseconds
    pub fn get_maximum_integration_time_micros(&mut self, id: i64, feature: i64, error: &mut ErrorCode) -> u32 {
        let outcome = feature_id(feature)
            .and_then(|feature| self.with_device(id, |device| device.integration_time_limits(feature)))
            .map(|limits| limits.max_micros);
        report(error, 0, outcome)
    }

    /// Detector temperature in degrees Celsius
    pub fn read_tec_temperature_celsius(&mut self, id: i64, feature: i64, error: &mut ErrorCode) -> f64 {
        let outcome = feature_id(feature)
            .and_then(|feature| self.with_device(id, |device| device.read_temperature_celsius(feature)));
        report(error, 0.0, outcome)
    }

    /// Set the cooler set-point in degrees Celsius
    pub fn set_tec_setpoint_celsius(&mut self, id: i64, feature: i64, celsius: f64, error: &mut ErrorCode) {
        let outcome = feature_id(feature)
            .and_then(|feature| self.with_device(id, |device| device.set_tec_setpoint_celsius(feature, celsius)));
        report(error, (), outcome)
    }

    /// Enable or disable the cooler
    pub fn set_tec_enable(&mut self, id: i64, feature: i64, enable: bool, error: &mut ErrorCode) {
        let outcome = feature_id(feature)
            .and_then(|feature| self.with_device(id, |device| device.set_tec_enable(feature, enable)));
        report(error, (), outcome)
    }

    /// Number of detector pixels
    pub fn get_pixel_count(&mut self, id: i64, feature: i64, error: &mut ErrorCode) -> i32 {
        let outcome = feature_id(feature)
            .and_then(|feature| self.with_device(id, |device| device.pixel_count(feature)))
            .map(count);
        report(error, 0, outcome)
    }

    /// Acquire a spectrum into `buffer`, returning the number of samples
    ///
    /// A buffer shorter than the spectrum is left untouched and reported as
    /// [`ErrorCode::BufferTooSmall`].
    pub fn get_spectrum(&mut self, id: i64, feature: i64, buffer: &mut [u16], error: &mut ErrorCode) -> i32 {
        let outcome = feature_id(feature)
            .and_then(|feature| self.with_device(id, |device| device.read_spectrum(feature)))
            .and_then(|spectrum| {
                let slot = buffer.get_mut(..spectrum.len()).ok_or(ErrorCode::BufferTooSmall)?;
                slot.copy_from_slice(&spectrum);
                Ok(count(spectrum.len()))
            });
        report(error, 0, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use lumaflow_core::config::Config;
    use test_log::test;

    use crate::devices::{self, product, Backends, VENDOR_ID};
    use crate::sim::{InstrumentProfile, SimulatedConnector, SimulatedInstrument, SimulatedUsbBus};

    const BAUD: u32 = 115_200;

    fn driver() -> (Arc<SimulatedUsbBus>, Arc<SimulatedConnector>, Driver) {
        let bus = Arc::new(SimulatedUsbBus::new());
        let connector = Arc::new(SimulatedConnector::new());
        let backends = Backends::simulated(bus.clone(), connector.clone());
        let kinds = devices::builtin_registry(&backends, &Config::default()).expect("built-in kinds are unique");
        (bus, connector, Driver::new(DeviceManager::new(kinds)))
    }

    fn first_feature(driver: &Driver, id: i64, kind: FeatureKind) -> i64 {
        let mut error = ErrorCode::Success;
        let mut ids = [0i64; 4];
        let n = driver.get_feature_ids(id, kind, &mut ids, &mut error);
        assert_eq!(error, ErrorCode::Success);
        assert!(n >= 1, "no {} feature", kind);
        ids[0]
    }

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(ErrorCode::Success.code(), 0);
        assert_eq!(ErrorCode::NoSuchDevice.code(), 1);
        assert_eq!(ErrorCode::Unsupported.code(), 3);
        assert_eq!(ErrorCode::BufferTooSmall.code(), 9);
        assert!(ErrorCode::default().is_success());
    }

    #[test]
    fn test_unknown_ids_never_panic() {
        let (_bus, _connector, mut driver) = driver();
        let mut error = ErrorCode::Success;

        for id in [-1i64, 0, 1, i64::MAX] {
            driver.open_device(id, &mut error);
            assert_eq!(error, ErrorCode::NoSuchDevice);
            assert_eq!(driver.read_tec_temperature_celsius(id, 1, &mut error), 0.0);
            assert_eq!(error, ErrorCode::NoSuchDevice);
            driver.remove_device(id, &mut error);
            assert_eq!(error, ErrorCode::NoSuchDevice);
        }
        assert_eq!(driver.device_kind_name(-3, &mut error), "");
        assert_eq!(error, ErrorCode::Configuration);
    }

    #[test]
    fn test_discover_open_and_read() {
        let (bus, _connector, mut driver) = driver();
        let profile = InstrumentProfile::for_kind(devices::LX_65C, "LX6501").expect("known kind");
        bus.attach(VENDOR_ID, product::LX_65C, SimulatedInstrument::new(profile));
        let mut error = ErrorCode::Success;

        assert_eq!(driver.probe_devices(&mut error), 1);
        assert_eq!(error, ErrorCode::Success);
        let mut ids = [0i64; 2];
        assert_eq!(driver.get_device_ids(&mut ids, &mut error), 1);
        let id = ids[0];
        assert_eq!(driver.device_kind(id, &mut error), devices::LX_65C);

        let serial = first_feature(&driver, id, FeatureKind::SerialNumber);
        let mut text = [0u8; 16];
        driver.get_serial_number(id, serial, &mut text, &mut error);
        assert_eq!(error, ErrorCode::NotOpen);

        driver.open_device(id, &mut error);
        assert_eq!(error, ErrorCode::Success);
        let n = driver.get_serial_number(id, serial, &mut text, &mut error);
        assert_eq!(&text[..n as usize], b"LX6501");

        let spectrum = first_feature(&driver, id, FeatureKind::Spectrum);
        let pixels = driver.get_pixel_count(id, spectrum, &mut error);
        assert_eq!(pixels as usize, devices::LX_65C_PIXELS);
        let mut short = vec![0u16; 8];
        driver.get_spectrum(id, spectrum, &mut short, &mut error);
        assert_eq!(error, ErrorCode::BufferTooSmall);
        assert!(short.iter().all(|&s| s == 0));
        let mut samples = vec![0u16; pixels as usize];
        assert_eq!(driver.get_spectrum(id, spectrum, &mut samples, &mut error), pixels);
        assert_eq!(error, ErrorCode::Success);

        let integration = first_feature(&driver, id, FeatureKind::IntegrationTime);
        driver.set_integration_time_micros(id, integration, 1, &mut error);
        assert_eq!(error, ErrorCode::InvalidArgument);
        assert_eq!(
            driver.get_minimum_integration_time_micros(id, integration, &mut error),
            devices::LX_INTEGRATION_LIMITS.min_micros
        );
        driver.set_integration_time_micros(id, spectrum, 10_000, &mut error);
        assert_eq!(error, ErrorCode::NoSuchFeature);
    }

    #[test]
    fn test_absent_feature_reports_unsupported() {
        let (_bus, connector, mut driver) = driver();
        let location = Location::tcp("10.0.0.9", devices::NB_100_TCP_PORT);
        let profile = InstrumentProfile::for_kind(devices::NB_100, "NB0009").expect("known kind");
        connector.attach(location, SimulatedInstrument::new(profile));
        let mut error = ErrorCode::Success;

        let id = driver.add_device(devices::NB_100, "tcp://10.0.0.9:57357", BAUD, &mut error);
        assert_eq!(error, ErrorCode::Success);
        driver.open_device(id, &mut error);
        assert_eq!(error, ErrorCode::Success);

        let mut ids = [0i64; 4];
        assert_eq!(driver.get_feature_ids(id, FeatureKind::ThermoElectric, &mut ids, &mut error), 0);
        // The cooler still occupies its slot; calling it directly reports absence
        driver.read_tec_temperature_celsius(id, 3, &mut error);
        assert_eq!(error, ErrorCode::Unsupported);
    }

    #[test]
    fn test_probe_count_excludes_specified_devices() {
        let (_bus, _connector, mut driver) = driver();
        let mut error = ErrorCode::Success;
        let id = driver.add_device(devices::NB_100, "tcp://10.0.0.9:57357", BAUD, &mut error);
        assert_eq!(error, ErrorCode::Success);

        assert_eq!(driver.probe_devices(&mut error), 0);
        assert_eq!(error, ErrorCode::Success);
        assert_eq!(driver.device_id_count(), 1);
        let mut ids = [0i64; 1];
        driver.get_device_ids(&mut ids, &mut error);
        assert_eq!(ids[0], id);
    }

    #[test]
    fn test_add_device_errors() {
        let (_bus, _connector, mut driver) = driver();
        let mut error = ErrorCode::Success;

        assert_eq!(driver.add_device("XX-9", "usb:1", BAUD, &mut error), 0);
        assert_eq!(error, ErrorCode::Configuration);
        assert_eq!(driver.add_device(devices::LX_2000, "nowhere", BAUD, &mut error), 0);
        assert_eq!(error, ErrorCode::Configuration);
        assert_eq!(driver.add_device(devices::LX_2000, "tcp://10.0.0.1:1", BAUD, &mut error), 0);
        assert_eq!(error, ErrorCode::Configuration);

        let id = driver.add_device_by_index(0, "usb:0x101", BAUD, &mut error);
        assert_eq!(error, ErrorCode::Success);
        assert!(id > 0);
        assert_eq!(driver.add_device_by_index(9, "usb:1", BAUD, &mut error), 0);
        assert_eq!(error, ErrorCode::Configuration);
    }

    #[test]
    fn test_device_ids_buffer_too_small() {
        let (bus, _connector, mut driver) = driver();
        for serial in ["LX0001", "LX0002", "LX0003"] {
            let profile = InstrumentProfile::for_kind(devices::LX_2000, serial).expect("known kind");
            bus.attach(VENDOR_ID, product::LX_2000, SimulatedInstrument::new(profile));
        }
        let mut error = ErrorCode::Success;
        assert_eq!(driver.probe_devices(&mut error), 3);

        let mut ids = [0i64; 2];
        assert_eq!(driver.get_device_ids(&mut ids, &mut error), 2);
        assert_eq!(error, ErrorCode::BufferTooSmall);
        assert!(ids[0] < ids[1]);
        assert_eq!(driver.device_id_count(), 3);
    }

    #[test]
    fn test_transfer_failure_after_unplug() {
        let (bus, _connector, mut driver) = driver();
        let profile = InstrumentProfile::for_kind(devices::LX_2000, "LX0001").expect("known kind");
        let bus_id = bus.attach(VENDOR_ID, product::LX_2000, SimulatedInstrument::new(profile));
        let mut error = ErrorCode::Success;
        driver.probe_devices(&mut error);
        let mut ids = [0i64; 1];
        driver.get_device_ids(&mut ids, &mut error);
        driver.open_device(ids[0], &mut error);
        assert_eq!(error, ErrorCode::Success);

        bus.detach(bus_id);
        let serial = first_feature(&driver, ids[0], FeatureKind::SerialNumber);
        let mut text = [0u8; 16];
        driver.get_serial_number(ids[0], serial, &mut text, &mut error);
        assert_eq!(error, ErrorCode::TransferFailed);
    }
}
