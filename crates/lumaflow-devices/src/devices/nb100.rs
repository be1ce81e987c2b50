//! NB-100: binary-protocol spectrometer reachable over USB, TCP and serial.

use lumaflow_core::config::Config;

use crate::device::Device;
use crate::feature::{
    IntegrationTimeFeature, IntegrationTimeLimits, SerialNumberFeature, SpectrumFeature, ThermoElectricFeature,
};
use crate::protocol::{
    BinaryIntegrationTime, BinarySerialNumber, BinarySpectrum, BinaryThermoElectric, LegacyThermoElectric,
};
use crate::transport::{EndpointPair, Hint, StreamTransport, UsbTransport};

use super::{endpoint, product, Backends, NB_100, VENDOR_ID};

/// Detector pixels of the NB-100
pub const NB_100_PIXELS: usize = 512;

/// Integration time range of the NB-100
pub const NB_100_INTEGRATION_LIMITS: IntegrationTimeLimits = IntegrationTimeLimits::new(10, 10_000_000);

/// TCP port the NB-100 listens on
pub const NB_100_TCP_PORT: u16 = 57357;

/// An unbound NB-100
///
/// Some NB-100 units carry a cooler on a legacy side channel and others
/// answer cooler messages in the binary protocol, so both cooler
/// implementations are listed; only the binary one can run on the transports
/// of this model.
pub fn nb_100(backends: &Backends, config: &Config) -> Device {
    let usb = UsbTransport::new(backends.usb.clone(), VENDOR_ID, product::NB_100)
        .with_endpoints(Hint::Binary, EndpointPair::new(endpoint::COMMAND_OUT, endpoint::COMMAND_IN));

    Device::new(NB_100)
        .with_transport(usb)
        .with_transport(StreamTransport::network(backends.network.clone()))
        .with_transport(StreamTransport::serial(backends.serial.clone()))
        .with_feature(SerialNumberFeature::new(vec![Box::new(BinarySerialNumber)]))
        .with_feature(IntegrationTimeFeature::new(
            vec![Box::new(BinaryIntegrationTime)],
            NB_100_INTEGRATION_LIMITS,
        ))
        .with_feature(ThermoElectricFeature::new(
            vec![Box::new(LegacyThermoElectric), Box::new(BinaryThermoElectric)],
            config.thermo_electric.clone(),
        ))
        .with_feature(SpectrumFeature::new(vec![Box::new(BinarySpectrum::new(NB_100_PIXELS))]))
}
