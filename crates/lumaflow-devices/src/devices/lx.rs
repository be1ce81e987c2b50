//! LX series: legacy-protocol USB spectrometers.

use lumaflow_core::config::Config;

use crate::device::Device;
use crate::feature::{
    IntegrationTimeFeature, IntegrationTimeLimits, SerialNumberFeature, SpectrumFeature, ThermoElectricFeature,
};
use crate::protocol::{LegacyIntegrationTime, LegacySerialNumber, LegacySpectrum, LegacyThermoElectric};
use crate::transport::{EndpointPair, Hint, UsbTransport};

use super::{endpoint, product, Backends, LX_2000, LX_65C, VENDOR_ID};

/// Detector pixels of the LX-2000
pub const LX_2000_PIXELS: usize = 2048;

/// Detector pixels of the LX-65C
pub const LX_65C_PIXELS: usize = 1024;

/// Integration time range of the LX series
pub const LX_INTEGRATION_LIMITS: IntegrationTimeLimits = IntegrationTimeLimits::new(1_000, 65_000_000);

fn legacy_usb(backends: &Backends, product_id: u16) -> UsbTransport {
    UsbTransport::new(backends.usb.clone(), VENDOR_ID, product_id)
        .with_endpoints(Hint::Control, EndpointPair::new(endpoint::COMMAND_OUT, endpoint::COMMAND_IN))
        .with_endpoints(Hint::Spectrum, EndpointPair::new(endpoint::COMMAND_OUT, endpoint::SPECTRUM_IN))
}

/// An unbound LX-2000
pub fn lx_2000(backends: &Backends, _config: &Config) -> Device {
    Device::new(LX_2000)
        .with_transport(legacy_usb(backends, product::LX_2000))
        .with_feature(SerialNumberFeature::new(vec![Box::new(LegacySerialNumber)]))
        .with_feature(IntegrationTimeFeature::new(
            vec![Box::new(LegacyIntegrationTime)],
            LX_INTEGRATION_LIMITS,
        ))
        .with_feature(SpectrumFeature::new(vec![Box::new(LegacySpectrum::new(LX_2000_PIXELS))]))
}

/// An unbound LX-65C, the cooled LX model
pub fn lx_65c(backends: &Backends, config: &Config) -> Device {
    Device::new(LX_65C)
        .with_transport(legacy_usb(backends, product::LX_65C))
        .with_feature(SerialNumberFeature::new(vec![Box::new(LegacySerialNumber)]))
        .with_feature(IntegrationTimeFeature::new(
            vec![Box::new(LegacyIntegrationTime)],
            LX_INTEGRATION_LIMITS,
        ))
        .with_feature(ThermoElectricFeature::new(
            vec![Box::new(LegacyThermoElectric)],
            config.thermo_electric.clone(),
        ))
        .with_feature(SpectrumFeature::new(vec![Box::new(LegacySpectrum::new(LX_65C_PIXELS))]))
}
