/*!
 * Spectrum feature.
 */
use crate::protocol::SpectrumProtocol;
use crate::transport::Transport;

use super::{Availability, FeatureKind, FeatureState, ProtocolSelector, Result};

/// Acquires spectra
#[derive(Debug)]
pub struct SpectrumFeature {
    selector: ProtocolSelector<dyn SpectrumProtocol>,
}

impl SpectrumFeature {
    /// Create a feature over candidates in preference order
    pub fn new(protocols: Vec<Box<dyn SpectrumProtocol>>) -> Self {
        Self {
            selector: ProtocolSelector::new(FeatureKind::Spectrum, protocols),
        }
    }

    /// Current state
    pub fn state(&self) -> FeatureState {
        self.selector.state()
    }

    /// Forget the selected protocol
    pub fn reset(&mut self) {
        self.selector.reset();
    }

    /// Select a protocol; acquisition is not a harmless probe
    pub fn initialize(&mut self, transport: &mut dyn Transport) -> Result<Availability> {
        self.selector.initialize_with(transport, |_, _| Ok(()), |_, _| Ok(()))
    }

    /// Number of detector pixels of the selected protocol
    pub fn pixel_count(&self) -> Result<usize> {
        Ok(self.selector.selected()?.pixel_count())
    }

    /// Acquire one spectrum
    pub fn read_spectrum(&self, transport: &mut dyn Transport) -> Result<Vec<u16>> {
        self.selector
            .call(transport, "read spectrum", |protocol, transport| protocol.read_spectrum(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{BinarySpectrum, LegacySpectrum, WireFormat};
    use crate::devices::{endpoint, product, VENDOR_ID};
    use crate::feature::FeatureError;
    use crate::location::Location;
    use crate::sim::testing::legacy_usb;
    use crate::sim::{InstrumentProfile, SimulatedInstrument, SimulatedUsbBus};
    use crate::transport::{EndpointPair, Hint, UsbTransport};
    use std::sync::Arc;

    #[test]
    fn test_legacy_acquisition() -> Result<()> {
        let profile = InstrumentProfile::new("LX0001", WireFormat::Legacy).with_pixels(8);
        let (instrument, mut transport) = legacy_usb(profile);
        let mut feature = SpectrumFeature::new(vec![
            Box::new(BinarySpectrum::new(8)),
            Box::new(LegacySpectrum::new(8)),
        ]);
        assert_eq!(feature.initialize(&mut transport)?, Availability::Ready);
        assert_eq!(feature.pixel_count()?, 8);
        assert_eq!(feature.read_spectrum(&mut transport)?, instrument.expected_spectrum());
        Ok(())
    }

    #[test]
    fn test_legacy_needs_control_channel_too() -> Result<()> {
        let bus = Arc::new(SimulatedUsbBus::new());
        let profile = InstrumentProfile::new("LX0001", WireFormat::Legacy).with_pixels(8);
        let instrument = SimulatedInstrument::new(profile);
        let id = bus.attach(VENDOR_ID, product::LX_2000, instrument.clone());
        let mut transport = UsbTransport::new(bus, VENDOR_ID, product::LX_2000)
            .with_endpoints(Hint::Spectrum, EndpointPair::new(endpoint::COMMAND_OUT, endpoint::SPECTRUM_IN));
        transport.set_location(&Location::usb(id)).expect("usb location binds");
        transport.open().expect("simulated device opens");

        let mut feature = SpectrumFeature::new(vec![Box::new(LegacySpectrum::new(8))]);
        assert_eq!(feature.initialize(&mut transport)?, Availability::Absent);
        assert!(matches!(
            feature.read_spectrum(&mut transport),
            Err(FeatureError::Unsupported { .. })
        ));
        assert!(instrument.writes().is_empty());
        Ok(())
    }
}
