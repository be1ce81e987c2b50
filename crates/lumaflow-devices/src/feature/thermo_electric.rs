/*!
 * Thermoelectric cooler feature.
 *
 * Initialization probes the cooler by reading its temperature and then
 * pushes the configured default enable state and set-point.
 */
use lumaflow_core::config::ThermoElectricConfig;

use crate::protocol::ThermoElectricProtocol;
use crate::transport::Transport;

use super::{Availability, FeatureKind, FeatureState, ProtocolSelector, Result};

/// Controls a thermoelectric cooler
#[derive(Debug)]
pub struct ThermoElectricFeature {
    selector: ProtocolSelector<dyn ThermoElectricProtocol>,
    defaults: ThermoElectricConfig,
}

impl ThermoElectricFeature {
    /// Create a feature over candidates in preference order
    pub fn new(protocols: Vec<Box<dyn ThermoElectricProtocol>>, defaults: ThermoElectricConfig) -> Self {
        Self {
            selector: ProtocolSelector::new(FeatureKind::ThermoElectric, protocols),
            defaults,
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

    /// Defaults pushed on initialization
    pub fn defaults(&self) -> &ThermoElectricConfig {
        &self.defaults
    }

    /// Select, probe and configure a protocol
    pub fn initialize(&mut self, transport: &mut dyn Transport) -> Result<Availability> {
        let defaults = &self.defaults;
        self.selector.initialize_with(
            transport,
            |protocol, transport| protocol.read_temperature_celsius(transport).map(|_| ()),
            |protocol, transport| {
                protocol.set_setpoint_celsius(transport, defaults.default_setpoint_celsius)?;
                protocol.set_enable(transport, defaults.default_enable)
            },
        )
    }

    /// Read the detector temperature in degrees Celsius
    pub fn read_temperature_celsius(&self, transport: &mut dyn Transport) -> Result<f64> {
        self.selector
            .call(transport, "read temperature", |protocol, transport| {
                protocol.read_temperature_celsius(transport)
            })
    }

    /// Set the cooler set-point in degrees Celsius
    pub fn set_setpoint_celsius(&self, transport: &mut dyn Transport, celsius: f64) -> Result<()> {
        self.selector
            .call(transport, "set set-point", |protocol, transport| {
                protocol.set_setpoint_celsius(transport, celsius)
            })
    }

    /// Enable or disable the cooler
    pub fn set_enable(&self, transport: &mut dyn Transport, enable: bool) -> Result<()> {
        self.selector
            .call(transport, "set enable", |protocol, transport| protocol.set_enable(transport, enable))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::FeatureError;
    use crate::protocol::{BinaryThermoElectric, LegacyThermoElectric, ProtocolError, WireFormat};
    use crate::sim::testing::{binary_stream, legacy_usb};
    use crate::sim::InstrumentProfile;

    fn feature(defaults: ThermoElectricConfig) -> ThermoElectricFeature {
        ThermoElectricFeature::new(
            vec![Box::new(LegacyThermoElectric), Box::new(BinaryThermoElectric)],
            defaults,
        )
    }

    #[test]
    fn test_initialization_pushes_defaults() -> Result<()> {
        let (instrument, mut transport) =
            legacy_usb(InstrumentProfile::new("LX0001", WireFormat::Legacy).with_tec());
        let defaults = ThermoElectricConfig {
            default_enable: true,
            default_setpoint_celsius: -12.5,
        };
        let mut feature = feature(defaults);

        assert_eq!(feature.initialize(&mut transport)?, Availability::Ready);
        assert!(instrument.tec_enabled());
        assert_eq!(instrument.setpoint_celsius(), -12.5);
        assert_eq!(
            instrument.writes(),
            vec![vec![0x72], vec![0x73, 0x83, 0xFF], vec![0x71, 0x01]]
        );
        assert_eq!(feature.read_temperature_celsius(&mut transport)?, -12.5);
        Ok(())
    }

    #[test]
    fn test_binary_selected_and_legacy_never_attempted() -> Result<()> {
        let (instrument, mut transport) =
            binary_stream(InstrumentProfile::new("NB0001", WireFormat::Binary).with_tec());
        let mut feature = feature(ThermoElectricConfig::default());

        assert_eq!(feature.initialize(&mut transport)?, Availability::Ready);
        let writes = instrument.writes();
        assert_eq!(writes.len(), 3);
        assert!(writes.iter().all(|w| w.starts_with(&[0xC1, 0xC0])));
        Ok(())
    }

    #[test]
    fn test_missing_cooler_is_absent_and_calls_are_unsupported() -> Result<()> {
        let (instrument, mut transport) = binary_stream(InstrumentProfile::new("NB0001", WireFormat::Binary));
        let mut feature = feature(ThermoElectricConfig::default());

        assert_eq!(feature.initialize(&mut transport)?, Availability::Absent);
        let writes = instrument.writes().len();
        let err = feature
            .read_temperature_celsius(&mut transport)
            .expect_err("absent");
        assert!(matches!(err, FeatureError::Unsupported { .. }));
        assert_eq!(instrument.writes().len(), writes);
        Ok(())
    }

    #[test]
    fn test_control_failure_chains_cause() -> Result<()> {
        let (_instrument, mut transport) =
            legacy_usb(InstrumentProfile::new("LX0001", WireFormat::Legacy).with_tec());
        let mut feature = feature(ThermoElectricConfig::default());
        feature.initialize(&mut transport)?;

        let err = feature
            .set_setpoint_celsius(&mut transport, f64::NAN)
            .expect_err("not representable");
        assert!(matches!(
            err,
            FeatureError::Control {
                operation: "set set-point",
                source: ProtocolError::InvalidArgument(_),
                ..
            }
        ));
        assert!(std::error::Error::source(&err).is_some());
        Ok(())
    }
}
