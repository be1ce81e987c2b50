/*!
 * Capability features.
 *
 * A feature holds an ordered list of protocol implementations for one
 * capability. On initialization it selects the first implementation whose
 * required hint the bound transport supports, probes it with a harmless
 * request and settles on [`FeatureState::Ready`] or [`FeatureState::Absent`].
 * Features never hold transport state; the device passes its active
 * transport into every call.
 */
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::protocol::{ProtocolError, ProtocolImpl};
use crate::transport::Transport;

pub mod integration_time;
pub mod serial_number;
pub mod spectrum;
pub mod thermo_electric;

pub use integration_time::{IntegrationTimeFeature, IntegrationTimeLimits};
pub use serial_number::SerialNumberFeature;
pub use spectrum::SpectrumFeature;
pub use thermo_electric::ThermoElectricFeature;

/// Outcome of initializing a feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    /// A protocol implementation was selected
    Ready,
    /// The capability does not exist on this transport or hardware
    Absent,
}

/// Lifecycle of a feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureState {
    /// Not initialized yet
    Unbound,
    /// Bound to a protocol implementation
    Ready,
    /// Terminally unavailable
    Absent,
}

/// Capability implemented by a feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    /// Serial number readout
    SerialNumber,
    /// Detector integration time
    IntegrationTime,
    /// Thermoelectric cooler
    ThermoElectric,
    /// Spectrum acquisition
    Spectrum,
}

impl FeatureKind {
    /// All feature kinds
    pub const ALL: [FeatureKind; 4] = [
        FeatureKind::SerialNumber,
        FeatureKind::IntegrationTime,
        FeatureKind::ThermoElectric,
        FeatureKind::Spectrum,
    ];
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FeatureKind::SerialNumber => "serial number",
            FeatureKind::IntegrationTime => "integration time",
            FeatureKind::ThermoElectric => "thermoelectric",
            FeatureKind::Spectrum => "spectrum",
        };
        f.write_str(name)
    }
}

/// Error type for feature operations
#[derive(Error, Debug)]
pub enum FeatureError {
    /// The feature is unbound or absent
    #[error("Feature {feature} is not supported")]
    Unsupported {
        /// The feature
        feature: FeatureKind,
    },

    /// A capability call failed on the wire
    #[error("Feature {feature} failed to {operation}")]
    Control {
        /// The feature
        feature: FeatureKind,
        /// The operation attempted
        operation: &'static str,
        /// Underlying protocol failure
        #[source]
        source: ProtocolError,
    },

    /// Initialization failed for a reason other than absence
    #[error("Feature {feature} failed to initialize")]
    Initialization {
        /// The feature
        feature: FeatureKind,
        /// Underlying protocol failure
        #[source]
        source: ProtocolError,
    },

    /// The argument is outside the feature's limits
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl FeatureError {
    /// The protocol failure behind this error, if any
    pub fn protocol_error(&self) -> Option<&ProtocolError> {
        match self {
            FeatureError::Control { source, .. } | FeatureError::Initialization { source, .. } => Some(source),
            FeatureError::Unsupported { .. } | FeatureError::InvalidArgument(_) => None,
        }
    }
}

/// Result type for feature operations
pub type Result<T> = std::result::Result<T, FeatureError>;

/// Ordered protocol candidates and the selection state of one feature
pub struct ProtocolSelector<P: ?Sized + ProtocolImpl> {
    kind: FeatureKind,
    candidates: Vec<Box<P>>,
    state: FeatureState,
    selected: Option<usize>,
}

impl<P: ?Sized + ProtocolImpl> fmt::Debug for ProtocolSelector<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolSelector")
            .field("kind", &self.kind)
            .field("candidates", &self.candidates.iter().map(|p| p.name()).collect::<Vec<_>>())
            .field("state", &self.state)
            .field("selected", &self.selected().ok().map(|p| p.name()))
            .finish()
    }
}

impl<P: ?Sized + ProtocolImpl> ProtocolSelector<P> {
    /// Create an unbound selector; earlier candidates win
    pub fn new(kind: FeatureKind, candidates: Vec<Box<P>>) -> Self {
        Self {
            kind,
            candidates,
            state: FeatureState::Unbound,
            selected: None,
        }
    }

    /// The capability served
    pub fn kind(&self) -> FeatureKind {
        self.kind
    }

    /// Current state
    pub fn state(&self) -> FeatureState {
        self.state
    }

    /// Forget a selection so the next initialization runs again
    ///
    /// Absence is kept.
    pub fn reset(&mut self) {
        if self.state == FeatureState::Ready {
            self.state = FeatureState::Unbound;
            self.selected = None;
        }
    }

    /// The candidates in preference order
    pub fn candidates(&self) -> impl Iterator<Item = &P> {
        self.candidates.iter().map(|p| p.as_ref())
    }

    /// Select, probe and configure a protocol implementation
    ///
    /// A ready or absent selector returns its state without any transfer.
    /// No candidate whose hints are all supported, or a protocol-level probe
    /// failure, makes the selector absent for good. A transfer failure, or
    /// any failure in `configure`, is returned as an error and leaves the
    /// selector unbound.
    pub fn initialize_with<F, G>(
        &mut self,
        transport: &mut dyn Transport,
        probe: F,
        configure: G,
    ) -> Result<Availability>
    where
        F: FnOnce(&P, &mut dyn Transport) -> crate::protocol::Result<()>,
        G: FnOnce(&P, &mut dyn Transport) -> crate::protocol::Result<()>,
    {
        match self.state {
            FeatureState::Ready => return Ok(Availability::Ready),
            FeatureState::Absent => return Ok(Availability::Absent),
            FeatureState::Unbound => {}
        }

        let index = match self
            .candidates
            .iter()
            .position(|p| p.required_hints().iter().all(|&hint| transport.supports_hint(hint)))
        {
            Some(index) => index,
            None => {
                debug!("No {} protocol matches the transport hints", self.kind);
                self.state = FeatureState::Absent;
                return Ok(Availability::Absent);
            }
        };

        let kind = self.kind;
        let protocol = self.candidates[index].as_ref();
        match probe(protocol, transport) {
            Ok(()) => {}
            Err(e) if e.is_protocol_level() => {
                info!("Feature {} is absent: {}", kind, e);
                self.state = FeatureState::Absent;
                return Ok(Availability::Absent);
            }
            Err(source) => {
                return Err(FeatureError::Initialization {
                    feature: kind,
                    source,
                })
            }
        }
        configure(protocol, transport).map_err(|source| FeatureError::Initialization {
            feature: kind,
            source,
        })?;

        debug!("Feature {} bound to {}", kind, protocol.name());
        self.selected = Some(index);
        self.state = FeatureState::Ready;
        Ok(Availability::Ready)
    }

    /// The selected implementation
    pub fn selected(&self) -> Result<&P> {
        match (self.state, self.selected) {
            (FeatureState::Ready, Some(index)) => Ok(self.candidates[index].as_ref()),
            _ => Err(FeatureError::Unsupported { feature: self.kind }),
        }
    }

    /// Run an operation on the selected implementation
    pub fn call<T, F>(&self, transport: &mut dyn Transport, operation: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&P, &mut dyn Transport) -> crate::protocol::Result<T>,
    {
        let protocol = self.selected()?;
        f(protocol, transport).map_err(|source| FeatureError::Control {
            feature: self.kind,
            operation,
            source,
        })
    }
}

/// A capability module of a device
#[derive(Debug)]
pub enum DeviceFeature {
    /// Serial number readout
    SerialNumber(SerialNumberFeature),
    /// Integration time control
    IntegrationTime(IntegrationTimeFeature),
    /// Cooler control
    ThermoElectric(ThermoElectricFeature),
    /// Spectrum acquisition
    Spectrum(SpectrumFeature),
}

impl DeviceFeature {
    /// The capability served
    pub fn kind(&self) -> FeatureKind {
        match self {
            DeviceFeature::SerialNumber(_) => FeatureKind::SerialNumber,
            DeviceFeature::IntegrationTime(_) => FeatureKind::IntegrationTime,
            DeviceFeature::ThermoElectric(_) => FeatureKind::ThermoElectric,
            DeviceFeature::Spectrum(_) => FeatureKind::Spectrum,
        }
    }

    /// Current state
    pub fn state(&self) -> FeatureState {
        match self {
            DeviceFeature::SerialNumber(f) => f.state(),
            DeviceFeature::IntegrationTime(f) => f.state(),
            DeviceFeature::ThermoElectric(f) => f.state(),
            DeviceFeature::Spectrum(f) => f.state(),
        }
    }

    /// Return a ready feature to unbound
    pub fn reset(&mut self) {
        match self {
            DeviceFeature::SerialNumber(f) => f.reset(),
            DeviceFeature::IntegrationTime(f) => f.reset(),
            DeviceFeature::ThermoElectric(f) => f.reset(),
            DeviceFeature::Spectrum(f) => f.reset(),
        }
    }

    /// Initialize against a transport
    pub fn initialize(&mut self, transport: &mut dyn Transport) -> Result<Availability> {
        match self {
            DeviceFeature::SerialNumber(f) => f.initialize(transport),
            DeviceFeature::IntegrationTime(f) => f.initialize(transport),
            DeviceFeature::ThermoElectric(f) => f.initialize(transport),
            DeviceFeature::Spectrum(f) => f.initialize(transport),
        }
    }
}

impl From<SerialNumberFeature> for DeviceFeature {
    fn from(feature: SerialNumberFeature) -> Self {
        DeviceFeature::SerialNumber(feature)
    }
}

impl From<IntegrationTimeFeature> for DeviceFeature {
    fn from(feature: IntegrationTimeFeature) -> Self {
        DeviceFeature::IntegrationTime(feature)
    }
}

impl From<ThermoElectricFeature> for DeviceFeature {
    fn from(feature: ThermoElectricFeature) -> Self {
        DeviceFeature::ThermoElectric(feature)
    }
}

impl From<SpectrumFeature> for DeviceFeature {
    fn from(feature: SpectrumFeature) -> Self {
        DeviceFeature::Spectrum(feature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{DecodeError, ExchangeError};
    use crate::protocol::{BinarySerialNumber, LegacySerialNumber, SerialNumberProtocol, WireFormat};
    use crate::sim::testing::{binary_stream, legacy_usb};
    use crate::sim::InstrumentProfile;
    use crate::transport::TransportError;

    fn selector() -> ProtocolSelector<dyn SerialNumberProtocol> {
        ProtocolSelector::new(
            FeatureKind::SerialNumber,
            vec![Box::new(LegacySerialNumber), Box::new(BinarySerialNumber)],
        )
    }

    fn decode_failure() -> ProtocolError {
        ExchangeError::Decode {
            exchange: "probe",
            source: DecodeError::DeviceStatus(0x0101),
        }
        .into()
    }

    fn transfer_failure() -> ProtocolError {
        ExchangeError::Transfer {
            exchange: "probe",
            source: TransportError::ShortTransfer { expected: 4, actual: 0 },
        }
        .into()
    }

    #[test]
    fn test_first_matching_candidate_wins() -> Result<()> {
        let (_instrument, mut transport) = binary_stream(InstrumentProfile::new("NB0001", WireFormat::Binary));
        let mut selector = selector();
        let mut probed = None;
        let availability = selector.initialize_with(
            &mut transport,
            |p, _| {
                probed = Some(p.name());
                Ok(())
            },
            |_, _| Ok(()),
        )?;
        assert_eq!(availability, Availability::Ready);
        assert_eq!(probed, Some("binary serial number"));
        assert_eq!(selector.selected()?.wire_format(), WireFormat::Binary);
        Ok(())
    }

    #[test]
    fn test_no_matching_hint_is_absent_without_io() -> Result<()> {
        let (instrument, mut transport) = binary_stream(InstrumentProfile::new("NB0001", WireFormat::Binary));
        let mut selector = ProtocolSelector::<dyn SerialNumberProtocol>::new(
            FeatureKind::SerialNumber,
            vec![Box::new(LegacySerialNumber)],
        );
        let availability = selector.initialize_with(
            &mut transport,
            |_, _| panic!("probe must not run"),
            |_, _| Ok(()),
        )?;
        assert_eq!(availability, Availability::Absent);
        assert_eq!(selector.state(), FeatureState::Absent);
        assert!(instrument.writes().is_empty());
        Ok(())
    }

    #[test]
    fn test_absence_is_sticky() -> Result<()> {
        let (_instrument, mut transport) = legacy_usb(InstrumentProfile::new("LX0001", WireFormat::Legacy));
        let mut selector = selector();
        let first = selector.initialize_with(&mut transport, |_, _| Err(decode_failure()), |_, _| Ok(()))?;
        assert_eq!(first, Availability::Absent);

        let second = selector.initialize_with(
            &mut transport,
            |_, _| panic!("absent features are never retried"),
            |_, _| Ok(()),
        )?;
        assert_eq!(second, Availability::Absent);

        let err = selector
            .call(&mut transport, "read serial number", |p, t| p.read_serial_number(t))
            .expect_err("absent");
        assert!(matches!(err, FeatureError::Unsupported { feature: FeatureKind::SerialNumber }));
        Ok(())
    }

    #[test]
    fn test_transfer_failure_is_hard_and_retryable() -> Result<()> {
        let (_instrument, mut transport) = legacy_usb(InstrumentProfile::new("LX0001", WireFormat::Legacy));
        let mut selector = selector();
        let err = selector
            .initialize_with(&mut transport, |_, _| Err(transfer_failure()), |_, _| Ok(()))
            .expect_err("transfer failure");
        assert!(matches!(err, FeatureError::Initialization { .. }));
        assert_eq!(selector.state(), FeatureState::Unbound);

        let availability = selector.initialize_with(&mut transport, |_, _| Ok(()), |_, _| Ok(()))?;
        assert_eq!(availability, Availability::Ready);
        Ok(())
    }

    #[test]
    fn test_configure_failure_leaves_selector_unbound() {
        let (_instrument, mut transport) = legacy_usb(InstrumentProfile::new("LX0001", WireFormat::Legacy));
        let mut selector = selector();
        let err = selector
            .initialize_with(&mut transport, |_, _| Ok(()), |_, _| Err(decode_failure()))
            .expect_err("configure failure");
        assert!(matches!(err, FeatureError::Initialization { .. }));
        assert_eq!(selector.state(), FeatureState::Unbound);
        assert!(selector.selected().is_err());
    }

    #[test]
    fn test_ready_is_a_no_op_on_reinitialize() -> Result<()> {
        let (instrument, mut transport) = legacy_usb(InstrumentProfile::new("LX0001", WireFormat::Legacy));
        let mut selector = selector();
        selector.initialize_with(&mut transport, |p, t| p.read_serial_number(t).map(|_| ()), |_, _| Ok(()))?;
        let writes = instrument.writes().len();

        let again = selector.initialize_with(
            &mut transport,
            |_, _| panic!("ready features are not probed again"),
            |_, _| Ok(()),
        )?;
        assert_eq!(again, Availability::Ready);
        assert_eq!(instrument.writes().len(), writes);
        Ok(())
    }

    #[test]
    fn test_unbound_call_makes_no_transfer() {
        let (instrument, mut transport) = legacy_usb(InstrumentProfile::new("LX0001", WireFormat::Legacy));
        let selector = selector();
        let err = selector
            .call(&mut transport, "read serial number", |p, t| p.read_serial_number(t))
            .expect_err("unbound");
        assert!(matches!(err, FeatureError::Unsupported { .. }));
        assert!(instrument.writes().is_empty());
    }
}
