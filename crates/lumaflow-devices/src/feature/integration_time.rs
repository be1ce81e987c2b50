/*!
 * Integration time feature.
 */
use serde::{Deserialize, Serialize};

use crate::protocol::IntegrationTimeProtocol;
use crate::transport::Transport;

use super::{Availability, FeatureError, FeatureKind, FeatureState, ProtocolSelector, Result};

/// Accepted integration time range in microseconds, inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationTimeLimits {
    /// Shortest accepted integration time
    pub min_micros: u32,
    /// Longest accepted integration time
    pub max_micros: u32,
}

impl IntegrationTimeLimits {
    /// Create limits
    pub const fn new(min_micros: u32, max_micros: u32) -> Self {
        Self { min_micros, max_micros }
    }

    /// Whether the value lies within the limits
    pub fn contains(&self, micros: u32) -> bool {
        (self.min_micros..=self.max_micros).contains(&micros)
    }
}

/// Sets the detector integration time
#[derive(Debug)]
pub struct IntegrationTimeFeature {
    selector: ProtocolSelector<dyn IntegrationTimeProtocol>,
    limits: IntegrationTimeLimits,
    current: Option<u32>,
}

impl IntegrationTimeFeature {
    /// Create a feature over candidates in preference order
    pub fn new(protocols: Vec<Box<dyn IntegrationTimeProtocol>>, limits: IntegrationTimeLimits) -> Self {
        Self {
            selector: ProtocolSelector::new(FeatureKind::IntegrationTime, protocols),
            limits,
            current: None,
        }
    }

    /// Current state
    pub fn state(&self) -> FeatureState {
        self.selector.state()
    }

    /// Forget the selected protocol and the last value set
    pub fn reset(&mut self) {
        self.selector.reset();
        self.current = None;
    }

    /// Select a protocol
    ///
    /// The instrument offers no harmless read for this capability, so a
    /// matching hint is enough.
    pub fn initialize(&mut self, transport: &mut dyn Transport) -> Result<Availability> {
        self.selector.initialize_with(transport, |_, _| Ok(()), |_, _| Ok(()))
    }

    /// Accepted range
    pub fn limits(&self) -> IntegrationTimeLimits {
        self.limits
    }

    /// Last value set through this feature
    pub fn integration_time_micros(&self) -> Option<u32> {
        self.current
    }

    /// Set the integration time in microseconds
    pub fn set_integration_time_micros(&mut self, transport: &mut dyn Transport, micros: u32) -> Result<()> {
        self.selector.selected()?;
        if !self.limits.contains(micros) {
            return Err(FeatureError::InvalidArgument(format!(
                "integration time {} us outside {}..={} us",
                micros, self.limits.min_micros, self.limits.max_micros
            )));
        }
        self.selector
            .call(transport, "set integration time", |protocol, transport| {
                protocol.set_integration_time_micros(transport, micros)
            })?;
        self.current = Some(micros);
        Ok(())
    }
}
