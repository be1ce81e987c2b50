/*!
 * Serial number feature.
 */
use crate::protocol::SerialNumberProtocol;
use crate::transport::Transport;

use super::{Availability, FeatureKind, FeatureState, ProtocolSelector, Result};

/// Reads the instrument serial number
#[derive(Debug)]
pub struct SerialNumberFeature {
    selector: ProtocolSelector<dyn SerialNumberProtocol>,
}

impl SerialNumberFeature {
    /// Create a feature over candidates in preference order
    pub fn new(protocols: Vec<Box<dyn SerialNumberProtocol>>) -> Self {
        Self {
            selector: ProtocolSelector::new(FeatureKind::SerialNumber, protocols),
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

    /// Select a protocol, probing it by reading the serial number
    pub fn initialize(&mut self, transport: &mut dyn Transport) -> Result<Availability> {
        self.selector.initialize_with(
            transport,
            |protocol, transport| protocol.read_serial_number(transport).map(|_| ()),
            |_, _| Ok(()),
        )
    }

    /// Read the serial number
    pub fn serial_number(&self, transport: &mut dyn Transport) -> Result<String> {
        self.selector
            .call(transport, "read serial number", |protocol, transport| {
                protocol.read_serial_number(transport)
            })
    }
}
