/*!
 * Device adapters.
 *
 * An adapter binds one [`Device`] to the id callers use to address it.
 */
use serde::Serialize;

use lumaflow_core::types::DeviceId;

use crate::device::{Device, FeatureInfo};
use crate::location::Location;

/// Caller-visible summary of an adapter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    /// Device id
    pub id: DeviceId,
    /// Device kind name
    pub kind: String,
    /// Where the device lives
    pub location: Option<String>,
    /// Whether the device was discovered rather than specified
    pub probed: bool,
    /// Whether the device is open
    pub open: bool,
    /// Feature snapshot
    pub features: Vec<FeatureInfo>,
}

/// A device with its caller-visible id
#[derive(Debug)]
pub struct DeviceAdapter {
    id: DeviceId,
    probed: bool,
    device: Device,
}

impl DeviceAdapter {
    /// Wrap a bound device
    pub fn new(id: DeviceId, device: Device, probed: bool) -> Self {
        Self { id, probed, device }
    }

    /// The id
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Device kind name
    pub fn kind(&self) -> &str {
        self.device.kind()
    }

    /// Bound location
    pub fn location(&self) -> Option<&Location> {
        self.device.location()
    }

    /// Whether the device came from discovery
    pub fn is_probed(&self) -> bool {
        self.probed
    }

    /// The device
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// The device, mutably
    pub fn device_mut(&mut self) -> &mut Device {
        &mut self.device
    }

    /// Summary for display
    pub fn info(&self) -> DeviceInfo {
        DeviceInfo {
            id: self.id,
            kind: self.kind().to_string(),
            location: self.location().map(|l| l.to_string()),
            probed: self.probed,
            open: self.device.is_open(),
            features: self.device.features(),
        }
    }
}
