/*!
 * Device kind registry and registry events.
 *
 * The registry maps device kind names to factories that build fresh,
 * unbound [`Device`]s. It is an explicitly owned value handed to the
 * [`DeviceManager`](crate::discovery::DeviceManager); there is no global
 * instance.
 */
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use lumaflow_core::types::DeviceId;

use crate::device::Device;
use crate::error::{DriverError, Result};
use crate::location::Location;

/// Builds an unbound device of one kind
pub type DeviceFactory = Arc<dyn Fn() -> Device + Send + Sync>;

/// Event published by the device manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RegistryEvent {
    /// A device was added, by discovery or explicitly
    DeviceAdded {
        /// The new id
        id: DeviceId,
        /// Device kind name
        kind: String,
        /// Where the device lives
        location: Location,
    },
    /// A device was removed, by a sweep or explicitly
    DeviceRemoved(DeviceId),
}

/// Ordered map of device kind names to factories
#[derive(Clone, Default)]
pub struct DeviceKindRegistry {
    kinds: Vec<(String, DeviceFactory)>,
}

impl fmt::Debug for DeviceKindRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl DeviceKindRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kind; names are unique
    pub fn register<S, F>(&mut self, name: S, factory: F) -> Result<()>
    where
        S: Into<String>,
        F: Fn() -> Device + Send + Sync + 'static,
    {
        let name = name.into();
        if self.contains(&name) {
            return Err(DriverError::DuplicateKind(name));
        }
        debug!("Registered device kind {}", name);
        self.kinds.push((name, Arc::new(factory)));
        Ok(())
    }

    /// Whether a kind is registered
    pub fn contains(&self, name: &str) -> bool {
        self.kinds.iter().any(|(n, _)| n == name)
    }

    /// Kind names in registration order
    pub fn names(&self) -> Vec<&str> {
        self.kinds.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Number of kinds
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// Whether no kind is registered
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Build an unbound device by kind name
    pub fn create(&self, name: &str) -> Result<Device> {
        self.kinds
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, factory)| factory())
            .ok_or_else(|| DriverError::UnknownKind(name.to_string()))
    }

    /// Build an unbound device by registration index
    pub fn create_by_index(&self, index: usize) -> Result<Device> {
        self.kinds
            .get(index)
            .map(|(_, factory)| factory())
            .ok_or_else(|| DriverError::UnknownKind(format!("#{}", index)))
    }
}
