/*!
 * Device discovery and the device manager.
 *
 * The [`DeviceManager`] owns two pools of adapters. Specified adapters are
 * added at explicit locations and never touched by discovery. Probed
 * adapters are reconciled with the hardware by [`DeviceManager::discover`],
 * a mark-and-sweep pass:
 *
 * 1. every registered kind builds an unbound exemplar device;
 * 2. each probeable transport of the exemplar enumerates its bus;
 * 3. a location matching an existing probed adapter marks it seen, any
 *    other location gets a new device and a fresh id;
 * 4. probed adapters left unseen are closed and evicted.
 *
 * A probe that fails is not evidence of removal: adapters of that kind on
 * that bus family survive the pass.
 */
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use lumaflow_core::config::{Config, DiscoveryConfig};
use lumaflow_core::logging::{component_span, operation_span};
use lumaflow_core::types::{DeviceId, IdCounter};

use crate::adapter::{DeviceAdapter, DeviceInfo};
use crate::device::Device;
use crate::error::{DriverError, Result};
use crate::location::{BusFamily, Location};
use crate::registry::{DeviceKindRegistry, RegistryEvent};

/// Outcome of one discovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryReport {
    /// Probed adapters after the pass
    pub pool_size: usize,
    /// Ids created by this pass
    pub created: Vec<DeviceId>,
    /// Ids that survived this pass
    pub retained: Vec<DeviceId>,
    /// Ids evicted by this pass
    pub purged: Vec<DeviceId>,
}

/// Owner of every device adapter
#[derive(Debug)]
pub struct DeviceManager {
    kinds: DeviceKindRegistry,
    ids: IdCounter,
    specified: Vec<DeviceAdapter>,
    probed: Vec<DeviceAdapter>,
    events: broadcast::Sender<RegistryEvent>,
    usb_probing: bool,
}

impl DeviceManager {
    /// Create a manager over a kind registry
    pub fn new(kinds: DeviceKindRegistry) -> Self {
        let (events, _) = broadcast::channel(100);
        Self {
            kinds,
            ids: IdCounter::new(),
            specified: Vec::new(),
            probed: Vec::new(),
            events,
            usb_probing: true,
        }
    }

    /// Create a manager and add the devices listed in the configuration
    pub fn from_config(kinds: DeviceKindRegistry, config: &Config) -> Result<Self> {
        let mut manager = Self::new(kinds).with_discovery_config(&config.discovery);
        for entry in &config.devices {
            let location = Location::parse(&entry.location, config.transport.default_baud_rate)?;
            manager.add_specified(&entry.kind, location)?;
        }
        Ok(manager)
    }

    /// Apply the discovery configuration section
    pub fn with_discovery_config(mut self, config: &DiscoveryConfig) -> Self {
        self.usb_probing = config.usb_enabled;
        self
    }

    /// The kind registry
    pub fn kinds(&self) -> &DeviceKindRegistry {
        &self.kinds
    }

    /// Subscribe to registry events
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: RegistryEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    fn next_id(&self) -> Result<DeviceId> {
        self.ids.next().ok_or(DriverError::IdsExhausted)
    }

    fn place(&self, device: Device, location: &Location) -> Result<Device> {
        let mut device = device;
        device
            .set_location(location)
            .map_err(|source| DriverError::Placement {
                kind: device.kind().to_string(),
                location: location.to_string(),
                source,
            })?;
        Ok(device)
    }

    fn insert(&mut self, device: Device, probed: bool) -> Result<DeviceId> {
        let id = self.next_id()?;
        let kind = device.kind().to_string();
        let location = device.location().cloned();
        let adapter = DeviceAdapter::new(id, device, probed);
        if probed {
            self.probed.push(adapter);
        } else {
            self.specified.push(adapter);
        }
        if let Some(location) = location {
            info!("Added {} at {} as device {}", kind, location, id);
            self.publish(RegistryEvent::DeviceAdded { id, kind, location });
        }
        Ok(id)
    }

    /// Add a device of a named kind at an explicit location
    pub fn add_specified(&mut self, kind: &str, location: Location) -> Result<DeviceId> {
        let device = self.place(self.kinds.create(kind)?, &location)?;
        self.insert(device, false)
    }

    /// Add a device of the kind at a registry index at an explicit location
    pub fn add_specified_by_index(&mut self, index: usize, location: Location) -> Result<DeviceId> {
        let device = self.place(self.kinds.create_by_index(index)?, &location)?;
        self.insert(device, false)
    }

    /// Run one discovery pass
    pub fn discover(&mut self) -> Result<DiscoveryReport> {
        let _span = operation_span("discover", "device_manager").entered();
        let mut report = DiscoveryReport::default();
        let mut seen = vec![false; self.probed.len()];
        let mut unprobed: Vec<(String, BusFamily)> = Vec::new();

        let names: Vec<String> = self.kinds.names().into_iter().map(String::from).collect();
        for name in names {
            let exemplar = self.kinds.create(&name)?;
            for (family, probe) in exemplar.probe_transports() {
                if family == BusFamily::Usb && !self.usb_probing {
                    unprobed.push((name.clone(), family));
                    continue;
                }
                let locations = match probe {
                    Ok(locations) => locations,
                    Err(e) => {
                        warn!("Probing {} over {} failed: {}", name, family, e);
                        unprobed.push((name.clone(), family));
                        continue;
                    }
                };
                for location in locations {
                    if let Some(index) = self.probed.iter().position(|a| a.location() == Some(&location)) {
                        seen[index] = true;
                        continue;
                    }
                    let device = match self.place(self.kinds.create(&name)?, &location) {
                        Ok(device) => device,
                        Err(e) => {
                            warn!("Skipping {} at {}: {}", name, location, e);
                            continue;
                        }
                    };
                    let id = self.insert(device, true)?;
                    seen.push(true);
                    report.created.push(id);
                }
            }
        }

        let previous = std::mem::take(&mut self.probed);
        for (adapter, seen) in previous.into_iter().zip(seen) {
            let shielded = unprobed.iter().any(|(kind, family)| {
                adapter.kind() == kind && adapter.location().map(|l| l.bus_family()) == Some(*family)
            });
            if seen || shielded {
                if !report.created.contains(&adapter.id()) {
                    report.retained.push(adapter.id());
                }
                self.probed.push(adapter);
            } else {
                let id = adapter.id();
                drop(adapter);
                info!("Purged device {}", id);
                report.purged.push(id);
                self.publish(RegistryEvent::DeviceRemoved(id));
            }
        }

        report.pool_size = self.probed.len();
        debug!(
            created = report.created.len(),
            purged = report.purged.len(),
            last_id = ?self.ids.last(),
            "Discovery pass complete with {} probed device(s)",
            report.pool_size
        );
        Ok(report)
    }

    /// Remove a device from either pool
    pub fn remove_device(&mut self, id: DeviceId) -> Result<()> {
        let adapter = if let Some(index) = self.specified.iter().position(|a| a.id() == id) {
            self.specified.remove(index)
        } else if let Some(index) = self.probed.iter().position(|a| a.id() == id) {
            self.probed.remove(index)
        } else {
            return Err(DriverError::NoSuchDevice(id));
        };
        drop(adapter);
        info!("Removed device {}", id);
        self.publish(RegistryEvent::DeviceRemoved(id));
        Ok(())
    }

    /// The most recently issued id, live or not
    pub fn last_issued_id(&self) -> Option<DeviceId> {
        self.ids.last()
    }

    /// Every live id, specified devices first
    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.adapters().map(|a| a.id()).collect()
    }

    /// Every live adapter, specified devices first
    pub fn adapters(&self) -> impl Iterator<Item = &DeviceAdapter> {
        self.specified.iter().chain(self.probed.iter())
    }

    /// Summaries of every live adapter
    pub fn device_infos(&self) -> Vec<DeviceInfo> {
        self.adapters().map(|a| a.info()).collect()
    }

    /// Look up an adapter; specified devices are searched first
    pub fn adapter(&self, id: DeviceId) -> Result<&DeviceAdapter> {
        self.adapters()
            .find(|a| a.id() == id)
            .ok_or(DriverError::NoSuchDevice(id))
    }

    /// Look up an adapter mutably; specified devices are searched first
    pub fn adapter_mut(&mut self, id: DeviceId) -> Result<&mut DeviceAdapter> {
        self.specified
            .iter_mut()
            .chain(self.probed.iter_mut())
            .find(|a| a.id() == id)
            .ok_or(DriverError::NoSuchDevice(id))
    }

    /// Run an operation on a device, tagging failures with its id
    pub fn with_device<T, F>(&mut self, id: DeviceId, f: F) -> Result<T>
    where
        F: FnOnce(&mut Device) -> crate::device::Result<T>,
    {
        let adapter = self.adapter_mut(id)?;
        f(adapter.device_mut()).map_err(|source| DriverError::Device { id, source })
    }

    /// Open a device
    pub fn open_device(&mut self, id: DeviceId) -> Result<()> {
        let _span = component_span(self.adapter(id)?.kind(), Some(id.as_u64())).entered();
        self.with_device(id, |device| device.open())
    }

    /// Close a device
    pub fn close_device(&mut self, id: DeviceId) -> Result<()> {
        self.with_device(id, |device| {
            device.close();
            Ok(())
        })
    }
}
