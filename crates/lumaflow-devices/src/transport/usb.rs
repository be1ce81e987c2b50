/*!
 * USB transport.
 *
 * The native USB stack is an external collaborator reached through
 * [`UsbBackend`]. A [`UsbTransport`] filters the bus by vendor and product
 * id and routes each hint to one pair of bulk endpoints.
 */
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::location::{BusFamily, Location};

use super::{Hint, NativeError, Probeable, Result, Transport, TransportError};

/// Opaque handle to an opened USB device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UsbHandle(pub u64);

/// Native USB collaborator
///
/// Identifiers returned by [`probe`](UsbBackend::probe) are opaque and only
/// guaranteed stable within one probing session. Reads return up to
/// `buf.len()` bytes.
pub trait UsbBackend: fmt::Debug + Send + Sync {
    /// Identifiers of attached devices matching the vendor and product
    fn probe(&self, vendor_id: u16, product_id: u16) -> std::result::Result<Vec<u64>, NativeError>;

    /// Open a device by identifier
    fn open(&self, device_id: u64) -> std::result::Result<UsbHandle, NativeError>;

    /// Close an opened device
    fn close(&self, handle: UsbHandle) -> std::result::Result<(), NativeError>;

    /// Bulk write, returning the number of bytes written
    fn write(&self, handle: UsbHandle, endpoint: u8, data: &[u8]) -> std::result::Result<usize, NativeError>;

    /// Bulk read, returning the number of bytes read
    fn read(&self, handle: UsbHandle, endpoint: u8, buf: &mut [u8]) -> std::result::Result<usize, NativeError>;

    /// Clear a halt condition on an endpoint
    fn clear_stall(&self, handle: UsbHandle, endpoint: u8) -> std::result::Result<(), NativeError>;

    /// Reset the device
    fn reset(&self, handle: UsbHandle) -> std::result::Result<(), NativeError>;
}

/// Backend for hosts without a native USB stack
///
/// Probing finds nothing, and opening always fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullUsbBackend;

impl NullUsbBackend {
    fn unavailable() -> NativeError {
        NativeError::new(NativeError::NO_DEVICE, "no native USB stack")
    }
}

impl UsbBackend for NullUsbBackend {
    fn probe(&self, _vendor_id: u16, _product_id: u16) -> std::result::Result<Vec<u64>, NativeError> {
        Ok(Vec::new())
    }

    fn open(&self, _device_id: u64) -> std::result::Result<UsbHandle, NativeError> {
        Err(Self::unavailable())
    }

    fn close(&self, _handle: UsbHandle) -> std::result::Result<(), NativeError> {
        Err(Self::unavailable())
    }

    fn write(&self, _handle: UsbHandle, _endpoint: u8, _data: &[u8]) -> std::result::Result<usize, NativeError> {
        Err(Self::unavailable())
    }

    fn read(&self, _handle: UsbHandle, _endpoint: u8, _buf: &mut [u8]) -> std::result::Result<usize, NativeError> {
        Err(Self::unavailable())
    }

    fn clear_stall(&self, _handle: UsbHandle, _endpoint: u8) -> std::result::Result<(), NativeError> {
        Err(Self::unavailable())
    }

    fn reset(&self, _handle: UsbHandle) -> std::result::Result<(), NativeError> {
        Err(Self::unavailable())
    }
}

/// Bulk endpoints serving one hint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointPair {
    /// OUT endpoint address
    pub write: u8,
    /// IN endpoint address
    pub read: u8,
}

impl EndpointPair {
    /// Create an endpoint pair
    pub const fn new(write: u8, read: u8) -> Self {
        Self { write, read }
    }
}

/// Transport over a native USB stack
pub struct UsbTransport {
    backend: Arc<dyn UsbBackend>,
    vendor_id: u16,
    product_id: u16,
    /// Endpoint layout of the device model
    endpoints: HashMap<Hint, EndpointPair>,
    /// Helpers built when a location is bound
    helpers: HashMap<Hint, EndpointPair>,
    location: Option<Location>,
    handle: Option<UsbHandle>,
}

impl fmt::Debug for UsbTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsbTransport")
            .field("vendor_id", &format_args!("{:#06x}", self.vendor_id))
            .field("product_id", &format_args!("{:#06x}", self.product_id))
            .field("location", &self.location)
            .field("handle", &self.handle)
            .field("hints", &self.hints())
            .finish()
    }
}

impl UsbTransport {
    /// Create an unbound transport for one vendor/product pair
    pub fn new(backend: Arc<dyn UsbBackend>, vendor_id: u16, product_id: u16) -> Self {
        Self {
            backend,
            vendor_id,
            product_id,
            endpoints: HashMap::new(),
            helpers: HashMap::new(),
            location: None,
            handle: None,
        }
    }

    /// Route a hint to a pair of endpoints, replacing any earlier route
    pub fn with_endpoints(mut self, hint: Hint, endpoints: EndpointPair) -> Self {
        self.endpoints.insert(hint, endpoints);
        self
    }

    /// USB vendor id this transport probes for
    pub fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    /// USB product id this transport probes for
    pub fn product_id(&self) -> u16 {
        self.product_id
    }

    fn ready(&self, hint: Hint) -> Result<(UsbHandle, EndpointPair)> {
        let handle = self
            .handle
            .ok_or_else(|| TransportError::NotReady("USB device is not open".to_string()))?;
        let endpoints = self.helpers.get(&hint).copied().ok_or(TransportError::NoSuchHint(hint))?;
        Ok((handle, endpoints))
    }
}

impl Transport for UsbTransport {
    fn bus_family(&self) -> BusFamily {
        BusFamily::Usb
    }

    fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }

    fn set_location(&mut self, location: &Location) -> Result<()> {
        if !matches!(location, Location::Usb(_)) {
            return Err(TransportError::IncompatibleLocation {
                location: location.to_string(),
                expected: BusFamily::Usb,
            });
        }
        if self.handle.is_some() {
            return Err(TransportError::NotReady(
                "cannot rebind an open USB transport".to_string(),
            ));
        }
        self.location = Some(location.clone());
        self.helpers = self.endpoints.clone();
        Ok(())
    }

    fn open(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }
        let device_id = match &self.location {
            Some(Location::Usb(usb)) => usb.device_id(),
            _ => return Err(TransportError::NotReady("USB transport is unbound".to_string())),
        };
        let handle = self.backend.open(device_id)?;
        info!(device_id, "Opened USB device {:04x}:{:04x}", self.vendor_id, self.product_id);
        self.handle = Some(handle);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.backend.close(handle) {
                warn!("Failed to close USB handle {:?}: {}", handle, e);
            } else {
                debug!("Closed USB handle {:?}", handle);
            }
        }
    }

    fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    fn hints(&self) -> Vec<Hint> {
        let mut hints: Vec<Hint> = self.helpers.keys().copied().collect();
        hints.sort();
        hints
    }

    fn supports_hint(&self, hint: Hint) -> bool {
        self.helpers.contains_key(&hint)
    }

    fn write(&mut self, hint: Hint, data: &[u8]) -> Result<usize> {
        let (handle, endpoints) = self.ready(hint)?;
        debug!(endpoint = endpoints.write, len = data.len(), "USB bulk write");
        match self.backend.write(handle, endpoints.write, data) {
            Ok(written) => Ok(written),
            Err(e) => {
                if e.code == NativeError::PIPE {
                    if let Err(clear) = self.backend.clear_stall(handle, endpoints.write) {
                        warn!("Failed to clear stall on endpoint {:#04x}: {}", endpoints.write, clear);
                    }
                }
                Err(e.into())
            }
        }
    }

    fn read(&mut self, hint: Hint, buf: &mut [u8]) -> Result<usize> {
        let (handle, endpoints) = self.ready(hint)?;
        let read = self.backend.read(handle, endpoints.read, buf).map_err(|e| {
            let error = TransportError::from(e);
            if !error.is_timeout() {
                warn!(endpoint = endpoints.read, "USB bulk read failed: {}", error);
            }
            error
        })?;
        debug!(endpoint = endpoints.read, len = read, "USB bulk read");
        Ok(read)
    }

    fn clear_stall(&mut self, hint: Hint) -> Result<()> {
        let (handle, endpoints) = self.ready(hint)?;
        self.backend.clear_stall(handle, endpoints.write)?;
        self.backend.clear_stall(handle, endpoints.read)?;
        Ok(())
    }

    fn as_probeable(&self) -> Option<&dyn Probeable> {
        Some(self)
    }
}

impl Probeable for UsbTransport {
    fn probe_devices(&self) -> Result<Vec<Location>> {
        let ids = self.backend.probe(self.vendor_id, self.product_id)?;
        debug!(
            "Probed {} USB device(s) for {:04x}:{:04x}",
            ids.len(),
            self.vendor_id,
            self.product_id
        );
        Ok(ids.into_iter().map(Location::usb).collect())
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::WireFormat;
    use crate::sim::{InstrumentProfile, SimulatedInstrument, SimulatedUsbBus};
    use crate::transport::{read_exact, write_all};

    const VID: u16 = 0x1d5b;
    const PID: u16 = 0x0042;

    fn transport(bus: &Arc<SimulatedUsbBus>) -> UsbTransport {
        UsbTransport::new(bus.clone(), VID, PID)
            .with_endpoints(Hint::Control, EndpointPair::new(0x01, 0x81))
            .with_endpoints(Hint::Spectrum, EndpointPair::new(0x01, 0x82))
    }

    fn legacy_instrument() -> SimulatedInstrument {
        SimulatedInstrument::new(InstrumentProfile::new("LX0001", WireFormat::Legacy))
    }

    #[test]
    fn test_probe_filters_by_vendor_and_product() -> Result<()> {
        let bus = Arc::new(SimulatedUsbBus::new());
        let a = bus.attach(VID, PID, legacy_instrument());
        bus.attach(VID, 0x9999, legacy_instrument());
        let b = bus.attach(VID, PID, legacy_instrument());

        let locations = transport(&bus).probe_devices()?;
        assert_eq!(locations, vec![Location::usb(a), Location::usb(b)]);
        Ok(())
    }

    #[test]
    fn test_null_backend_finds_nothing() -> Result<()> {
        let mut transport = UsbTransport::new(Arc::new(NullUsbBackend), VID, PID)
            .with_endpoints(Hint::Control, EndpointPair::new(0x01, 0x81));
        assert!(transport.probe_devices()?.is_empty());
        transport.set_location(&Location::usb(1))?;
        assert!(matches!(transport.open(), Err(TransportError::Native(_))));
        Ok(())
    }

    #[test]
    fn test_probe_does_not_open() -> Result<()> {
        let bus = Arc::new(SimulatedUsbBus::new());
        bus.attach(VID, PID, legacy_instrument());
        transport(&bus).probe_devices()?;
        assert_eq!(bus.open_handle_count(), 0);
        Ok(())
    }

    #[test]
    fn test_incompatible_location_leaves_transport_unbound() {
        let bus = Arc::new(SimulatedUsbBus::new());
        let mut transport = transport(&bus);
        let err = transport
            .set_location(&Location::tcp("10.0.0.1", 80))
            .expect_err("network location must be rejected");
        assert!(matches!(err, TransportError::IncompatibleLocation { .. }));
        assert!(transport.location().is_none());
        assert!(transport.hints().is_empty());
    }

    #[test]
    fn test_transfer_before_open_is_not_ready() {
        let bus = Arc::new(SimulatedUsbBus::new());
        let id = bus.attach(VID, PID, legacy_instrument());
        let mut transport = transport(&bus);
        transport.set_location(&Location::usb(id)).expect("usb location binds");

        let err = transport.write(Hint::Control, &[0x05, 0x00]).expect_err("closed");
        assert!(matches!(err, TransportError::NotReady(_)));
        let mut buf = [0u8; 4];
        assert!(matches!(transport.read(Hint::Control, &mut buf), Err(TransportError::NotReady(_))));
    }

    #[test]
    fn test_open_close_idempotent_and_drop_releases() -> Result<()> {
        let bus = Arc::new(SimulatedUsbBus::new());
        let id = bus.attach(VID, PID, legacy_instrument());
        let mut transport = transport(&bus);
        transport.set_location(&Location::usb(id))?;

        transport.open()?;
        transport.open()?;
        assert_eq!(bus.open_handle_count(), 1);
        transport.close();
        transport.close();
        assert_eq!(bus.open_handle_count(), 0);

        transport.open()?;
        drop(transport);
        assert_eq!(bus.open_handle_count(), 0);
        Ok(())
    }

    #[test]
    fn test_query_round_trip_through_endpoints() -> Result<()> {
        let bus = Arc::new(SimulatedUsbBus::new());
        let id = bus.attach(VID, PID, legacy_instrument());
        let mut transport = transport(&bus);
        transport.set_location(&Location::usb(id))?;
        transport.open()?;

        write_all(&mut transport, Hint::Control, &[0x05, 0x00])?;
        let mut reply = [0u8; 17];
        read_exact(&mut transport, Hint::Control, &mut reply)?;
        assert_eq!(&reply[..2], &[0x05, 0x00]);
        assert_eq!(&reply[2..8], b"LX0001");

        assert!(matches!(
            transport.write(Hint::Binary, &[0]),
            Err(TransportError::NoSuchHint(Hint::Binary))
        ));
        Ok(())
    }

    #[test]
    fn test_read_with_nothing_pending_times_out() -> Result<()> {
        let bus = Arc::new(SimulatedUsbBus::new());
        let id = bus.attach(VID, PID, legacy_instrument());
        let mut transport = transport(&bus);
        transport.set_location(&Location::usb(id))?;
        transport.open()?;

        let err = transport.read(Hint::Control, &mut [0u8; 8]).expect_err("nothing pending");
        assert!(err.is_timeout());
        Ok(())
    }

    #[test]
    fn test_detached_device_reports_native_error() -> Result<()> {
        let bus = Arc::new(SimulatedUsbBus::new());
        let id = bus.attach(VID, PID, legacy_instrument());
        let mut transport = transport(&bus);
        transport.set_location(&Location::usb(id))?;
        transport.open()?;
        bus.detach(id);

        let err = transport.write(Hint::Control, &[0x05, 0x00]).expect_err("device gone");
        assert!(matches!(err, TransportError::Native(ref native) if native.code == NativeError::NO_DEVICE));
        Ok(())
    }
}
