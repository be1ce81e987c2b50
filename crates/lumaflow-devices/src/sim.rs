/*!
 * Simulated hardware.
 *
 * [`SimulatedInstrument`] answers legacy commands or binary frames the way
 * the built-in instrument models do and records every write it receives.
 * [`SimulatedUsbBus`] and [`SimulatedConnector`] plug instruments into the
 * USB and stream transports in place of the native collaborators.
 */
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace};

use crate::devices::{self, endpoint};
use crate::exchange::binary::{message_type, BinaryMessage};
use crate::exchange::frame;
use crate::exchange::legacy::{opcode, INFO_SLOT_SERIAL, INFO_VALUE_LEN, SPECTRUM_SYNC};
use crate::location::Location;
use crate::protocol::WireFormat;
use crate::transport::{ByteStream, Connector, NativeError, TransportError, UsbBackend, UsbHandle};

/// Temperature reported while the cooler is off
pub const AMBIENT_CELSIUS: f64 = 22.0;

/// Binary status: unknown message type
pub const STATUS_UNKNOWN_MESSAGE: u16 = 0x0001;
/// Binary status: malformed message data
pub const STATUS_BAD_DATA: u16 = 0x0002;
/// Binary status: the instrument lacks the sub-capability
pub const STATUS_UNSUPPORTED: u16 = 0x0101;

const DEFAULT_PIXELS: usize = 64;
const DEFAULT_INTEGRATION_MICROS: u32 = 100_000;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Static description of a simulated instrument
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentProfile {
    /// Serial number reported by the instrument
    pub serial_number: String,
    /// Wire format the instrument speaks
    pub wire_format: WireFormat,
    /// Number of detector pixels
    pub pixels: usize,
    /// Whether a thermoelectric cooler is fitted
    pub has_tec: bool,
}

impl InstrumentProfile {
    /// Profile with the default pixel count and no cooler
    pub fn new<S: Into<String>>(serial_number: S, wire_format: WireFormat) -> Self {
        Self {
            serial_number: serial_number.into(),
            wire_format,
            pixels: DEFAULT_PIXELS,
            has_tec: false,
        }
    }

    /// Profile matching a built-in device kind
    pub fn for_kind<S: Into<String>>(kind: &str, serial_number: S) -> Option<Self> {
        let profile = match kind {
            devices::LX_2000 => Self::new(serial_number, WireFormat::Legacy).with_pixels(devices::LX_2000_PIXELS),
            devices::LX_65C => Self::new(serial_number, WireFormat::Legacy)
                .with_pixels(devices::LX_65C_PIXELS)
                .with_tec(),
            devices::NB_100 => Self::new(serial_number, WireFormat::Binary).with_pixels(devices::NB_100_PIXELS),
            _ => return None,
        };
        Some(profile)
    }

    /// Set the pixel count
    pub fn with_pixels(mut self, pixels: usize) -> Self {
        self.pixels = pixels;
        self
    }

    /// Fit a thermoelectric cooler
    pub fn with_tec(mut self) -> Self {
        self.has_tec = true;
        self
    }
}

/// Output queue of a simulated instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Command replies and binary frames
    Primary,
    /// Legacy spectrum data
    Bulk,
}

#[derive(Debug)]
struct InstrumentState {
    profile: InstrumentProfile,
    integration_time_micros: u32,
    tec_enabled: bool,
    setpoint_celsius: f64,
    inbound: Vec<u8>,
    primary: VecDeque<u8>,
    bulk: VecDeque<u8>,
    writes: Vec<Vec<u8>>,
    /// Legacy opcodes dropped without a reply
    silenced: HashSet<u8>,
}

impl InstrumentState {
    fn temperature_celsius(&self) -> f64 {
        if self.tec_enabled {
            self.setpoint_celsius
        } else {
            AMBIENT_CELSIUS
        }
    }

    fn spectrum(&self) -> Vec<u16> {
        let offset = (self.integration_time_micros / 1000) as usize;
        (0..self.profile.pixels)
            .map(|pixel| ((pixel * 37 + offset) % 4096) as u16)
            .collect()
    }

    fn spectrum_bytes(&self) -> BytesMut {
        let samples = self.spectrum();
        let mut buf = BytesMut::with_capacity(samples.len() * 2 + 1);
        for sample in samples {
            buf.put_u16_le(sample);
        }
        buf
    }

    fn receive(&mut self, data: &[u8]) {
        self.writes.push(data.to_vec());
        match self.profile.wire_format {
            WireFormat::Legacy => self.receive_legacy(data),
            WireFormat::Binary => {
                self.inbound.extend_from_slice(data);
                self.drain_frames();
            }
        }
    }

    fn receive_legacy(&mut self, data: &[u8]) {
        if data.first().is_some_and(|op| self.silenced.contains(op)) {
            debug!("Simulated instrument silenced legacy command {:02x?}", data);
            return;
        }
        let has_tec = self.profile.has_tec;
        match data {
            [opcode::SET_INTEGRATION_TIME, a, b, c, d] => {
                self.integration_time_micros = u32::from_le_bytes([*a, *b, *c, *d]);
            }
            [opcode::QUERY_INFO, slot] => {
                let mut value = [0u8; INFO_VALUE_LEN];
                if *slot == INFO_SLOT_SERIAL {
                    let serial = self.profile.serial_number.as_bytes();
                    let len = serial.len().min(INFO_VALUE_LEN);
                    value[..len].copy_from_slice(&serial[..len]);
                }
                self.primary.extend([opcode::QUERY_INFO, *slot]);
                self.primary.extend(value);
            }
            [opcode::REQUEST_SPECTRUM] => {
                let mut buf = self.spectrum_bytes();
                buf.put_u8(SPECTRUM_SYNC);
                self.bulk.extend(buf);
            }
            [opcode::TEC_ENABLE, enable] if has_tec => {
                self.tec_enabled = *enable != 0;
            }
            [opcode::TEC_READ_TEMPERATURE] if has_tec => {
                let tenths = (self.temperature_celsius() * 10.0).round() as i16;
                self.primary.push_back(opcode::TEC_READ_TEMPERATURE);
                self.primary.extend(tenths.to_le_bytes());
            }
            [opcode::TEC_SET_SETPOINT, lo, hi] if has_tec => {
                self.setpoint_celsius = f64::from(i16::from_le_bytes([*lo, *hi])) / 10.0;
            }
            _ => debug!("Simulated instrument ignored legacy command {:02x?}", data),
        }
    }

    fn drain_frames(&mut self) {
        while self.inbound.len() >= frame::HEADER_LEN {
            let total = match frame::expected_len(&self.inbound) {
                Ok(total) => total,
                Err(e) => {
                    debug!("Simulated instrument dropped input: {}", e);
                    self.inbound.clear();
                    return;
                }
            };
            if self.inbound.len() < total {
                return;
            }
            let bytes: Vec<u8> = self.inbound.drain(..total).collect();
            match BinaryMessage::decode(&bytes) {
                Ok(request) => {
                    match self.answer(&request).encode() {
                        Ok(reply) => self.primary.extend(reply),
                        Err(e) => debug!("Simulated instrument dropped reply: {}", e),
                    }
                }
                Err(e) => debug!("Simulated instrument dropped frame: {}", e),
            }
        }
    }

    fn answer(&mut self, request: &BinaryMessage) -> BinaryMessage {
        let kind = request.message_type();
        let data = request.data();
        let ack = |status| BinaryMessage::reply(kind, status, Bytes::new());
        let tec_message = matches!(
            kind,
            message_type::SET_TEC_ENABLE | message_type::SET_TEC_SETPOINT | message_type::GET_TEC_TEMPERATURE
        );
        if tec_message && !self.profile.has_tec {
            return ack(STATUS_UNSUPPORTED);
        }

        match kind {
            message_type::GET_SERIAL_NUMBER => {
                BinaryMessage::reply(kind, 0, self.profile.serial_number.as_bytes().to_vec())
            }
            message_type::SET_INTEGRATION_TIME => match &data[..] {
                [a, b, c, d] => {
                    self.integration_time_micros = u32::from_le_bytes([*a, *b, *c, *d]);
                    ack(0)
                }
                _ => ack(STATUS_BAD_DATA),
            },
            message_type::GET_SPECTRUM => BinaryMessage::reply(kind, 0, self.spectrum_bytes().freeze()),
            message_type::SET_TEC_ENABLE => match &data[..] {
                [enable] => {
                    self.tec_enabled = *enable != 0;
                    ack(0)
                }
                _ => ack(STATUS_BAD_DATA),
            },
            message_type::SET_TEC_SETPOINT => match &data[..] {
                [a, b, c, d] => {
                    self.setpoint_celsius = f64::from(f32::from_le_bytes([*a, *b, *c, *d]));
                    ack(0)
                }
                _ => ack(STATUS_BAD_DATA),
            },
            message_type::GET_TEC_TEMPERATURE => {
                let celsius = self.temperature_celsius() as f32;
                BinaryMessage::reply(kind, 0, celsius.to_le_bytes().to_vec())
            }
            _ => ack(STATUS_UNKNOWN_MESSAGE),
        }
    }

    fn transmit(&mut self, channel: Channel, buf: &mut [u8]) -> usize {
        let queue = match channel {
            Channel::Primary => &mut self.primary,
            Channel::Bulk => &mut self.bulk,
        };
        let n = buf.len().min(queue.len());
        for (slot, byte) in buf.iter_mut().zip(queue.drain(..n)) {
            *slot = byte;
        }
        n
    }
}

/// A simulated instrument; clones share state
#[derive(Debug, Clone)]
pub struct SimulatedInstrument {
    state: Arc<Mutex<InstrumentState>>,
}

impl SimulatedInstrument {
    /// Power up an instrument
    pub fn new(profile: InstrumentProfile) -> Self {
        Self {
            state: Arc::new(Mutex::new(InstrumentState {
                profile,
                integration_time_micros: DEFAULT_INTEGRATION_MICROS,
                tec_enabled: false,
                setpoint_celsius: AMBIENT_CELSIUS,
                inbound: Vec::new(),
                primary: VecDeque::new(),
                bulk: VecDeque::new(),
                writes: Vec::new(),
                silenced: HashSet::new(),
            })),
        }
    }

    /// The instrument profile
    pub fn profile(&self) -> InstrumentProfile {
        lock(&self.state).profile.clone()
    }

    /// Every write received, in order
    pub fn writes(&self) -> Vec<Vec<u8>> {
        lock(&self.state).writes.clone()
    }

    /// Forget recorded writes
    pub fn clear_writes(&self) {
        lock(&self.state).writes.clear();
    }

    /// Stop or resume answering a legacy opcode
    pub fn silence(&self, opcode: u8, silenced: bool) {
        let mut state = lock(&self.state);
        if silenced {
            state.silenced.insert(opcode);
        } else {
            state.silenced.remove(&opcode);
        }
    }

    /// Lose every setting and pending output, as after a power cycle
    pub fn power_cycle(&self) {
        let mut state = lock(&self.state);
        state.integration_time_micros = DEFAULT_INTEGRATION_MICROS;
        state.tec_enabled = false;
        state.setpoint_celsius = AMBIENT_CELSIUS;
        state.inbound.clear();
        state.primary.clear();
        state.bulk.clear();
    }

    /// Current integration time
    pub fn integration_time_micros(&self) -> u32 {
        lock(&self.state).integration_time_micros
    }

    /// Whether the cooler is enabled
    pub fn tec_enabled(&self) -> bool {
        lock(&self.state).tec_enabled
    }

    /// Current cooler set-point
    pub fn setpoint_celsius(&self) -> f64 {
        lock(&self.state).setpoint_celsius
    }

    /// Current detector temperature
    pub fn temperature_celsius(&self) -> f64 {
        lock(&self.state).temperature_celsius()
    }

    /// The spectrum the instrument would return right now
    pub fn expected_spectrum(&self) -> Vec<u16> {
        lock(&self.state).spectrum()
    }

    /// Deliver bytes written by the host
    pub fn receive(&self, data: &[u8]) {
        lock(&self.state).receive(data);
    }

    /// Move queued output into `buf`, returning the number of bytes moved
    pub fn transmit(&self, channel: Channel, buf: &mut [u8]) -> usize {
        lock(&self.state).transmit(channel, buf)
    }
}

#[derive(Debug)]
struct AttachedDevice {
    vendor_id: u16,
    product_id: u16,
    instrument: SimulatedInstrument,
}

#[derive(Debug)]
struct BusState {
    last_device: u64,
    last_handle: u64,
    devices: BTreeMap<u64, AttachedDevice>,
    handles: HashMap<u64, u64>,
    probe_failure: Option<NativeError>,
}

/// A simulated USB bus implementing [`UsbBackend`]
///
/// Bus identifiers start well above the adapter identifiers a driver hands
/// out, so tests can tell the two apart.
#[derive(Debug)]
pub struct SimulatedUsbBus {
    state: Mutex<BusState>,
}

impl Default for SimulatedUsbBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedUsbBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BusState {
                last_device: 0x100,
                last_handle: 0,
                devices: BTreeMap::new(),
                handles: HashMap::new(),
                probe_failure: None,
            }),
        }
    }

    /// Plug an instrument in, returning its bus identifier
    pub fn attach(&self, vendor_id: u16, product_id: u16, instrument: SimulatedInstrument) -> u64 {
        let mut state = lock(&self.state);
        state.last_device += 1;
        let id = state.last_device;
        state.devices.insert(
            id,
            AttachedDevice {
                vendor_id,
                product_id,
                instrument,
            },
        );
        debug!("Simulated USB device {} attached", id);
        id
    }

    /// Unplug an instrument; open handles to it start failing
    pub fn detach(&self, id: u64) -> Option<SimulatedInstrument> {
        let removed = lock(&self.state).devices.remove(&id);
        removed.map(|device| device.instrument)
    }

    /// The instrument behind a bus identifier
    pub fn instrument(&self, id: u64) -> Option<SimulatedInstrument> {
        lock(&self.state).devices.get(&id).map(|d| d.instrument.clone())
    }

    /// Number of handles currently open
    pub fn open_handle_count(&self) -> usize {
        lock(&self.state).handles.len()
    }

    /// Make every probe fail with `error`, or succeed again with `None`
    pub fn fail_probes(&self, error: Option<NativeError>) {
        lock(&self.state).probe_failure = error;
    }

    fn instrument_for(&self, handle: UsbHandle) -> Result<SimulatedInstrument, NativeError> {
        let state = lock(&self.state);
        let id = state
            .handles
            .get(&handle.0)
            .ok_or_else(|| NativeError::new(NativeError::INVALID_HANDLE, format!("unknown handle {}", handle.0)))?;
        state
            .devices
            .get(id)
            .map(|d| d.instrument.clone())
            .ok_or_else(|| NativeError::new(NativeError::NO_DEVICE, format!("device {} is gone", id)))
    }
}

impl UsbBackend for SimulatedUsbBus {
    fn probe(&self, vendor_id: u16, product_id: u16) -> Result<Vec<u64>, NativeError> {
        let state = lock(&self.state);
        if let Some(e) = &state.probe_failure {
            return Err(e.clone());
        }
        Ok(state
            .devices
            .iter()
            .filter(|(_, d)| d.vendor_id == vendor_id && d.product_id == product_id)
            .map(|(id, _)| *id)
            .collect())
    }

    fn open(&self, device_id: u64) -> Result<UsbHandle, NativeError> {
        let mut state = lock(&self.state);
        if !state.devices.contains_key(&device_id) {
            return Err(NativeError::new(
                NativeError::NO_DEVICE,
                format!("no device {}", device_id),
            ));
        }
        state.last_handle += 1;
        let handle = state.last_handle;
        state.handles.insert(handle, device_id);
        Ok(UsbHandle(handle))
    }

    fn close(&self, handle: UsbHandle) -> Result<(), NativeError> {
        lock(&self.state)
            .handles
            .remove(&handle.0)
            .map(|_| ())
            .ok_or_else(|| NativeError::new(NativeError::INVALID_HANDLE, format!("unknown handle {}", handle.0)))
    }

    fn write(&self, handle: UsbHandle, endpoint: u8, data: &[u8]) -> Result<usize, NativeError> {
        let instrument = self.instrument_for(handle)?;
        trace!(endpoint, len = data.len(), "Simulated bulk write");
        instrument.receive(data);
        Ok(data.len())
    }

    fn read(&self, handle: UsbHandle, address: u8, buf: &mut [u8]) -> Result<usize, NativeError> {
        let instrument = self.instrument_for(handle)?;
        let channel = if address == endpoint::SPECTRUM_IN {
            Channel::Bulk
        } else {
            Channel::Primary
        };
        match instrument.transmit(channel, buf) {
            0 => Err(NativeError::new(NativeError::TIMEOUT, "no data pending")),
            n => Ok(n),
        }
    }

    fn clear_stall(&self, handle: UsbHandle, _endpoint: u8) -> Result<(), NativeError> {
        self.instrument_for(handle).map(|_| ())
    }

    fn reset(&self, handle: UsbHandle) -> Result<(), NativeError> {
        self.instrument_for(handle).map(|_| ())
    }
}

/// A simulated network and serial fabric implementing [`Connector`]
#[derive(Debug, Default)]
pub struct SimulatedConnector {
    endpoints: Mutex<HashMap<Location, SimulatedInstrument>>,
}

impl SimulatedConnector {
    /// Create a fabric with nothing listening
    pub fn new() -> Self {
        Self::default()
    }

    /// Make an instrument reachable at a location
    pub fn attach(&self, location: Location, instrument: SimulatedInstrument) {
        lock(&self.endpoints).insert(location, instrument);
    }

    /// Make a location unreachable
    pub fn detach(&self, location: &Location) -> Option<SimulatedInstrument> {
        lock(&self.endpoints).remove(location)
    }
}

impl Connector for SimulatedConnector {
    fn connect(&self, location: &Location) -> crate::transport::Result<Box<dyn ByteStream>> {
        let instrument = lock(&self.endpoints).get(location).cloned().ok_or_else(|| {
            TransportError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("nothing listening at {}", location),
            ))
        })?;
        Ok(Box::new(SimulatedStream { instrument }))
    }
}

/// Byte stream to a simulated instrument
#[derive(Debug)]
pub struct SimulatedStream {
    instrument: SimulatedInstrument,
}

impl Read for SimulatedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.instrument.transmit(Channel::Primary, buf) {
            0 if !buf.is_empty() => Err(io::Error::new(io::ErrorKind::TimedOut, "no data pending")),
            n => Ok(n),
        }
    }
}

impl Write for SimulatedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.instrument.receive(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::devices::{product, VENDOR_ID};
    use crate::transport::{EndpointPair, Hint, StreamTransport, Transport, UsbTransport};

    /// An open legacy USB transport wired to a fresh instrument
    pub(crate) fn legacy_usb(profile: InstrumentProfile) -> (SimulatedInstrument, UsbTransport) {
        let bus = Arc::new(SimulatedUsbBus::new());
        let instrument = SimulatedInstrument::new(profile);
        let id = bus.attach(VENDOR_ID, product::LX_2000, instrument.clone());
        let mut transport = UsbTransport::new(bus, VENDOR_ID, product::LX_2000)
            .with_endpoints(Hint::Control, EndpointPair::new(endpoint::COMMAND_OUT, endpoint::COMMAND_IN))
            .with_endpoints(Hint::Spectrum, EndpointPair::new(endpoint::COMMAND_OUT, endpoint::SPECTRUM_IN));
        transport.set_location(&Location::usb(id)).expect("usb location binds");
        transport.open().expect("simulated device opens");
        (instrument, transport)
    }

    /// An open TCP stream transport wired to a fresh instrument
    pub(crate) fn binary_stream(profile: InstrumentProfile) -> (SimulatedInstrument, StreamTransport) {
        let connector = Arc::new(SimulatedConnector::new());
        let instrument = SimulatedInstrument::new(profile);
        let location = Location::tcp("sim.local", 57357);
        connector.attach(location.clone(), instrument.clone());
        let mut transport = StreamTransport::network(connector);
        transport.set_location(&location).expect("tcp location binds");
        transport.open().expect("simulated stream opens");
        (instrument, transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_info_reply_layout() {
        let instrument = SimulatedInstrument::new(InstrumentProfile::new("LX0001", WireFormat::Legacy));
        instrument.receive(&[opcode::QUERY_INFO, INFO_SLOT_SERIAL]);
        let mut reply = [0xFFu8; 32];
        assert_eq!(instrument.transmit(Channel::Primary, &mut reply), 17);
        assert_eq!(&reply[..8], b"\x05\x00LX0001");
        assert!(reply[8..17].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_binary_frames_may_arrive_in_pieces() {
        let instrument = SimulatedInstrument::new(InstrumentProfile::new("NB0001", WireFormat::Binary));
        let request = BinaryMessage::request(message_type::GET_SERIAL_NUMBER, Bytes::new()).encode().unwrap();
        instrument.receive(&request[..4]);
        instrument.receive(&request[4..]);

        let mut reply = vec![0u8; 256];
        let n = instrument.transmit(Channel::Primary, &mut reply);
        let message = BinaryMessage::decode(&reply[..n]).unwrap();
        assert_eq!(message.data().as_ref(), b"NB0001");
    }

    #[test]
    fn test_unknown_binary_message_gets_error_status() {
        let instrument = SimulatedInstrument::new(InstrumentProfile::new("NB0001", WireFormat::Binary));
        instrument.receive(&BinaryMessage::request(0xDEAD_BEEF, Bytes::new()).encode().unwrap());
        let mut reply = vec![0u8; 64];
        let n = instrument.transmit(Channel::Primary, &mut reply);
        assert_eq!(
            BinaryMessage::decode(&reply[..n]).unwrap().status(),
            STATUS_UNKNOWN_MESSAGE
        );
    }

    #[test]
    fn test_probe_failure_injection() {
        let bus = SimulatedUsbBus::new();
        bus.attach(1, 2, SimulatedInstrument::new(InstrumentProfile::new("A", WireFormat::Legacy)));
        bus.fail_probes(Some(NativeError::new(NativeError::IO, "bus reset")));
        assert!(bus.probe(1, 2).is_err());
        bus.fail_probes(None);
        assert_eq!(bus.probe(1, 2).unwrap().len(), 1);
    }
}
