use std::sync::Arc;

use lumaflow_core::config::Config;
use lumaflow_devices::devices::{self, product, Backends, VENDOR_ID};
use lumaflow_devices::sim::{InstrumentProfile, SimulatedConnector, SimulatedInstrument, SimulatedUsbBus};
use lumaflow_devices::{DeviceManager, FeatureKind, RegistryEvent};

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize the logger
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Build a bench with one cooled spectrometer
    let bus = Arc::new(SimulatedUsbBus::new());
    let profile = InstrumentProfile::for_kind(devices::LX_65C, "LX65C001").ok_or("unknown kind")?;
    let slot = bus.attach(VENDOR_ID, product::LX_65C, SimulatedInstrument::new(profile));

    let config = Config::default();
    let backends = Backends::simulated(bus.clone(), Arc::new(SimulatedConnector::new()));
    let mut manager = DeviceManager::new(devices::builtin_registry(&backends, &config)?);
    let mut events = manager.subscribe();

    let report = manager.discover()?;
    info!("Discovery created {:?}", report.created);

    for id in manager.device_ids() {
        manager.open_device(id)?;
        let device = manager.adapter(id)?.device();
        let tec = device.feature_ids(FeatureKind::ThermoElectric);
        let spectrum = device.feature_ids(FeatureKind::Spectrum);

        for feature in tec {
            manager.with_device(id, |device| device.set_tec_setpoint_celsius(feature, -10.0))?;
            manager.with_device(id, |device| device.set_tec_enable(feature, true))?;
            let celsius = manager.with_device(id, |device| device.read_temperature_celsius(feature))?;
            info!("Device {} cooled to {} C", id, celsius);
        }
        for feature in spectrum {
            let samples = manager.with_device(id, |device| device.read_spectrum(feature))?;
            info!("Device {} returned {} samples", id, samples.len());
        }
    }

    // Unplug and let the next pass sweep the device away
    bus.detach(slot);
    let report = manager.discover()?;
    info!("Discovery purged {:?}", report.purged);

    while let Ok(event) = events.try_recv() {
        match event {
            RegistryEvent::DeviceAdded { id, kind, location } => info!("+ {} {} at {}", id, kind, location),
            RegistryEvent::DeviceRemoved(id) => info!("- {}", id),
        }
    }

    Ok(())
}
