//! Command-line front end for LumaFlow
//!
//! Every command builds the driver, runs one discovery pass and prints its
//! result as JSON.
//!
//! # Usage
//!
//! ```bash
//! lumaflow --simulate discover
//! lumaflow --simulate spectrum --id 1
//! lumaflow --config lumaflow.toml temperature --id 3
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info};

use lumaflow_core::config::{Config, ConfigBuilder};
use lumaflow_core::logging;
use lumaflow_devices::devices::{self, product, Backends, VENDOR_ID};
use lumaflow_devices::sim::{InstrumentProfile, SimulatedConnector, SimulatedInstrument, SimulatedUsbBus};
use lumaflow_devices::{BusFamily, DeviceManager, Driver, ErrorCode, FeatureKind};

#[derive(Parser)]
#[command(name = "lumaflow")]
#[command(about = "Discover and drive laboratory spectrometers", long_about = None)]
struct Cli {
    /// Run against a simulated bench instead of real hardware
    #[arg(long, global = true)]
    simulate: bool,

    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the registered device kinds and the buses this build reaches
    Kinds,

    /// Run a discovery pass and list every device
    Discover,

    /// Read a device's serial number
    Serial {
        /// Device id
        #[arg(long)]
        id: i64,
    },

    /// Read a device's detector temperature
    Temperature {
        /// Device id
        #[arg(long)]
        id: i64,

        /// Feature id; defaults to the device's first cooler
        #[arg(long)]
        feature: Option<i64>,
    },

    /// Acquire one spectrum
    Spectrum {
        /// Device id
        #[arg(long)]
        id: i64,

        /// Integration time to set first, in microseconds
        #[arg(long)]
        integration_micros: Option<u32>,
    },
}

#[derive(Serialize)]
struct Kinds<'a> {
    kinds: Vec<&'a str>,
    bus_families: Vec<BusFamily>,
}

#[derive(Serialize)]
struct Reading<T: Serialize> {
    id: i64,
    feature: i64,
    value: T,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut builder = ConfigBuilder::new().with_environment_prefix("LUMAFLOW");
    if let Some(path) = &cli.config {
        builder = builder.with_config_file(path);
    }
    let mut config = builder.build().context("loading configuration")?;
    apply_verbosity(&mut config, cli.verbose);
    logging::init_with_config(&config.logging).context("initializing logging")?;
    lumaflow_devices::init()?;

    let mut driver = build_driver(&config, cli.simulate)?;
    let mut error = ErrorCode::Success;
    let found = driver.probe_devices(&mut error);
    check(error, "discovery")?;
    debug!("{} device(s) after discovery", found);

    match cli.command {
        Commands::Kinds => print(&Kinds {
            kinds: driver.manager().kinds().names(),
            bus_families: lumaflow_devices::available_bus_families(),
        }),
        Commands::Discover => print(&driver.manager().device_infos()),
        Commands::Serial { id } => {
            let feature = first_feature(&driver, id, FeatureKind::SerialNumber)?;
            open(&mut driver, id)?;
            let mut buffer = [0u8; 64];
            let len = driver.get_serial_number(id, feature, &mut buffer, &mut error);
            check(error, "reading serial number")?;
            let value = String::from_utf8_lossy(&buffer[..len as usize]).into_owned();
            print(&Reading { id, feature, value })
        }
        Commands::Temperature { id, feature } => {
            let feature = match feature {
                Some(feature) => feature,
                None => first_feature(&driver, id, FeatureKind::ThermoElectric)?,
            };
            open(&mut driver, id)?;
            let value = driver.read_tec_temperature_celsius(id, feature, &mut error);
            check(error, "reading temperature")?;
            print(&Reading { id, feature, value })
        }
        Commands::Spectrum { id, integration_micros } => {
            let feature = first_feature(&driver, id, FeatureKind::Spectrum)?;
            open(&mut driver, id)?;
            if let Some(micros) = integration_micros {
                let integration = first_feature(&driver, id, FeatureKind::IntegrationTime)?;
                driver.set_integration_time_micros(id, integration, micros, &mut error);
                check(error, "setting integration time")?;
            }
            let pixels = driver.get_pixel_count(id, feature, &mut error);
            check(error, "reading pixel count")?;
            let mut buffer = vec![0u16; pixels.max(0) as usize];
            let len = driver.get_spectrum(id, feature, &mut buffer, &mut error);
            check(error, "reading spectrum")?;
            buffer.truncate(len as usize);
            print(&Reading {
                id,
                feature,
                value: buffer,
            })
        }
    }
}

fn build_driver(config: &Config, simulate: bool) -> Result<Driver> {
    let backends = if simulate {
        info!("Using the simulated bench");
        simulated_bench()
    } else {
        Backends::system(&config.transport)
    };
    let kinds = devices::builtin_registry(&backends, config)?;
    let manager = DeviceManager::from_config(kinds, config).context("adding configured devices")?;
    Ok(Driver::new(manager))
}

/// One instrument of every built-in kind on a simulated USB bus
fn simulated_bench() -> Backends {
    let bus = Arc::new(SimulatedUsbBus::new());
    let bench = [
        (devices::LX_2000, product::LX_2000, "LX200001"),
        (devices::LX_65C, product::LX_65C, "LX65C001"),
        (devices::NB_100, product::NB_100, "NB100001"),
    ];
    for (kind, product_id, serial) in bench {
        if let Some(profile) = InstrumentProfile::for_kind(kind, serial) {
            bus.attach(VENDOR_ID, product_id, SimulatedInstrument::new(profile));
        }
    }
    Backends::simulated(bus, Arc::new(SimulatedConnector::new()))
}

/// `--verbose` wins over the configured log level
fn apply_verbosity(config: &mut Config, verbose: bool) {
    if verbose {
        config.logging.level = "debug".to_string();
    }
}

fn check(error: ErrorCode, what: &str) -> Result<()> {
    if !error.is_success() {
        bail!("{} failed: {} (code {})", what, error, error.code());
    }
    Ok(())
}

fn open(driver: &mut Driver, id: i64) -> Result<()> {
    let mut error = ErrorCode::Success;
    driver.open_device(id, &mut error);
    check(error, "opening device")
}

fn first_feature(driver: &Driver, id: i64, kind: FeatureKind) -> Result<i64> {
    let mut error = ErrorCode::Success;
    let mut ids = [0i64; 8];
    let n = driver.get_feature_ids(id, kind, &mut ids, &mut error);
    check(error, "listing features")?;
    if n == 0 {
        bail!("device {} has no {} feature", id, kind);
    }
    Ok(ids[0])
}

fn print<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
