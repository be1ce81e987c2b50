/*!
 * Configuration management for LumaFlow.
 *
 * This module provides functionality to load, validate, and access configuration
 * settings for LumaFlow components.
 */
use std::path::Path;
use std::time::Duration;

use config::{Config as ConfigLib, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Core configuration for LumaFlow
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General configuration
    #[serde(default)]
    pub general: GeneralConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Transport configuration
    #[serde(default)]
    pub transport: TransportConfig,

    /// Discovery configuration
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Thermoelectric cooler defaults
    #[serde(default)]
    pub thermo_electric: ThermoElectricConfig,

    /// Devices added at an explicit location rather than probed
    #[serde(default)]
    pub devices: Vec<SpecifiedDeviceConfig>,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Application environment (development, production, etc.)
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to include the event target in log lines
    #[serde(default = "default_with_target")]
    pub with_target: bool,
}

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Read timeout for stream transports in milliseconds (0 means wait indefinitely)
    #[serde(default)]
    pub read_timeout_ms: u64,

    /// TCP connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Baud rate used when a serial location does not name one
    #[serde(default = "default_baud_rate")]
    pub default_baud_rate: u32,
}

/// Discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Whether USB buses are probed during a discovery pass
    #[serde(default = "default_usb_enabled")]
    pub usb_enabled: bool,
}

/// Thermoelectric cooler defaults pushed to hardware on initialization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThermoElectricConfig {
    /// Cooler enable state after initialization
    #[serde(default)]
    pub default_enable: bool,

    /// Set-point in degrees Celsius after initialization
    #[serde(default = "default_setpoint_celsius")]
    pub default_setpoint_celsius: f64,
}

/// A device added by explicit location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecifiedDeviceConfig {
    /// Device kind name, as registered in the kind registry
    pub kind: String,

    /// Location string, e.g. `tcp://192.168.1.20:57357` or `serial:/dev/ttyUSB0@115200`
    pub location: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            environment: default_environment(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            with_target: default_with_target(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 0, // Wait indefinitely
            connect_timeout_ms: default_connect_timeout_ms(),
            default_baud_rate: default_baud_rate(),
        }
    }
}

impl TransportConfig {
    /// Read timeout as a duration, `None` meaning an indefinite wait
    pub fn read_timeout(&self) -> Option<Duration> {
        match self.read_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Connect timeout as a duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            usb_enabled: default_usb_enabled(),
        }
    }
}

impl Default for ThermoElectricConfig {
    fn default() -> Self {
        Self {
            default_enable: false,
            default_setpoint_celsius: default_setpoint_celsius(),
        }
    }
}

fn default_app_name() -> String {
    "lumaflow".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_with_target() -> bool {
    true
}

fn default_connect_timeout_ms() -> u64 {
    3000
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_usb_enabled() -> bool {
    true
}

fn default_setpoint_celsius() -> f64 {
    15.0
}

/// A builder for creating a configuration
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_file: Option<String>,
    environment_prefix: Option<String>,
}

impl ConfigBuilder {
    /// Create a new ConfigBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the config file path
    pub fn with_config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Set the environment variable prefix for configuration
    pub fn with_environment_prefix<S: AsRef<str>>(mut self, prefix: S) -> Self {
        self.environment_prefix = Some(prefix.as_ref().to_string());
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<Config> {
        let mut config_builder = ConfigLib::builder();

        // Start with default values
        let default_config = Config::default();
        config_builder = config_builder.add_source(
            ConfigLib::try_from(&default_config)
                .map_err(|e| Error::config(format!("Failed to create default config: {}", e)))?,
        );

        if let Some(config_file) = self.config_file {
            let path = Path::new(&config_file);
            if path.exists() {
                debug!("Loading configuration from {}", config_file);
                config_builder = config_builder.add_source(File::with_name(&config_file));
            } else {
                debug!("Configuration file {} does not exist, using defaults", config_file);
            }
        }

        if let Some(prefix) = self.environment_prefix {
            debug!("Loading configuration from environment variables with prefix {}", prefix);
            config_builder = config_builder.add_source(
                Environment::with_prefix(&prefix)
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config_lib = config_builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build configuration: {}", e)))?;

        let config: Config = config_lib
            .try_deserialize()
            .map_err(|e| Error::config(format!("Failed to deserialize configuration: {}", e)))?;

        info!(
            specified_devices = config.devices.len(),
            "Configuration loaded successfully"
        );
        Ok(config)
    }
}
