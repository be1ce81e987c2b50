/*!
 * Logging functionality for LumaFlow.
 *
 * This module provides tracing setup and utilities for consistent logging
 * across the LumaFlow crates.
 */
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Initialize the logging system with default configuration
pub fn init() -> Result<()> {
    init_with_config(&LoggingConfig::default())
}

/// Initialize the logging system from a logging configuration section
///
/// Events go to stderr. `RUST_LOG`, when set, takes precedence over the
/// configured level.
pub fn init_with_config(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| Error::logging(format!("Invalid log filter {}: {}", config.level, e)))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(config.with_target))
        .with(filter)
        .try_init()
        .map_err(|e| Error::logging(format!("Failed to initialize logging: {}", e)))?;

    Ok(())
}

/// Initialize the logging system with a specific filter
///
/// # Arguments
///
/// * `filter` - The log filter string (e.g., "info", "debug", "lumaflow_devices=trace")
pub fn init_with_filter(filter: &str) -> Result<()> {
    init_with_config(&LoggingConfig {
        level: filter.to_string(),
        ..LoggingConfig::default()
    })
}

/// A type alias for a tracing span
pub type Span = tracing::Span;

/// Create a new span for a component
///
/// # Arguments
///
/// * `name` - The name of the component
/// * `id` - An optional ID for the component instance
pub fn component_span(name: &str, id: Option<u64>) -> Span {
    match id {
        Some(id) => tracing::info_span!("component", name = %name, id = id),
        None => tracing::info_span!("component", name = %name),
    }
}

/// Create a new span for an operation
///
/// # Arguments
///
/// * `name` - The name of the operation
/// * `component` - The component performing the operation
pub fn operation_span(name: &str, component: &str) -> Span {
    tracing::info_span!("operation", name = %name, component = %component)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_reports_error() {
        // Only one global subscriber may be installed per process
        let first = init();
        let second = init();
        assert!(first.is_err() || second.is_err());
    }

    #[test]
    fn test_spans_are_disabled_without_subscriber_interest() {
        let span = component_span("usb", Some(3));
        let _entered = span.enter();
        let op = operation_span("probe", "usb");
        drop(op);
    }
}
