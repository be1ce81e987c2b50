/*!
 * LumaFlow Core
 *
 * This crate provides the shared foundations for the LumaFlow driver:
 * configuration, logging, the core error type and identifier types.
 */

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod prelude;
pub mod types;

/// LumaFlow core crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library initialization with the default logging configuration
pub fn init() -> Result<(), error::Error> {
    logging::init()?;
    tracing::info!("LumaFlow Core {} initialized", VERSION);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
