/*!
 * Prelude module for LumaFlow Core.
 *
 * This module re-exports commonly used types and functions from the LumaFlow Core crate
 * to make them easier to import.
 */

// Re-export error types
pub use crate::error::{Error, Result};

// Re-export identifier types
pub use crate::types::{DeviceId, FeatureId, IdCounter};

// Re-export config types
pub use crate::config::{Config, ConfigBuilder};

// Re-export logging macros
pub use tracing::{debug, error, info, trace, warn};

// Re-export core initialization
pub use crate::init;
