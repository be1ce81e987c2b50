/*!
 * Core data types for LumaFlow.
 *
 * This module defines the identifier types handed out to callers.
 */
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Caller-visible identifier of one device adapter
///
/// Identifiers are issued by an [`IdCounter`] and are never reused by that
/// counter. The value always fits in an `i64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(u64);

impl DeviceId {
    /// Wrap a raw identifier value
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw identifier value
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<DeviceId> for i64 {
    fn from(id: DeviceId) -> Self {
        // The counter stops at i64::MAX, so this never wraps
        id.0 as i64
    }
}

impl TryFrom<i64> for DeviceId {
    type Error = i64;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        u64::try_from(raw).map(DeviceId).map_err(|_| raw)
    }
}

/// Identifier of one feature instance within a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FeatureId(u32);

impl FeatureId {
    /// Wrap a raw identifier value
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw identifier value
    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic source of [`DeviceId`]s
///
/// The counter is pre-incremented, so the first identifier is 1 and 0 is
/// never issued. It is owned by whoever assigns identifiers; there is no
/// process-wide instance.
#[derive(Debug, Default)]
pub struct IdCounter {
    last: AtomicU64,
}

impl IdCounter {
    /// Create a counter that has issued nothing yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next identifier
    ///
    /// Returns `None` once the `i64` range is exhausted.
    pub fn next(&self) -> Option<DeviceId> {
        let next = self.last.fetch_add(1, Ordering::SeqCst).checked_add(1)?;
        if next > i64::MAX as u64 {
            return None;
        }
        Some(DeviceId(next))
    }

    /// The most recently issued identifier, if any
    pub fn last(&self) -> Option<DeviceId> {
        match self.last.load(Ordering::SeqCst) {
            0 => None,
            raw => Some(DeviceId(raw)),
        }
    }
}
