//! Identifier types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a discovered display.
///
/// Wraps a UUID v4. A display representing a *class* of devices (rather
/// than one concrete device) still gets a stable ID for the lifetime of the
/// mechanism that advertised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DisplayId(Uuid);

impl DisplayId {
    /// Generate a new random display ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a display ID from an existing UUID.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for DisplayId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DisplayId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a connection within one session engine.
///
/// Assigned monotonically starting at zero. Only unique within the engine
/// that allocated it — reconnection look-ups are keyed by `(url, id)`, and
/// neither side's ids survive a process restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
