//! Display descriptor types.

use serde::{Deserialize, Serialize};

use crate::id::DisplayId;

/// Whether a display entry names one device or a whole class of devices.
///
/// Mechanisms that cannot enumerate hardware (broadcast beacons, visual
/// codes) advertise a single `Class` entry; selecting it does not guarantee
/// that any specific device responds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisplayKind {
    /// One concrete, addressable device.
    Concrete,
    /// A class of devices reachable through the mechanism.
    Class,
}

/// Describes a selectable presentation target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayInfo {
    /// Stable identifier assigned by the advertising mechanism.
    pub id: DisplayId,
    /// Human-readable name (e.g. "Living Room TV").
    pub name: String,
    /// Name of the mechanism that advertised this display.
    pub mechanism: String,
    /// Concrete device or device class.
    pub kind: DisplayKind,
}

impl DisplayInfo {
    /// Convenience constructor for a concrete device entry.
    #[must_use]
    pub fn concrete(name: impl Into<String>, mechanism: impl Into<String>) -> Self {
        Self {
            id: DisplayId::new(),
            name: name.into(),
            mechanism: mechanism.into(),
            kind: DisplayKind::Concrete,
        }
    }

    /// Convenience constructor for a device-class entry.
    #[must_use]
    pub fn class(name: impl Into<String>, mechanism: impl Into<String>) -> Self {
        Self {
            id: DisplayId::new(),
            name: name.into(),
            mechanism: mechanism.into(),
            kind: DisplayKind::Class,
        }
    }
}
