//! Presentation request options.

use serde::{Deserialize, Serialize};

/// Options for a presentation request, passed through to every mechanism
/// during discovery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentOptions {
    /// Accept displays for which no message channel can be guaranteed
    /// (invitation-based mechanisms: broadcast beacons, visual codes).
    #[serde(default)]
    pub is_channel_optional: bool,
}

impl PresentOptions {
    /// Options accepting channel-less displays.
    #[must_use]
    pub fn channel_optional() -> Self {
        Self {
            is_channel_optional: true,
        }
    }
}
