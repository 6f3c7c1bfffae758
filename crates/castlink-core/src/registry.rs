//! Mechanism registry.

use std::sync::{Arc, RwLock};

use castlink_mechanism::Mechanism;
use tracing::debug;

/// Registered transport mechanisms, in registration order.
///
/// Append-only after startup: mechanisms are never removed, and discovery
/// results are concatenated in registration order so the candidate list is
/// deterministic. Reads take a snapshot; the lock is never held across a
/// suspension point.
pub struct MechanismRegistry {
    mechanisms: RwLock<Vec<Arc<dyn Mechanism>>>,
}

impl MechanismRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            mechanisms: RwLock::new(Vec::new()),
        }
    }

    /// Append a mechanism.
    pub fn register(&self, mechanism: Arc<dyn Mechanism>) {
        debug!(mechanism = mechanism.name(), "registered mechanism");
        self.mechanisms.write().unwrap().push(mechanism);
    }

    /// Snapshot of all registered mechanisms, in registration order.
    pub fn snapshot(&self) -> Vec<Arc<dyn Mechanism>> {
        self.mechanisms.read().unwrap().clone()
    }

    /// Number of registered mechanisms.
    pub fn len(&self) -> usize {
        self.mechanisms.read().unwrap().len()
    }

    /// Whether no mechanism is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MechanismRegistry {
    fn default() -> Self {
        Self::new()
    }
}
