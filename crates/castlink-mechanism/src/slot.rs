//! Single-subscriber callback slots.
//!
//! Event delivery in castlink is single-slot: assigning a handler replaces
//! whatever was there before, and at most one subscriber observes an event.
//! Emission is queued onto the runtime rather than run inside the
//! triggering call, so a handler never observes engine state mid-mutation.

use std::sync::{Arc, Mutex};

type Callback<T> = Arc<dyn Fn(T) + Send + Sync>;

/// A last-assignment-wins handler slot.
///
/// Cloning an `EventSlot` yields another handle to the same slot.
pub struct EventSlot<T> {
    slot: Arc<Mutex<Option<Callback<T>>>>,
}

impl<T> Clone for EventSlot<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> Default for EventSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventSlot<T> {
    /// Create an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Install a handler, replacing any previous one.
    pub fn set(&self, callback: impl Fn(T) + Send + Sync + 'static) {
        *self.slot.lock().unwrap() = Some(Arc::new(callback));
    }

    /// Remove the current handler, if any.
    pub fn clear(&self) {
        *self.slot.lock().unwrap() = None;
    }
}

impl<T: Send + 'static> EventSlot<T> {
    /// Deliver `value` to the current handler on a queued task.
    ///
    /// The handler in place at delivery time is invoked, not the one in
    /// place at emit time. Must be called from within a tokio runtime.
    pub fn emit(&self, value: T) {
        let slot = Arc::clone(&self.slot);
        tokio::spawn(async move {
            let callback = slot.lock().unwrap().clone();
            if let Some(callback) = callback {
                callback(value);
            }
        });
    }
}
