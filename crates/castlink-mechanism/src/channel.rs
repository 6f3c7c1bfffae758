//! The message channel shared between the engine and mechanism adapters.
//!
//! A channel is built as a pair: the [`Channel`] half handed to the engine
//! (send, close, observe state, receive messages) and the [`ChannelDriver`]
//! half kept by the adapter that owns the transport (set state, deliver
//! inbound payloads, drain outbound payloads). Channels are one-shot: once
//! a channel leaves its live states it can never be reconnected — adapters
//! create a fresh pair for any future need.

use std::sync::Arc;

use castlink_types::{ChannelState, Payload, PresentError};
use tokio::sync::{mpsc, watch};
use tracing::trace;

use crate::slot::EventSlot;

struct ChannelShared {
    state: watch::Sender<ChannelState>,
    on_message: EventSlot<Payload>,
}

impl ChannelShared {
    fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Apply a state transition, enforcing the one-shot lifecycle:
    /// `Closed` and `Terminated` are final, and nothing ever returns to
    /// `Connecting`. Returns whether the state changed (and was notified).
    fn transition(&self, next: ChannelState) -> bool {
        self.state.send_if_modified(|current| {
            if !current.is_live() || *current == next || next == ChannelState::Connecting {
                return false;
            }
            *current = next;
            true
        })
    }

    fn deliver(&self, payload: Payload) {
        if self.state().can_send() {
            self.on_message.emit(payload);
        } else {
            // No buffering: a message arriving outside Connected is dropped.
            trace!(state = %self.state(), "dropping inbound message");
        }
    }
}

/// Create a channel pair with the given outbound buffer capacity.
///
/// The pair starts in [`ChannelState::Connecting`]; the driver marks it
/// connected once the transport path is live.
#[must_use]
pub fn channel(capacity: usize) -> (Channel, ChannelDriver) {
    let (state, _) = watch::channel(ChannelState::Connecting);
    let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
    let shared = Arc::new(ChannelShared {
        state,
        on_message: EventSlot::new(),
    });
    let channel = Channel {
        shared: Arc::clone(&shared),
        outbound: outbound_tx,
    };
    let driver = ChannelDriver {
        shared,
        outbound_rx,
    };
    (channel, driver)
}

/// Engine-side half of a message channel.
#[derive(Clone)]
pub struct Channel {
    shared: Arc<ChannelShared>,
    outbound: mpsc::Sender<Payload>,
}

impl Channel {
    /// Current channel state.
    pub fn state(&self) -> ChannelState {
        self.shared.state()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.shared.state.subscribe()
    }

    /// Send a payload to the remote peer.
    ///
    /// Fails with `InvalidState` unless the channel is connected; a
    /// transport refusal on a connected channel surfaces as `Operation`.
    pub fn send(&self, payload: impl Into<Payload>) -> Result<(), PresentError> {
        let state = self.state();
        if !state.can_send() {
            return Err(PresentError::InvalidState(format!(
                "cannot send on a {state} channel"
            )));
        }
        self.outbound.try_send(payload.into()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                PresentError::Operation("channel transport backlogged".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                PresentError::Operation("channel transport gone".to_string())
            }
        })
    }

    /// Close the channel.
    ///
    /// Transitions `Connected -> Closed` with exactly one state
    /// notification; a no-op in any other state.
    pub fn close(&self) {
        let closed = self.shared.state.send_if_modified(|current| {
            if *current == ChannelState::Connected {
                *current = ChannelState::Closed;
                true
            } else {
                false
            }
        });
        if closed {
            trace!("channel closed by local side");
        }
    }

    /// Install the message handler (single slot, last assignment wins).
    pub fn set_on_message(&self, callback: impl Fn(Payload) + Send + Sync + 'static) {
        self.shared.on_message.set(callback);
    }

    /// Whether two handles refer to the same underlying channel.
    pub fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Adapter-side half of a message channel.
pub struct ChannelDriver {
    shared: Arc<ChannelShared>,
    outbound_rx: mpsc::Receiver<Payload>,
}

impl ChannelDriver {
    /// Apply a state transition. Returns whether the state changed.
    ///
    /// `Closed` and `Terminated` are final; a transition back to
    /// `Connecting` is always refused.
    pub fn set_state(&self, next: ChannelState) -> bool {
        self.shared.transition(next)
    }

    /// Current channel state.
    pub fn state(&self) -> ChannelState {
        self.shared.state()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.shared.state.subscribe()
    }

    /// Deliver an inbound payload to the engine side.
    ///
    /// Dropped unless the channel is connected.
    pub fn deliver(&self, payload: impl Into<Payload>) {
        self.shared.deliver(payload.into());
    }

    /// Next payload the engine side sent, or `None` once every engine-side
    /// handle has been dropped.
    pub async fn recv(&mut self) -> Option<Payload> {
        self.outbound_rx.recv().await
    }

    /// A clonable handle for delivering and steering state from other
    /// tasks.
    #[must_use]
    pub fn handle(&self) -> ChannelDriverHandle {
        ChannelDriverHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Clonable adapter-side handle: state and delivery without the outbound
/// queue.
#[derive(Clone)]
pub struct ChannelDriverHandle {
    shared: Arc<ChannelShared>,
}

impl ChannelDriverHandle {
    /// Apply a state transition. Returns whether the state changed.
    pub fn set_state(&self, next: ChannelState) -> bool {
        self.shared.transition(next)
    }

    /// Current channel state.
    pub fn state(&self) -> ChannelState {
        self.shared.state()
    }

    /// Deliver an inbound payload to the engine side.
    pub fn deliver(&self, payload: impl Into<Payload>) {
        self.shared.deliver(payload.into());
    }
}

/// Create two channels cross-wired in process: payloads sent on one are
/// delivered as inbound messages on the other, and closing either side
/// closes both. Both start out connected.
#[must_use]
pub fn loopback_pair(capacity: usize) -> (Channel, Channel) {
    let (a, mut driver_a) = channel(capacity);
    let (b, mut driver_b) = channel(capacity);
    driver_a.set_state(ChannelState::Connected);
    driver_b.set_state(ChannelState::Connected);

    let handle_a = driver_a.handle();
    let handle_b = driver_b.handle();
    tokio::spawn(pump(driver_a, handle_b));
    tokio::spawn(pump(driver_b, handle_a));
    (a, b)
}

/// Forward one direction of a loopback pair until either side dies.
async fn pump(mut local: ChannelDriver, remote: ChannelDriverHandle) {
    let mut state_rx = local.subscribe();
    loop {
        tokio::select! {
            payload = local.recv() => match payload {
                Some(payload) => remote.deliver(payload),
                None => {
                    // Engine side dropped its handles.
                    local.set_state(ChannelState::Closed);
                    remote.set_state(ChannelState::Closed);
                    break;
                }
            },
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *state_rx.borrow_and_update();
                if !state.is_live() {
                    remote.set_state(state);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_requires_connected() {
        let (channel, driver) = channel(8);
        assert_eq!(channel.state(), ChannelState::Connecting);
        let err = channel.send("too early").unwrap_err();
        assert!(matches!(err, PresentError::InvalidState(_)));

        driver.set_state(ChannelState::Connected);
        channel.send("now fine").unwrap();
    }

    #[tokio::test]
    async fn close_is_noop_unless_connected() {
        let (channel, driver) = channel(8);
        channel.close();
        assert_eq!(channel.state(), ChannelState::Connecting);

        driver.set_state(ChannelState::Connected);
        channel.close();
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn closed_channel_is_never_resurrected() {
        let (channel, driver) = channel(8);
        driver.set_state(ChannelState::Connected);
        channel.close();
        assert!(!driver.set_state(ChannelState::Connected));
        assert!(!driver.set_state(ChannelState::Connecting));
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn driver_drains_outbound() {
        let (channel, mut driver) = channel(8);
        driver.set_state(ChannelState::Connected);
        channel.send("one").unwrap();
        channel.send("two").unwrap();
        assert_eq!(driver.recv().await, Some(Payload::from("one")));
        assert_eq!(driver.recv().await, Some(Payload::from("two")));
    }

    #[tokio::test]
    async fn loopback_pair_crosses_messages() {
        let (a, b) = loopback_pair(8);
        let (tx, mut rx) = mpsc::channel(8);
        b.set_on_message(move |payload| {
            let _ = tx.try_send(payload);
        });

        a.send("ping").unwrap();
        let got = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out")
            .expect("channel dropped");
        assert_eq!(got, Payload::from("ping"));
    }

    #[tokio::test]
    async fn loopback_close_propagates() {
        let (a, b) = loopback_pair(8);
        a.close();
        let mut rx = b.subscribe();
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while b.state() != ChannelState::Closed {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .expect("peer never observed close");
        assert_eq!(b.state(), ChannelState::Closed);
    }
}
