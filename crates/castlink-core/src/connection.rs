//! Connection handles and channel reconciliation.
//!
//! A connection is the durable handle on a presentation: it owns one remote
//! endpoint for its whole life and survives any number of channels coming
//! and going underneath it.

use std::sync::{Arc, Mutex};

use castlink_mechanism::{Channel, EventSlot, RemoteEndpoint};
use castlink_types::{ConnectionId, ConnectionState, Payload, PresentError};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, info};

/// A presentation connection.
///
/// Cheap to clone; all clones share one underlying connection. Equality is
/// identity: two handles compare equal iff they refer to the same
/// connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    id: ConnectionId,
    url: String,
    endpoint: Arc<dyn RemoteEndpoint>,
    state: watch::Sender<ConnectionState>,
    /// The current channel, if any. Never held across a suspension point.
    channel: Mutex<Option<Channel>>,
    /// Serialises channel creation so concurrent callers coalesce onto one
    /// in-flight creation.
    creation_gate: AsyncMutex<()>,
    on_message: EventSlot<Payload>,
}

impl ConnectionInner {
    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Apply a state transition with a single notification. `Terminated`
    /// is terminal: nothing transitions out of it, ever.
    fn transition(&self, next: ConnectionState) -> bool {
        self.state.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                return false;
            }
            *current = next;
            true
        })
    }
}

impl Connection {
    /// Wrap a remote endpoint in a new connection.
    ///
    /// The connection starts in `Connecting`: both engines begin channel
    /// establishment immediately after creating one.
    pub(crate) fn new(id: ConnectionId, url: String, endpoint: Arc<dyn RemoteEndpoint>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Self {
            inner: Arc::new(ConnectionInner {
                id,
                url,
                endpoint,
                state,
                channel: Mutex::new(None),
                creation_gate: AsyncMutex::new(()),
                on_message: EventSlot::new(),
            }),
        }
    }

    /// Connection id, unique within the engine that allocated it.
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// URL of the presentation this connection belongs to.
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Install the message handler (single slot, last assignment wins).
    pub fn set_on_message(&self, callback: impl Fn(Payload) + Send + Sync + 'static) {
        self.inner.on_message.set(callback);
    }

    /// Obtain the connection's channel, establishing one if needed.
    ///
    /// Idempotent while a live channel exists: every caller gets the same
    /// channel, and concurrent callers before resolution coalesce onto a
    /// single creation. A lost channel is replaced by a fresh one on the
    /// next call — channels are one-shot, connections persist.
    pub async fn open_channel(&self) -> Result<Channel, PresentError> {
        let _gate = self.inner.creation_gate.lock().await;

        if self.inner.state().is_terminal() {
            return Err(PresentError::InvalidState(
                "connection is terminated".to_string(),
            ));
        }
        if let Some(channel) = self.current_channel() {
            if channel.state().is_live() {
                return Ok(channel);
            }
        }

        self.inner.transition(ConnectionState::Connecting);
        let channel = self.inner.endpoint.create_channel().await?;

        // Creation may have raced with terminate().
        if self.inner.state().is_terminal() {
            channel.close();
            return Err(PresentError::InvalidState(
                "connection is terminated".to_string(),
            ));
        }

        *self.inner.channel.lock().unwrap() = Some(channel.clone());
        self.watch_channel(channel.clone());
        self.inner.transition(channel.state().into());
        debug!(id = %self.inner.id, "channel established");
        Ok(channel)
    }

    /// Send a message over the connection's channel.
    ///
    /// Fails with `InvalidState` when no channel has been established, and
    /// with a distinct `InvalidState` when a channel exists but is not
    /// connected.
    pub fn send(&self, payload: impl Into<Payload>) -> Result<(), PresentError> {
        let Some(channel) = self.current_channel() else {
            return Err(PresentError::InvalidState(
                "no channel established on this connection".to_string(),
            ));
        };
        let state = self.inner.state();
        if state != ConnectionState::Connected {
            return Err(PresentError::InvalidState(format!(
                "channel present but not connected (connection is {state})"
            )));
        }
        channel.send(payload)
    }

    /// Close the connection gracefully.
    ///
    /// Permitted while connecting or connected; the channel (if any) is
    /// closed and the connection settles in `Closed`, ready for a later
    /// reconnect.
    pub fn close(&self) -> Result<(), PresentError> {
        let state = self.inner.state();
        if !state.can_close() {
            return Err(PresentError::InvalidState(format!(
                "cannot close a {state} connection"
            )));
        }
        if let Some(channel) = self.inner.channel.lock().unwrap().take() {
            channel.close();
        }
        self.inner.transition(ConnectionState::Closed);
        Ok(())
    }

    /// Terminate the presentation.
    ///
    /// Closes any live channel, runs mechanism-specific teardown on the
    /// remote endpoint, and forces the terminal `Terminated` state with a
    /// single notification. Irreversible.
    pub async fn terminate(&self) {
        let changed = self.inner.transition(ConnectionState::Terminated);
        if let Some(channel) = self.inner.channel.lock().unwrap().take() {
            channel.close();
        }
        self.inner.endpoint.terminate().await;
        if changed {
            info!(id = %self.inner.id, url = %self.inner.url, "connection terminated");
        }
    }

    /// Kick off channel establishment without waiting for it.
    pub(crate) fn establish_in_background(&self) {
        let conn = self.clone();
        tokio::spawn(async move {
            if let Err(e) = conn.open_channel().await {
                debug!(id = %conn.id(), error = %e, "channel establishment failed");
            }
        });
    }

    fn current_channel(&self) -> Option<Channel> {
        self.inner.channel.lock().unwrap().clone()
    }

    /// Mirror the channel's state into the connection until the channel
    /// dies, then drop the reference so the next `open_channel` builds a
    /// fresh one.
    fn watch_channel(&self, channel: Channel) {
        let slot = self.inner.on_message.clone();
        channel.set_on_message(move |payload| slot.emit(payload));

        let weak = Arc::downgrade(&self.inner);
        let mut state_rx = channel.subscribe();
        tokio::spawn(async move {
            loop {
                if state_rx.changed().await.is_err() {
                    break;
                }
                let channel_state = *state_rx.borrow_and_update();
                let Some(inner) = weak.upgrade() else { break };
                if inner.state().is_terminal() {
                    break;
                }
                inner.transition(channel_state.into());
                if !channel_state.is_live() {
                    let mut slot = inner.channel.lock().unwrap();
                    if slot.as_ref().is_some_and(|held| held.same(&channel)) {
                        *slot = None;
                    }
                    break;
                }
            }
        });
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Connection {}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
