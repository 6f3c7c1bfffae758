//! Receiver-side monitoring engine.
//!
//! Aggregates incoming connection attempts across every registered
//! mechanism into one insertion-ordered list, and answers the two questions
//! a receiving page asks: "give me the first controller that ever connects"
//! and "give me everything connected so far".

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use castlink_mechanism::{EventSlot, IncomingController};
use castlink_types::ConnectionId;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::connection::Connection;
use crate::registry::MechanismRegistry;

struct ReceiverInner {
    /// Incoming connections, arrival order.
    connections: Mutex<Vec<Connection>>,
    /// First connection ever to arrive; set once.
    first: watch::Sender<Option<Connection>>,
    next_id: AtomicU64,
    on_incoming: EventSlot<Connection>,
}

/// Receiver-side incoming-connection engine.
#[derive(Clone)]
pub struct ReceiverMonitor {
    inner: Arc<ReceiverInner>,
}

impl ReceiverMonitor {
    /// Start monitoring: every registered mechanism is asked to watch for
    /// inbound controllers, and one forwarder task is spawned per
    /// mechanism that can.
    pub(crate) async fn start(registry: &MechanismRegistry) -> Self {
        let (first, _) = watch::channel(None);
        let monitor = Self {
            inner: Arc::new(ReceiverInner {
                connections: Mutex::new(Vec::new()),
                first,
                next_id: AtomicU64::new(0),
                on_incoming: EventSlot::new(),
            }),
        };

        for mechanism in registry.snapshot() {
            let Some(mut incoming) = mechanism.monitor_incoming().await else {
                continue;
            };
            let name = mechanism.name().to_string();
            let inner = Arc::clone(&monitor.inner);
            tokio::spawn(async move {
                while let Some(controller) = incoming.recv().await {
                    debug!(mechanism = %name, controller = %controller.name, "incoming controller");
                    accept(&inner, controller);
                }
            });
        }
        monitor
    }

    /// Install the incoming-connection handler (single slot, last
    /// assignment wins).
    pub fn set_on_incoming(&self, callback: impl Fn(Connection) + Send + Sync + 'static) {
        self.inner.on_incoming.set(callback);
    }

    /// The first incoming connection this monitor ever saw.
    ///
    /// Resolves immediately when one already exists; otherwise waits for
    /// the next arrival.
    pub async fn connection(&self) -> Connection {
        let mut first = self.inner.first.subscribe();
        loop {
            if let Some(connection) = first.borrow_and_update().clone() {
                return connection;
            }
            if first.changed().await.is_err() {
                // Monitor torn down without ever seeing a controller: there
                // is nothing to resolve with, now or ever.
                std::future::pending::<()>().await;
            }
        }
    }

    /// Snapshot of all incoming connections, arrival order. Never blocks.
    pub fn connections(&self) -> Vec<Connection> {
        self.inner.connections.lock().unwrap().clone()
    }
}

/// Track one inbound controller: wrap, register, announce, connect.
fn accept(inner: &Arc<ReceiverInner>, controller: IncomingController) {
    let id = ConnectionId(inner.next_id.fetch_add(1, Ordering::SeqCst));
    let connection = Connection::new(id, controller.url, controller.endpoint);

    inner.connections.lock().unwrap().push(connection.clone());
    inner.first.send_if_modified(|slot| {
        if slot.is_none() {
            *slot = Some(connection.clone());
            true
        } else {
            false
        }
    });
    inner.on_incoming.emit(connection.clone());
    connection.establish_in_background();
    info!(id = %id, controller = %connection.url(), "incoming connection registered");
}
