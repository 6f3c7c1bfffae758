//! In-process loopback mechanism.
//!
//! Presents to a "display" hosted in the same process: navigation reports
//! an incoming controller on the receiving side, and the two peers exchange
//! messages over cross-wired in-process channels. Used by the CLI demo and
//! by integration tests; also the reference for how window-style mechanisms
//! (same-UA second surface) plug into the engine.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use castlink_types::{DisplayInfo, PresentError, PresentOptions};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::channel::{loopback_pair, Channel};
use crate::{Display, IncomingController, Mechanism, RemoteEndpoint};

/// Buffered launches tolerated before the receiving side starts monitoring.
const INCOMING_BUFFER: usize = 16;

/// Which end of a loopback link an endpoint drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Controller,
    Receiver,
}

/// Rendezvous for channel halves between the two in-process peers.
///
/// Whoever asks first creates a channel pair and leaves the partner half
/// behind; the other side picks it up on its own `create_channel` call.
struct Link {
    capacity: usize,
    pending: Mutex<Option<(Side, Channel)>>,
}

impl Link {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            pending: Mutex::new(None),
        }
    }

    fn obtain(&self, side: Side) -> Channel {
        let mut pending = self.pending.lock().unwrap();
        if let Some((stored_side, stored)) = pending.take() {
            if stored_side != side {
                return stored;
            }
            // Our own earlier half went stale (channel churn before the
            // peer picked it up); dropping it lets the old pair die.
        }
        let (ours, theirs) = loopback_pair(self.capacity);
        *pending = Some((side, theirs));
        ours
    }

    fn clear(&self) {
        self.pending.lock().unwrap().take();
    }
}

struct LoopbackPeer {
    link: Arc<Link>,
    side: Side,
}

#[async_trait]
impl RemoteEndpoint for LoopbackPeer {
    async fn create_channel(&self) -> Result<Channel, PresentError> {
        Ok(self.link.obtain(self.side))
    }

    async fn terminate(&self) {
        self.link.clear();
    }
}

/// The single display a loopback mechanism advertises.
pub struct LoopbackDisplay {
    info: DisplayInfo,
    shared: Arc<LoopbackShared>,
    link: Mutex<Option<Arc<Link>>>,
}

#[async_trait]
impl RemoteEndpoint for LoopbackDisplay {
    async fn create_channel(&self) -> Result<Channel, PresentError> {
        let link = self.link.lock().unwrap().clone();
        match link {
            Some(link) => Ok(link.obtain(Side::Controller)),
            // Not navigated: no transport path exists and none is coming.
            None => std::future::pending().await,
        }
    }

    async fn terminate(&self) {
        if let Some(link) = self.link.lock().unwrap().take() {
            link.clear();
        }
        debug!(display = %self.info.name, "loopback presentation terminated");
    }
}

#[async_trait]
impl Display for LoopbackDisplay {
    fn info(&self) -> &DisplayInfo {
        &self.info
    }

    async fn navigate(&self, url: &str) -> Result<(), PresentError> {
        let link = Arc::new(Link::new(self.shared.capacity));
        *self.link.lock().unwrap() = Some(Arc::clone(&link));

        let controller = IncomingController {
            url: url.to_string(),
            name: format!("{} (local)", self.info.name),
            endpoint: Arc::new(LoopbackPeer {
                link,
                side: Side::Receiver,
            }),
        };
        // Fire-and-forget: if nothing monitors the receiving side the
        // launch still succeeds, channel establishment just never finishes.
        let _ = self.shared.incoming_tx.try_send(controller);
        info!(url, display = %self.info.name, "loopback display navigated");
        Ok(())
    }

    fn as_endpoint(self: Arc<Self>) -> Arc<dyn RemoteEndpoint> {
        self
    }
}

struct LoopbackShared {
    capacity: usize,
    incoming_tx: mpsc::Sender<IncomingController>,
}

/// An in-process mechanism with one concrete display.
pub struct LoopbackMechanism {
    display: Arc<LoopbackDisplay>,
    incoming_rx: Mutex<Option<mpsc::Receiver<IncomingController>>>,
}

impl LoopbackMechanism {
    /// Create a loopback mechanism whose display carries `display_name`.
    /// `capacity` is the per-direction channel buffer depth.
    #[must_use]
    pub fn new(display_name: impl Into<String>, capacity: usize) -> Self {
        let (incoming_tx, incoming_rx) = mpsc::channel(INCOMING_BUFFER);
        let shared = Arc::new(LoopbackShared {
            capacity,
            incoming_tx,
        });
        let display = Arc::new(LoopbackDisplay {
            info: DisplayInfo::concrete(display_name, "loopback"),
            shared,
            link: Mutex::new(None),
        });
        Self {
            display,
            incoming_rx: Mutex::new(Some(incoming_rx)),
        }
    }
}

#[async_trait]
impl Mechanism for LoopbackMechanism {
    fn name(&self) -> &str {
        "loopback"
    }

    async fn available_displays(
        &self,
        _url: &str,
        _options: &PresentOptions,
    ) -> Vec<Arc<dyn Display>> {
        vec![Arc::clone(&self.display) as Arc<dyn Display>]
    }

    async fn monitor_incoming(&self) -> Option<mpsc::Receiver<IncomingController>> {
        self.incoming_rx.lock().unwrap().take()
    }
}
