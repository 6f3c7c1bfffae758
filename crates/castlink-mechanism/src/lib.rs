//! Mechanism adapter boundary for castlink.
//!
//! This crate defines the [`Mechanism`], [`Display`], and [`RemoteEndpoint`]
//! traits that transport adapters must implement, plus the [`Channel`]
//! message pipe the engine and adapters share. Concrete adapters (cast SDKs,
//! beacon daemons, window openers) live outside the workspace; the
//! in-process [`loopback`] mechanism and the feature-gated [`mock`] adapters
//! are the two reference implementations.

use std::sync::Arc;

use async_trait::async_trait;
use castlink_types::{DisplayInfo, PresentError, PresentOptions};
use tokio::sync::mpsc;

pub mod channel;
pub mod loopback;
#[cfg(feature = "mock")]
pub mod mock;
pub mod slot;

pub use channel::{channel, loopback_pair, Channel, ChannelDriver, ChannelDriverHandle};
pub use loopback::LoopbackMechanism;
pub use slot::EventSlot;

/// A handle to a remote peer: the display from the controller's side, or the
/// controller from the receiver's side.
///
/// Owned exclusively by the connection that wraps it; an endpoint never
/// outlives its connection.
#[async_trait]
pub trait RemoteEndpoint: Send + Sync + 'static {
    /// Create a fresh channel to the remote peer.
    ///
    /// May pend forever for invitation-based mechanisms that have no
    /// acknowledgment path. Each call builds a new channel; the connection
    /// layer guarantees at most one live channel per endpoint.
    async fn create_channel(&self) -> Result<Channel, PresentError>;

    /// Mechanism-specific teardown of the presentation.
    async fn terminate(&self);
}

/// A selectable presentation target advertised by a mechanism.
#[async_trait]
pub trait Display: RemoteEndpoint {
    /// Descriptor shown during selection.
    fn info(&self) -> &DisplayInfo;

    /// Ask the display to load the presentation URL.
    ///
    /// Failures must be reported as [`PresentError::Operation`] with the
    /// mechanism's own diagnostic preserved as detail.
    async fn navigate(&self, url: &str) -> Result<(), PresentError>;

    /// View this display as a plain remote endpoint.
    fn as_endpoint(self: Arc<Self>) -> Arc<dyn RemoteEndpoint>;
}

/// An inbound controller reported by a mechanism on the receiving side.
pub struct IncomingController {
    /// URL of the presentation the controller is attached to.
    pub url: String,
    /// Human-readable controller name, for logging.
    pub name: String,
    /// Endpoint through which a channel to the controller is established.
    pub endpoint: Arc<dyn RemoteEndpoint>,
}

impl std::fmt::Debug for IncomingController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingController")
            .field("url", &self.url)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A pluggable transport mechanism.
///
/// These two operations are the only ones the engine ever calls; everything
/// else about a mechanism (device protocols, vendor SDKs) is opaque.
#[async_trait]
pub trait Mechanism: Send + Sync + 'static {
    /// Mechanism name, used for logging and for deterministic candidate
    /// ordering (registration order, then display order within a
    /// mechanism).
    fn name(&self) -> &str;

    /// Discover displays able to present `url`.
    ///
    /// Infallible by contract: internal errors resolve to an empty list and
    /// never propagate. `options.is_channel_optional` signals whether the
    /// caller accepts displays with no guaranteed message channel.
    async fn available_displays(
        &self,
        url: &str,
        options: &PresentOptions,
    ) -> Vec<Arc<dyn Display>>;

    /// Begin watching for inbound connection attempts on the receiving
    /// side.
    ///
    /// Returns `None` when the mechanism cannot detect a receiver context
    /// (or is already being monitored — the call is idempotent). Inbound
    /// peers are reported asynchronously through the returned receiver.
    async fn monitor_incoming(&self) -> Option<mpsc::Receiver<IncomingController>>;
}
