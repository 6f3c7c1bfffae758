//! Mock mechanisms, displays, and endpoints for testing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use castlink_types::{DisplayInfo, PresentError, PresentOptions};
use tokio::sync::mpsc;

use crate::channel::{channel, loopback_pair, Channel, ChannelDriver};
use crate::{Display, IncomingController, Mechanism, RemoteEndpoint};

// ---------------------------------------------------------------------------
// MockEndpoint
// ---------------------------------------------------------------------------

/// How a mock endpoint answers `create_channel`.
enum ChannelMode {
    /// Build a loopback pair; the remote half is recorded for the test to
    /// drive.
    Loopback,
    /// Never resolve (invitation-based mechanisms with no ack path).
    Never,
    /// Resolve immediately with a channel that stays `Connecting` forever.
    Stalled,
    /// Fail with an `Operation` error carrying this detail.
    Fail(String),
}

struct MockEndpointState {
    mode: ChannelMode,
    capacity: usize,
    peers: Mutex<Vec<Channel>>,
    /// Keeps stalled-channel drivers alive so their state stays put.
    drivers: Mutex<Vec<ChannelDriver>>,
    terminated: AtomicBool,
}

/// Mock remote endpoint for testing connections without a transport.
#[derive(Clone)]
pub struct MockEndpoint {
    state: Arc<MockEndpointState>,
}

impl MockEndpoint {
    fn with_mode(mode: ChannelMode) -> Self {
        Self {
            state: Arc::new(MockEndpointState {
                mode,
                capacity: 8,
                peers: Mutex::new(Vec::new()),
                drivers: Mutex::new(Vec::new()),
                terminated: AtomicBool::new(false),
            }),
        }
    }

    /// Endpoint whose channels connect immediately over a loopback pair.
    #[must_use]
    pub fn loopback() -> Self {
        Self::with_mode(ChannelMode::Loopback)
    }

    /// Endpoint whose channel creation never resolves.
    #[must_use]
    pub fn never_connects() -> Self {
        Self::with_mode(ChannelMode::Never)
    }

    /// Endpoint whose channels resolve immediately but never leave
    /// `Connecting`.
    #[must_use]
    pub fn stalled() -> Self {
        Self::with_mode(ChannelMode::Stalled)
    }

    /// Endpoint whose channel creation fails with the given diagnostic.
    #[must_use]
    pub fn failing(detail: impl Into<String>) -> Self {
        Self::with_mode(ChannelMode::Fail(detail.into()))
    }

    /// Remote halves of every loopback channel created so far.
    pub fn peer_channels(&self) -> Vec<Channel> {
        self.state.peers.lock().unwrap().clone()
    }

    /// Remote half of the most recent loopback channel.
    pub fn last_peer(&self) -> Option<Channel> {
        self.state.peers.lock().unwrap().last().cloned()
    }

    /// Whether `terminate` was called.
    pub fn was_terminated(&self) -> bool {
        self.state.terminated.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteEndpoint for MockEndpoint {
    async fn create_channel(&self) -> Result<Channel, PresentError> {
        match &self.state.mode {
            ChannelMode::Loopback => {
                let (local, remote) = loopback_pair(self.state.capacity);
                self.state.peers.lock().unwrap().push(remote);
                Ok(local)
            }
            ChannelMode::Never => std::future::pending().await,
            ChannelMode::Stalled => {
                let (local, driver) = channel(self.state.capacity);
                self.state.drivers.lock().unwrap().push(driver);
                Ok(local)
            }
            ChannelMode::Fail(detail) => Err(PresentError::Operation(detail.clone())),
        }
    }

    async fn terminate(&self) {
        self.state.terminated.store(true, Ordering::SeqCst);
        for peer in self.state.peers.lock().unwrap().iter() {
            peer.close();
        }
    }
}

// ---------------------------------------------------------------------------
// MockDisplay
// ---------------------------------------------------------------------------

struct MockDisplayState {
    navigate_error: Option<String>,
    navigations: Mutex<Vec<String>>,
}

/// Mock display for driving the start protocol in tests.
pub struct MockDisplay {
    info: DisplayInfo,
    endpoint: MockEndpoint,
    state: Arc<MockDisplayState>,
}

impl MockDisplay {
    /// A display that navigates successfully and connects channels over a
    /// loopback pair.
    #[must_use]
    pub fn new(name: impl Into<String>, mechanism: impl Into<String>) -> Arc<Self> {
        Self::build(name, mechanism, MockEndpoint::loopback(), None)
    }

    /// A display backed by the given endpoint.
    #[must_use]
    pub fn with_endpoint(
        name: impl Into<String>,
        mechanism: impl Into<String>,
        endpoint: MockEndpoint,
    ) -> Arc<Self> {
        Self::build(name, mechanism, endpoint, None)
    }

    /// A display whose `navigate` fails with the given diagnostic.
    #[must_use]
    pub fn failing_navigation(
        name: impl Into<String>,
        mechanism: impl Into<String>,
        detail: impl Into<String>,
    ) -> Arc<Self> {
        Self::build(name, mechanism, MockEndpoint::loopback(), Some(detail.into()))
    }

    fn build(
        name: impl Into<String>,
        mechanism: impl Into<String>,
        endpoint: MockEndpoint,
        navigate_error: Option<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            info: DisplayInfo::concrete(name, mechanism),
            endpoint,
            state: Arc::new(MockDisplayState {
                navigate_error,
                navigations: Mutex::new(Vec::new()),
            }),
        })
    }

    /// The endpoint behind this display, for test observation.
    pub fn endpoint(&self) -> &MockEndpoint {
        &self.endpoint
    }

    /// URLs this display was asked to navigate to.
    pub fn navigations(&self) -> Vec<String> {
        self.state.navigations.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteEndpoint for MockDisplay {
    async fn create_channel(&self) -> Result<Channel, PresentError> {
        self.endpoint.create_channel().await
    }

    async fn terminate(&self) {
        self.endpoint.terminate().await;
    }
}

#[async_trait]
impl Display for MockDisplay {
    fn info(&self) -> &DisplayInfo {
        &self.info
    }

    async fn navigate(&self, url: &str) -> Result<(), PresentError> {
        self.state.navigations.lock().unwrap().push(url.to_string());
        match &self.state.navigate_error {
            Some(detail) => Err(PresentError::Operation(detail.clone())),
            None => Ok(()),
        }
    }

    fn as_endpoint(self: Arc<Self>) -> Arc<dyn RemoteEndpoint> {
        self
    }
}

// ---------------------------------------------------------------------------
// MockMechanism
// ---------------------------------------------------------------------------

struct MockMechanismState {
    displays: Mutex<Vec<Arc<dyn Display>>>,
    discovery_calls: AtomicUsize,
    panic_on_discovery: AtomicBool,
    incoming_tx: mpsc::Sender<IncomingController>,
    incoming_rx: Mutex<Option<mpsc::Receiver<IncomingController>>>,
    receiver_context: bool,
    /// URLs and options seen during discovery, oldest first.
    discovery_log: Mutex<VecDeque<(String, PresentOptions)>>,
}

/// Scriptable mechanism for engine tests.
pub struct MockMechanism {
    name: String,
    state: Arc<MockMechanismState>,
}

/// Observer/driver handle for a [`MockMechanism`].
#[derive(Clone)]
pub struct MockMechanismHandle {
    state: Arc<MockMechanismState>,
}

impl MockMechanism {
    /// A controller-side mechanism with no receiver context.
    #[must_use]
    pub fn new(name: impl Into<String>) -> (Self, MockMechanismHandle) {
        Self::build(name, false)
    }

    /// A mechanism that also reports incoming controllers on the receiving
    /// side (inject them through the handle).
    #[must_use]
    pub fn with_receiver_context(name: impl Into<String>) -> (Self, MockMechanismHandle) {
        Self::build(name, true)
    }

    fn build(name: impl Into<String>, receiver_context: bool) -> (Self, MockMechanismHandle) {
        let (incoming_tx, incoming_rx) = mpsc::channel(16);
        let state = Arc::new(MockMechanismState {
            displays: Mutex::new(Vec::new()),
            discovery_calls: AtomicUsize::new(0),
            panic_on_discovery: AtomicBool::new(false),
            incoming_tx,
            incoming_rx: Mutex::new(Some(incoming_rx)),
            receiver_context,
            discovery_log: Mutex::new(VecDeque::new()),
        });
        let handle = MockMechanismHandle {
            state: Arc::clone(&state),
        };
        (
            Self {
                name: name.into(),
                state,
            },
            handle,
        )
    }
}

impl MockMechanismHandle {
    /// Replace the advertised display list.
    pub fn set_displays(&self, displays: Vec<Arc<dyn Display>>) {
        *self.state.displays.lock().unwrap() = displays;
    }

    /// Append one display to the advertised list.
    pub fn push_display(&self, display: Arc<dyn Display>) {
        self.state.displays.lock().unwrap().push(display);
    }

    /// Make the next discovery calls panic inside the adapter, to exercise
    /// fault isolation.
    pub fn panic_on_discovery(&self) {
        self.state.panic_on_discovery.store(true, Ordering::SeqCst);
    }

    /// How many times discovery ran against this mechanism.
    pub fn discovery_calls(&self) -> usize {
        self.state.discovery_calls.load(Ordering::SeqCst)
    }

    /// URLs and options seen during discovery, oldest first.
    pub fn discovery_log(&self) -> Vec<(String, PresentOptions)> {
        self.state.discovery_log.lock().unwrap().iter().cloned().collect()
    }

    /// Report an inbound controller on the receiving side.
    pub async fn inject_controller(&self, controller: IncomingController) {
        self.state
            .incoming_tx
            .send(controller)
            .await
            .expect("monitor receiver dropped");
    }
}

#[async_trait]
impl Mechanism for MockMechanism {
    fn name(&self) -> &str {
        &self.name
    }

    async fn available_displays(
        &self,
        url: &str,
        options: &PresentOptions,
    ) -> Vec<Arc<dyn Display>> {
        self.state.discovery_calls.fetch_add(1, Ordering::SeqCst);
        self.state
            .discovery_log
            .lock()
            .unwrap()
            .push_back((url.to_string(), *options));
        assert!(
            !self.state.panic_on_discovery.load(Ordering::SeqCst),
            "mock mechanism scripted to fail discovery"
        );
        self.state.displays.lock().unwrap().clone()
    }

    async fn monitor_incoming(&self) -> Option<mpsc::Receiver<IncomingController>> {
        if !self.state.receiver_context {
            return None;
        }
        self.state.incoming_rx.lock().unwrap().take()
    }
}
