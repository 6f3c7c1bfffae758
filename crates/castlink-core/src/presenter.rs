//! Controller-side session engine.
//!
//! A [`Presenter`] is bound to one presentation URL. It fans discovery out
//! to every registered mechanism, walks the start protocol (discover →
//! select → navigate → connect), keeps the registry of presentations it has
//! started for reconnection, and feeds availability watchers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use castlink_mechanism::{Display, EventSlot};
use castlink_types::{ConnectionId, DisplayInfo, PresentError, PresentOptions};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::choose::DisplayChooser;
use crate::connection::Connection;
use crate::registry::MechanismRegistry;

/// Live display-availability observable.
///
/// The boolean flips whenever discovery aggregation changes the answer to
/// "is any candidate available"; it never resolves or completes — watchers
/// live as long as their presenter.
#[derive(Clone, Debug)]
pub struct Availability {
    state: Arc<watch::Sender<bool>>,
}

impl Availability {
    fn new(initial: bool) -> Self {
        let (state, _) = watch::channel(initial);
        Self {
            state: Arc::new(state),
        }
    }

    /// Current availability.
    pub fn value(&self) -> bool {
        *self.state.borrow()
    }

    /// Subscribe to flips.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    /// Update the flag; notifies only on an observed flip.
    fn set(&self, value: bool) {
        self.state.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }
}

struct PresenterInner {
    url: String,
    options: PresentOptions,
    registry: Arc<MechanismRegistry>,
    chooser: Arc<dyn DisplayChooser>,
    availability_enabled: bool,
    next_id: AtomicU64,
    /// Presentations started by this engine, in start order.
    known: Mutex<Vec<Connection>>,
    watchers: Mutex<Vec<Availability>>,
    last_available: AtomicBool,
    on_connection_available: EventSlot<Connection>,
}

/// Controller-side presentation session engine for one URL.
#[derive(Clone)]
pub struct Presenter {
    inner: Arc<PresenterInner>,
}

impl Presenter {
    pub(crate) fn new(
        url: String,
        options: PresentOptions,
        registry: Arc<MechanismRegistry>,
        chooser: Arc<dyn DisplayChooser>,
        availability_enabled: bool,
    ) -> Self {
        Self {
            inner: Arc::new(PresenterInner {
                url,
                options,
                registry,
                chooser,
                availability_enabled,
                next_id: AtomicU64::new(0),
                known: Mutex::new(Vec::new()),
                watchers: Mutex::new(Vec::new()),
                last_available: AtomicBool::new(false),
                on_connection_available: EventSlot::new(),
            }),
        }
    }

    /// URL this presenter is bound to.
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Install the connection-available handler (single slot, last
    /// assignment wins). Fired once per started presentation, whether or
    /// not its channel subsequently connects.
    pub fn set_on_connection_available(
        &self,
        callback: impl Fn(Connection) + Send + Sync + 'static,
    ) {
        self.inner.on_connection_available.set(callback);
    }

    /// Run discovery aggregation and return the candidate descriptors.
    pub async fn available_displays(&self) -> Vec<DisplayInfo> {
        self.discover()
            .await
            .iter()
            .map(|d| d.info().clone())
            .collect()
    }

    /// Start a presentation: discover, select, navigate, connect.
    ///
    /// Fails with `NotFound` when no candidate exists, `Abort` when
    /// selection yields nothing usable, and `Operation` when the chosen
    /// display refuses to navigate. On success the connection is returned
    /// immediately; its channel may still be connecting.
    pub async fn start(&self) -> Result<Connection, PresentError> {
        let candidates = self.discover().await;
        if candidates.is_empty() {
            return Err(PresentError::NotFound(format!(
                "no displays available for {}",
                self.inner.url
            )));
        }

        let infos: Vec<DisplayInfo> = candidates.iter().map(|d| d.info().clone()).collect();
        let chosen = match self.inner.chooser.choose(&infos).await {
            Some(index) if index < candidates.len() => Arc::clone(&candidates[index]),
            Some(index) => {
                return Err(PresentError::Abort(format!(
                    "selection index {index} out of range"
                )));
            }
            None => return Err(PresentError::Abort("no display selected".to_string())),
        };

        info!(
            display = %chosen.info().name,
            mechanism = %chosen.info().mechanism,
            url = %self.inner.url,
            "navigating selected display"
        );
        chosen
            .navigate(&self.inner.url)
            .await
            .map_err(PresentError::into_operation)?;

        let id = ConnectionId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let connection = Connection::new(id, self.inner.url.clone(), chosen.as_endpoint());
        self.inner.known.lock().unwrap().push(connection.clone());
        self.inner.on_connection_available.emit(connection.clone());
        connection.establish_in_background();
        info!(id = %id, "presentation started");
        Ok(connection)
    }

    /// Reconnect to a presentation this engine started earlier.
    ///
    /// Returns the original connection (identity-equal) and re-triggers
    /// channel establishment on it, without re-running discovery or
    /// re-navigating. Unknown ids fail with `NotFound`.
    pub fn reconnect(&self, id: ConnectionId) -> Result<Connection, PresentError> {
        let connection = self
            .inner
            .known
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.url() == self.inner.url && c.id() == id)
            .cloned();
        let connection = connection.ok_or_else(|| {
            PresentError::NotFound(format!(
                "no known presentation ({}, {id})",
                self.inner.url
            ))
        })?;
        connection.establish_in_background();
        Ok(connection)
    }

    /// Obtain a live availability watcher.
    ///
    /// Fails with `NotSupported` when the deployment disabled availability
    /// monitoring. A fresh watcher reflects the last aggregation result and
    /// triggers one background discovery run so it converges without a
    /// `start` call.
    pub fn availability(&self) -> Result<Availability, PresentError> {
        if !self.inner.availability_enabled {
            return Err(PresentError::NotSupported(
                "display availability monitoring is disabled".to_string(),
            ));
        }
        let watcher = Availability::new(self.inner.last_available.load(Ordering::SeqCst));
        self.inner.watchers.lock().unwrap().push(watcher.clone());

        let presenter = self.clone();
        tokio::spawn(async move {
            let _ = presenter.discover().await;
        });
        Ok(watcher)
    }

    /// Fan discovery out to every registered mechanism concurrently and
    /// concatenate the results in registration order.
    ///
    /// A mechanism that misbehaves (panics, or its task dies) contributes
    /// an empty list; the aggregate never fails. Availability watchers are
    /// updated after every run, notifying only on a flip.
    async fn discover(&self) -> Vec<Arc<dyn Display>> {
        let mechanisms = self.inner.registry.snapshot();
        let mut handles = Vec::with_capacity(mechanisms.len());
        for mechanism in mechanisms {
            let name = mechanism.name().to_string();
            let url = self.inner.url.clone();
            let options = self.inner.options;
            let handle = tokio::spawn(async move {
                mechanism.available_displays(&url, &options).await
            });
            handles.push((name, handle));
        }

        let mut candidates: Vec<Arc<dyn Display>> = Vec::new();
        for (name, handle) in handles {
            match handle.await {
                Ok(displays) => {
                    debug!(mechanism = %name, count = displays.len(), "discovery results");
                    candidates.extend(displays);
                }
                Err(e) => {
                    warn!(mechanism = %name, error = %e, "discovery task failed");
                }
            }
        }

        let available = !candidates.is_empty();
        self.inner.last_available.store(available, Ordering::SeqCst);
        for watcher in self.inner.watchers.lock().unwrap().iter() {
            watcher.set(available);
        }
        candidates
    }
}
