//! Process-wide presentation facade.

use std::sync::{Arc, OnceLock};

use castlink_mechanism::Mechanism;
use castlink_types::PresentOptions;
use tokio::sync::Mutex as AsyncMutex;

use crate::choose::DisplayChooser;
use crate::config::Config;
use crate::presenter::Presenter;
use crate::receiver::ReceiverMonitor;
use crate::registry::MechanismRegistry;

/// Ties the engine together: owns the mechanism registry and configuration,
/// builds presenters, and runs the receiver monitor.
///
/// `Presentation::global()` is the process-wide instance mechanism adapters
/// and applications share; tests construct fresh instances instead of
/// relying on global reset.
pub struct Presentation {
    config: Config,
    registry: Arc<MechanismRegistry>,
    receiver: AsyncMutex<Option<ReceiverMonitor>>,
}

impl Presentation {
    /// Create a facade with the given configuration and an empty registry.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            registry: Arc::new(MechanismRegistry::new()),
            receiver: AsyncMutex::new(None),
        }
    }

    /// Create a facade with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(Config::default())
    }

    /// The process-wide instance.
    pub fn global() -> &'static Self {
        static GLOBAL: OnceLock<Presentation> = OnceLock::new();
        GLOBAL.get_or_init(Self::with_defaults)
    }

    /// Active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The mechanism registry.
    pub fn registry(&self) -> &Arc<MechanismRegistry> {
        &self.registry
    }

    /// Register a transport mechanism. Append-only; mechanisms registered
    /// earlier sort earlier in every candidate list.
    pub fn register_mechanism(&self, mechanism: Arc<dyn Mechanism>) {
        self.registry.register(mechanism);
    }

    /// Build a presentation session engine for `url`.
    pub fn presenter(
        &self,
        url: impl Into<String>,
        options: PresentOptions,
        chooser: Arc<dyn DisplayChooser>,
    ) -> Presenter {
        Presenter::new(
            url.into(),
            options,
            Arc::clone(&self.registry),
            chooser,
            self.config.engine.availability,
        )
    }

    /// The receiver-side monitor, started on first use.
    ///
    /// Mechanisms registered after the first call are not monitored; wire
    /// up the registry before asking for the receiver.
    pub async fn receiver(&self) -> ReceiverMonitor {
        let mut slot = self.receiver.lock().await;
        if let Some(monitor) = slot.as_ref() {
            return monitor.clone();
        }
        let monitor = ReceiverMonitor::start(&self.registry).await;
        *slot = Some(monitor.clone());
        monitor
    }
}
