use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::{running::RunningSet, supervisor::Supervisor};
use crate::{
    config::Config,
    events::Bus,
    services::{FileRegistry, MemoryRegistry, Registry},
    subscribers::{Subscribe, SubscriberSet},
};

/// Builder for constructing a Supervisor with optional features.
pub struct SupervisorBuilder {
    cfg: Config,
    subscribers: Vec<Arc<dyn Subscribe>>,
    registry: Option<Arc<dyn Registry>>,
}

impl SupervisorBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            registry: None,
        }
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive runtime events (service lifecycle, logger
    /// failures, etc.) through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Uses a custom registry backend.
    ///
    /// Without one, a [`FileRegistry`] is used when `registry_path` is set
    /// and a [`MemoryRegistry`] otherwise.
    pub fn with_registry(mut self, registry: Arc<dyn Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Builds and returns the Supervisor instance.
    ///
    /// Must be called inside a tokio runtime: the running-set owner and the
    /// subscriber workers are spawned here.
    pub fn build(self) -> Arc<Supervisor> {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let subs = SubscriberSet::new(self.subscribers, bus.clone());
        let registry = self.registry.unwrap_or_else(|| match &self.cfg.registry_path {
            Some(path) => Arc::new(FileRegistry::new(path)) as Arc<dyn Registry>,
            None => Arc::new(MemoryRegistry::new()),
        });

        Arc::new(Supervisor::new_internal(
            self.cfg,
            bus,
            subs,
            registry,
            RunningSet::spawn(),
            CancellationToken::new(),
        ))
    }
}
