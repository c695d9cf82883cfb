//! Shared handles passed to every runtime component at construction.

use std::sync::Arc;

use crate::config::Config;
use crate::core::running::RunningSet;
use crate::events::{Bus, Event};
use crate::services::{Registry, Scanner};

/// Everything a reconciler, actor or pump needs from the daemon.
#[derive(Clone)]
pub(crate) struct Context {
    pub cfg: Arc<Config>,
    pub bus: Bus,
    pub registry: Arc<dyn Registry>,
    pub running: RunningSet,
    pub scanner: Scanner,
}

impl Context {
    pub fn new(cfg: Arc<Config>, bus: Bus, registry: Arc<dyn Registry>, running: RunningSet) -> Self {
        let scanner = Scanner::new(cfg.service_dir.clone());
        Self {
            cfg,
            bus,
            registry,
            running,
            scanner,
        }
    }

    #[inline]
    pub fn publish(&self, ev: Event) {
        self.bus.publish(ev);
    }
}
