//! # Supervisor: owns the daemon's runtime pieces and drives shutdown.
//!
//! The [`Supervisor`] owns the event bus, a [`SubscriberSet`], the registry,
//! the [`RunningSet`] and the runtime cancellation token. It runs the
//! reconciler until a stop request, then tears every service down within
//! [`Config::grace`].
//!
//! ## High-level architecture
//! ```text
//! run() / run_until(stop):
//!   ensure service root (fatal on failure)
//!   subscriber_listener(): Bus.subscribe() ─► SubscriberSet::emit(&Event)
//!   spawn Reconciler::run(runtime_token)
//!
//! Event flow:
//!   Reconciler / ServiceActor / LogPump ── publish(Event) ──► Bus ──► listener ──► SubscriberSet
//!
//! Shutdown path:
//!   signal (or stop future, or shutdown_token().cancel())
//!             └─► Bus.publish(ShutdownRequested)
//!             └─► runtime_token.cancel()   → child tokens of every supervision
//!             └─► reconciler returns the evicted supervisions
//!             └─► wait_all_with_grace(cfg.grace):
//!                    ├─ all joined        → Bus.publish(AllStoppedWithin)
//!                    └─ timeout exceeded  → Bus.publish(GraceExceeded), abort stragglers
//!             └─► listener flushes queued events, SubscriberSet::shutdown()
//! ```
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use svscan::{Config, LogWriter, Subscribe, SupervisorBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = Config::default();
//!     let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
//!     let sup = SupervisorBuilder::new(cfg).with_subscribers(subs).build();
//!     sup.run().await?;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::core::context::Context;
use crate::core::reconcile::Reconciler;
use crate::core::running::{RunningSet, Supervision};
use crate::core::shutdown::ShutdownSignals;
use crate::error::RuntimeError;
use crate::events::{Bus, Event, EventKind};
use crate::services::{Registry, Scanner};
use crate::subscribers::SubscriberSet;

/// Coordinates reconciliation, event delivery (via [`SubscriberSet`]), and graceful shutdown.
pub struct Supervisor {
    cfg: Arc<Config>,
    bus: Bus,
    subs: std::sync::Mutex<Option<SubscriberSet>>,
    registry: Arc<dyn Registry>,
    running: RunningSet,
    runtime_token: CancellationToken,
}

impl Supervisor {
    pub(crate) fn new_internal(
        cfg: Config,
        bus: Bus,
        subs: SubscriberSet,
        registry: Arc<dyn Registry>,
        running: RunningSet,
        runtime_token: CancellationToken,
    ) -> Self {
        Self {
            cfg: Arc::new(cfg),
            bus,
            subs: std::sync::Mutex::new(Some(subs)),
            registry,
            running,
            runtime_token,
        }
    }

    /// Runtime configuration.
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Event bus; subscribe here to observe the runtime directly.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Services currently under supervision.
    pub fn running(&self) -> &RunningSet {
        &self.running
    }

    /// Service registry in use.
    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    /// Token that, once cancelled, starts a graceful shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.runtime_token.clone()
    }

    /// Supervises until SIGINT, SIGTERM or SIGQUIT, then shuts down gracefully.
    pub async fn run(&self) -> Result<(), RuntimeError> {
        let mut signals = ShutdownSignals::install().map_err(RuntimeError::Signals)?;
        self.run_until(async move {
            let signal = signals.recv().await;
            tracing::info!(signal, "termination signal received");
        })
        .await
    }

    /// Supervises until `stop` completes (or the shutdown token is cancelled),
    /// then shuts down gracefully.
    ///
    /// Fails fast with [`RuntimeError::ServiceRootUnavailable`] if the service
    /// root cannot be created. Returns [`RuntimeError::GraceExceeded`] if some
    /// supervisors were still busy when the grace period ran out.
    pub async fn run_until<F>(&self, stop: F) -> Result<(), RuntimeError>
    where
        F: Future<Output = ()>,
    {
        Scanner::new(self.cfg.service_dir.clone()).ensure_root()?;
        let listener_done = CancellationToken::new();
        let listener = self.subscriber_listener(listener_done.clone());

        let ctx = Context::new(
            Arc::clone(&self.cfg),
            self.bus.clone(),
            Arc::clone(&self.registry),
            self.running.clone(),
        );
        let reconciler = tokio::spawn(Reconciler::new(ctx).run(self.runtime_token.clone()));

        tokio::select! {
            _ = stop => {}
            _ = self.runtime_token.cancelled() => {}
        }
        self.bus.publish(Event::new(EventKind::ShutdownRequested));
        self.runtime_token.cancel();

        let evicted = match reconciler.await {
            Ok(evicted) => evicted,
            Err(e) => {
                tracing::error!(error = %e, "reconciler task failed");
                self.running.evict_all().await
            }
        };
        let res = self.wait_all_with_grace(evicted).await;

        listener_done.cancel();
        if let Some(listener) = listener {
            if let Err(e) = listener.await {
                tracing::error!(error = %e, "subscriber listener failed");
            }
        }
        res
    }

    /// Forwards bus events to the subscriber set until `done` is cancelled,
    /// then flushes what is already queued and drains every subscriber.
    ///
    /// The set is handed to the first run only.
    fn subscriber_listener(&self, done: CancellationToken) -> Option<JoinHandle<()>> {
        let set = self.subs.lock().ok()?.take()?;
        if set.is_empty() {
            return None;
        }
        let mut rx = self.bus.subscribe();
        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    res = rx.recv() => match res {
                        Ok(ev) => set.emit(&ev),
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "subscriber listener lagged behind the bus");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = done.cancelled() => {
                        loop {
                            match rx.try_recv() {
                                Ok(ev) => set.emit(&ev),
                                Err(TryRecvError::Lagged(_)) => continue,
                                Err(_) => break,
                            }
                        }
                        break;
                    }
                }
            }
            set.shutdown().await;
        }))
    }

    /// Waits for every evicted supervision to finish within the grace period.
    ///
    /// Publishes [`EventKind::AllStoppedWithin`] on success, or
    /// [`EventKind::GraceExceeded`] on timeout, aborts the stragglers and
    /// returns [`RuntimeError::GraceExceeded`] naming them.
    async fn wait_all_with_grace(&self, evicted: Vec<Supervision>) -> Result<(), RuntimeError> {
        let grace = self.cfg.grace;
        let mut pending: Vec<(String, JoinHandle<()>)> = evicted
            .into_iter()
            .filter_map(|mut s| {
                let name = s.service().name().to_string();
                s.take_join().map(|join| (name, join))
            })
            .collect();

        let done = async {
            for (_, join) in pending.iter_mut() {
                let _ = join.await;
            }
        };
        let outcome = tokio::time::timeout(grace, done).await;
        match outcome {
            Ok(()) => {
                self.bus.publish(Event::new(EventKind::AllStoppedWithin));
                Ok(())
            }
            Err(_elapsed) => {
                let stuck: Vec<String> = pending
                    .iter()
                    .filter(|(_, join)| !join.is_finished())
                    .map(|(name, _)| name.clone())
                    .collect();
                for (_, join) in &pending {
                    join.abort();
                }
                self.bus.publish(
                    Event::new(EventKind::GraceExceeded).with_reason(stuck.join(",")),
                );
                Err(RuntimeError::GraceExceeded { grace, stuck })
            }
        }
    }
}
