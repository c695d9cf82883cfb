//! # ServiceActor: single-service supervisor.
//!
//! Keeps one service's `run` process alive with a fixed restart delay and a
//! startup cap, pairing every process instance with a [`LogPump`].
//!
//! ## Event flow
//! For each start, the actor publishes:
//! ```text
//! ServiceStarting → ServiceStarted → [process runs] → ServiceExited
//!                 → ServiceStartFailed (spawn error)
//!
//! If the cap allows another start:
//!   → RestartScheduled → [sleep restart_wait] → (next start)
//! Otherwise:
//!   → StartupCapReached
//! ```
//!
//! ## Architecture
//! ```text
//! Reconciler ──► ServiceActor::run()
//!
//! loop {
//!   ├─► still registered? ── no ──► Idle, exit
//!   ├─► under service guard: cap check, startups += 1, spawn `run`
//!   ├─► spawn LogPump(stdout)
//!   ├─► wait for process exit (or cancellation → kill, stop pump)
//!   ├─► wait for logger readiness
//!   ├─► stop pump and join it
//!   └─► publish RestartScheduled, sleep restart_wait
//! }
//! ```
//!
//! ## Rules
//! - Starts run **sequentially** within one actor (never parallel)
//! - `startups` **never resets** while this `Service` lives
//! - Cancellation is honoured while running, waiting and sleeping

use std::process::Stdio;
use std::sync::Arc;

use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;

use crate::core::context::Context;
use crate::core::pump::LogPump;
use crate::core::running::Phase;
use crate::error::ServiceError;
use crate::events::{Event, EventKind};
use crate::services::Service;

/// Why an actor stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ActorExit {
    /// The service is no longer in the registry.
    Unregistered,
    /// `run` could not be spawned; the next tick may relaunch.
    StartFailed,
    /// The startup cap was reached.
    Capped,
    /// The supervision was cancelled.
    Cancelled,
}

enum Launch {
    Started { child: Child, attempt: u32 },
    Capped,
    Failed,
}

/// Process currently paired with a pump.
struct Attached {
    stop: CancellationToken,
    ready: oneshot::Receiver<()>,
    pump: JoinHandle<()>,
}

impl Attached {
    async fn detach(self) {
        self.stop.cancel();
        let _ = self.pump.await;
    }
}

/// Supervises one service.
pub(crate) struct ServiceActor {
    ctx: Context,
    service: Arc<Service>,
}

impl ServiceActor {
    pub fn new(ctx: Context, service: Arc<Service>) -> Self {
        Self { ctx, service }
    }

    /// Runs until the service is capped, unregistered, fails to start, or `token` is cancelled.
    pub async fn run(self, token: CancellationToken) -> ActorExit {
        loop {
            if token.is_cancelled() {
                return ActorExit::Cancelled;
            }
            if !self.registered().await {
                self.set_phase(Phase::Idle).await;
                return ActorExit::Unregistered;
            }

            let (mut child, attempt) = match self.launch().await {
                Launch::Started { child, attempt } => (child, attempt),
                Launch::Capped => {
                    self.set_phase(Phase::Capped).await;
                    return ActorExit::Capped;
                }
                Launch::Failed => {
                    self.set_phase(Phase::Idle).await;
                    return ActorExit::StartFailed;
                }
            };

            let Some(mut attached) = self.attach(&mut child) else {
                let _ = child.kill().await;
                self.service.lock().await.process = None;
                self.set_phase(Phase::Idle).await;
                return ActorExit::StartFailed;
            };

            let pid = child.id();
            self.set_phase(Phase::Running { pid }).await;
            self.publish(
                Event::new(EventKind::ServiceStarted)
                    .with_attempt(attempt)
                    .with_pid(pid),
            );

            let status = select! {
                status = child.wait() => status,
                _ = token.cancelled() => {
                    let _ = child.kill().await;
                    self.service.lock().await.process = None;
                    self.publish(
                        Event::new(EventKind::ServiceExited)
                            .with_pid(pid)
                            .with_reason("stopped by supervisor"),
                    );
                    attached.detach().await;
                    return ActorExit::Cancelled;
                }
            };

            self.service.lock().await.process = None;
            let ev = Event::new(EventKind::ServiceExited)
                .with_attempt(attempt)
                .with_pid(pid);
            self.publish(match status {
                Ok(status) => ev.with_status(status),
                Err(e) => ev.with_reason(e.to_string()),
            });

            let logged = select! {
                _ = &mut attached.ready => true,
                _ = token.cancelled() => false,
            };
            attached.detach().await;
            if !logged {
                return ActorExit::Cancelled;
            }

            let wait = self.ctx.cfg.restart_wait;
            self.set_phase(Phase::Restarting).await;
            self.publish(
                Event::new(EventKind::RestartScheduled)
                    .with_attempt(attempt)
                    .with_delay(wait),
            );
            select! {
                _ = time::sleep(wait) => {}
                _ = token.cancelled() => return ActorExit::Cancelled,
            }
        }
    }

    async fn registered(&self) -> bool {
        match self.ctx.registry.contains(self.service.name()).await {
            Ok(found) => found,
            Err(e) => {
                self.ctx.publish(
                    Event::new(EventKind::RegistryFailed)
                        .with_service(self.service.name())
                        .with_reason(e.to_string()),
                );
                false
            }
        }
    }

    /// Applies the cap and spawns `run` under the service guard.
    async fn launch(&self) -> Launch {
        let mut state = self.service.lock().await;
        if state.startups >= self.ctx.cfg.max_startups {
            let attempts = state.startups;
            drop(state);
            self.publish(Event::new(EventKind::StartupCapReached).with_attempt(attempts));
            return Launch::Capped;
        }
        state.startups += 1;
        let attempt = state.startups;
        self.publish(Event::new(EventKind::ServiceStarting).with_attempt(attempt));

        let mut cmd = Command::new(self.service.def().run_path());
        cmd.current_dir(self.service.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        match cmd.spawn() {
            Ok(child) => {
                state.process = child.id();
                Launch::Started { child, attempt }
            }
            Err(source) => {
                drop(state);
                let err = ServiceError::Spawn {
                    name: self.service.name().to_string(),
                    source,
                };
                self.publish(
                    Event::new(EventKind::ServiceStartFailed)
                        .with_attempt(attempt)
                        .with_reason(err.to_string()),
                );
                Launch::Failed
            }
        }
    }

    /// Hands the child's stdout to a fresh pump.
    fn attach(&self, child: &mut Child) -> Option<Attached> {
        let Some(stdout) = child.stdout.take() else {
            let err = ServiceError::MissingPipe {
                name: self.service.name().to_string(),
                pipe: "stdout",
            };
            self.publish(Event::new(EventKind::ServiceStartFailed).with_reason(err.to_string()));
            return None;
        };
        let (ready_tx, ready) = oneshot::channel();
        let stop = CancellationToken::new();
        let pump = LogPump::new(
            self.ctx.clone(),
            Arc::clone(&self.service),
            ready_tx,
            stop.clone(),
        );
        let pump = tokio::spawn(pump.run(stdout));
        Some(Attached { stop, ready, pump })
    }

    async fn set_phase(&self, phase: Phase) {
        self.ctx
            .running
            .set_phase(self.service.name(), self.service.id(), phase)
            .await;
    }

    fn publish(&self, ev: Event) {
        self.ctx.publish(ev.with_service(self.service.name()));
    }
}
