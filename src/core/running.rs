//! # Running set: the services currently under supervision.
//!
//! One owner task holds the `name → Supervision` map; every lookup and
//! mutation is a request over an `mpsc` channel answered through a `oneshot`.
//! There is no lock around the map and no other copy of it.
//!
//! ## Architecture
//! ```text
//! Reconciler ──┐  claim / attach / evict / phase
//!              ├──► RunningSet (handle) ──mpsc──► owner task ──► HashMap<String, Supervision>
//! ServiceActor ┘  set_phase / release                 │
//!                                                      └──oneshot──► reply
//! ```
//!
//! ## Rules
//! - Only the reconciler inserts (`claim`) or evicts entries
//! - Actors report their [`Phase`] and may `release` their own unstarted claim
//! - Updates carry the service id; an update for a replaced entry is ignored
//! - Eviction cancels the entry's token inside the owner task

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::services::Service;

const REQUEST_QUEUE: usize = 256;

/// Supervision phase of a running-set entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Claimed; waiting for the settle delay or the first start.
    Pending,
    /// The `run` process is alive.
    Running {
        /// Pid of the service process.
        pid: Option<u32>,
    },
    /// The process exited; waiting for the restart delay.
    Restarting,
    /// The last start did not happen (spawn failure, unregistered); retried next tick.
    Idle,
    /// The startup cap was reached; no further automatic restarts.
    Capped,
}

/// One entry of the running set.
#[derive(Debug)]
pub struct Supervision {
    service: Arc<Service>,
    cancel: CancellationToken,
    phase: Phase,
    join: Option<JoinHandle<()>>,
}

impl Supervision {
    /// Creates a freshly claimed entry.
    pub fn new(service: Arc<Service>, cancel: CancellationToken) -> Self {
        Self {
            service,
            cancel,
            phase: Phase::Pending,
            join: None,
        }
    }

    /// Supervised service.
    pub fn service(&self) -> &Arc<Service> {
        &self.service
    }

    /// Last reported phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Token stopping this supervision.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn take_join(&mut self) -> Option<JoinHandle<()>> {
        self.join.take()
    }
}

enum Request {
    Claim {
        entry: Supervision,
        reply: oneshot::Sender<bool>,
    },
    Attach {
        name: String,
        id: u64,
        join: JoinHandle<()>,
    },
    Release {
        name: String,
        id: u64,
        reply: oneshot::Sender<bool>,
    },
    SetPhase {
        name: String,
        id: u64,
        phase: Phase,
    },
    Relaunch {
        name: String,
        reply: oneshot::Sender<Option<(Arc<Service>, CancellationToken)>>,
    },
    Phase {
        name: String,
        reply: oneshot::Sender<Option<Phase>>,
    },
    Get {
        name: String,
        reply: oneshot::Sender<Option<Arc<Service>>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<(String, Phase)>>,
    },
    Evict {
        name: String,
        reply: oneshot::Sender<Option<Supervision>>,
    },
    EvictAll {
        reply: oneshot::Sender<Vec<Supervision>>,
    },
}

/// Handle to the running set. Cheap to clone.
///
/// The owner task ends when the last handle is dropped.
#[derive(Clone, Debug)]
pub struct RunningSet {
    tx: mpsc::Sender<Request>,
}

impl RunningSet {
    /// Spawns the owner task and returns a handle to it.
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel(REQUEST_QUEUE);
        tokio::spawn(owner(rx));
        Self { tx }
    }

    async fn ask<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Request) -> Option<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).await.ok()?;
        rx.await.ok()
    }

    async fn tell(&self, req: Request) {
        let _ = self.tx.send(req).await;
    }

    /// Inserts an entry for the service unless its name is already taken.
    pub async fn claim(&self, service: Arc<Service>, cancel: CancellationToken) -> bool {
        let entry = Supervision::new(service, cancel);
        self.ask(|reply| Request::Claim { entry, reply })
            .await
            .unwrap_or(false)
    }

    /// Records the task currently driving the entry.
    pub(crate) async fn attach(&self, name: &str, id: u64, join: JoinHandle<()>) {
        self.tell(Request::Attach {
            name: name.to_string(),
            id,
            join,
        })
        .await;
    }

    /// Drops a claim that never started.
    pub async fn release(&self, name: &str, id: u64) -> bool {
        self.ask(|reply| Request::Release {
            name: name.to_string(),
            id,
            reply,
        })
        .await
        .unwrap_or(false)
    }

    /// Updates the phase of the entry owned by service `id`.
    pub async fn set_phase(&self, name: &str, id: u64, phase: Phase) {
        self.tell(Request::SetPhase {
            name: name.to_string(),
            id,
            phase,
        })
        .await;
    }

    /// Moves an [`Phase::Idle`] entry back to pending and hands out what a
    /// new supervisor task needs. Returns `None` for any other phase.
    pub(crate) async fn relaunch(&self, name: &str) -> Option<(Arc<Service>, CancellationToken)> {
        self.ask(|reply| Request::Relaunch {
            name: name.to_string(),
            reply,
        })
        .await
        .flatten()
    }

    /// Returns the phase of `name`, or `None` if it is not supervised.
    pub async fn phase(&self, name: &str) -> Option<Phase> {
        self.ask(|reply| Request::Phase {
            name: name.to_string(),
            reply,
        })
        .await
        .flatten()
    }

    /// Returns `true` if `name` is supervised.
    pub async fn contains(&self, name: &str) -> bool {
        self.phase(name).await.is_some()
    }

    /// Returns the supervised service record for `name`.
    pub async fn get(&self, name: &str) -> Option<Arc<Service>> {
        self.ask(|reply| Request::Get {
            name: name.to_string(),
            reply,
        })
        .await
        .flatten()
    }

    /// Returns `(name, phase)` for every entry, sorted by name.
    pub async fn snapshot(&self) -> Vec<(String, Phase)> {
        self.ask(|reply| Request::Snapshot { reply })
            .await
            .unwrap_or_default()
    }

    /// Returns the sorted names of all entries.
    pub async fn names(&self) -> Vec<String> {
        self.snapshot()
            .await
            .into_iter()
            .map(|(name, _)| name)
            .collect()
    }

    /// Removes `name` and cancels its supervision.
    pub async fn evict(&self, name: &str) -> Option<Supervision> {
        self.ask(|reply| Request::Evict {
            name: name.to_string(),
            reply,
        })
        .await
        .flatten()
    }

    /// Removes and cancels every entry.
    pub async fn evict_all(&self) -> Vec<Supervision> {
        self.ask(|reply| Request::EvictAll { reply })
            .await
            .unwrap_or_default()
    }
}

fn matches(entries: &HashMap<String, Supervision>, name: &str, id: u64) -> bool {
    entries
        .get(name)
        .is_some_and(|e| e.service.id() == id)
}

async fn owner(mut rx: mpsc::Receiver<Request>) {
    let mut entries: HashMap<String, Supervision> = HashMap::new();

    while let Some(req) = rx.recv().await {
        match req {
            Request::Claim { entry, reply } => {
                let name = entry.service.name().to_string();
                let inserted = if entries.contains_key(&name) {
                    false
                } else {
                    entries.insert(name, entry);
                    true
                };
                let _ = reply.send(inserted);
            }
            Request::Attach { name, id, join } => {
                if matches(&entries, &name, id) {
                    if let Some(e) = entries.get_mut(&name) {
                        e.join = Some(join);
                    }
                }
            }
            Request::Release { name, id, reply } => {
                let released = matches(&entries, &name, id) && entries.remove(&name).is_some();
                let _ = reply.send(released);
            }
            Request::SetPhase { name, id, phase } => {
                if matches(&entries, &name, id) {
                    if let Some(e) = entries.get_mut(&name) {
                        e.phase = phase;
                    }
                }
            }
            Request::Relaunch { name, reply } => {
                let out = match entries.get_mut(&name) {
                    Some(e) if e.phase == Phase::Idle && !e.cancel.is_cancelled() => {
                        e.phase = Phase::Pending;
                        Some((Arc::clone(&e.service), e.cancel.clone()))
                    }
                    _ => None,
                };
                let _ = reply.send(out);
            }
            Request::Phase { name, reply } => {
                let _ = reply.send(entries.get(&name).map(|e| e.phase));
            }
            Request::Get { name, reply } => {
                let _ = reply.send(entries.get(&name).map(|e| Arc::clone(&e.service)));
            }
            Request::Snapshot { reply } => {
                let mut all: Vec<(String, Phase)> = entries
                    .iter()
                    .map(|(name, e)| (name.clone(), e.phase))
                    .collect();
                all.sort_unstable_by(|a, b| a.0.cmp(&b.0));
                let _ = reply.send(all);
            }
            Request::Evict { name, reply } => {
                let out = entries.remove(&name);
                if let Some(e) = &out {
                    e.cancel.cancel();
                }
                let _ = reply.send(out);
            }
            Request::EvictAll { reply } => {
                let all: Vec<Supervision> = entries.drain().map(|(_, e)| e).collect();
                for e in &all {
                    e.cancel.cancel();
                }
                let _ = reply.send(all);
            }
        }
    }
}
