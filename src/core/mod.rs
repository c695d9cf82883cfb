//! Runtime core: orchestration and lifecycle.
//!
//! The public API from this module is [`Supervisor`] (built with
//! [`SupervisorBuilder`]) and the [`RunningSet`] view of supervised services.
//!
//! Internal modules:
//! - [`supervisor`]: owns the runtime pieces, handles signals and graceful shutdown;
//! - [`reconcile`]: periodic scan, registry sync and start/evict decisions;
//! - [`actor`]: keeps one service running with a fixed delay and a startup cap;
//! - [`pump`]: feeds a service's output to its logger subprocess;
//! - [`running`]: single-owner map of supervised services;
//! - [`shutdown`]: cross-platform shutdown signal handling.

mod actor;
mod builder;
mod context;
mod pump;
mod reconcile;
mod running;
mod shutdown;
mod supervisor;

#[cfg(all(test, unix))]
mod testing;

pub use builder::SupervisorBuilder;
pub use running::{Phase, RunningSet, Supervision};
pub use supervisor::Supervisor;
