//! Runtime events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`], [`Severity`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Reconciler`, `ServiceActor`, `LogPump`, `Supervisor`,
//!   `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the supervisor listener (fans out to `SubscriberSet`), tests.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind, Severity};
