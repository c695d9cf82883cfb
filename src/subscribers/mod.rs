//! # Event subscribers for the svscan runtime.
//!
//! ```text
//!   Reconciler / ServiceActor / LogPump ── publish(Event) ──► Bus
//!                                                              │
//!                                           Supervisor listener ──► SubscriberSet
//!                                                                    ├──► LogWriter (tracing)
//!                                                                    └──► custom subscribers
//! ```

mod embedded;
mod subscribe;
mod subscriber_set;

pub use embedded::LogWriter;
pub use subscribe::Subscribe;
pub use subscriber_set::SubscriberSet;
