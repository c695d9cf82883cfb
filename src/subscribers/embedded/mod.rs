//! # Built-in subscribers
//!
//! - [`LogWriter`]: renders events through `tracing` at their severity.

mod log;

pub use log::LogWriter;
