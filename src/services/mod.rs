//! # Services: definitions, directory scanning and the registry.
//!
//! - [`Scanner`] lists service names on disk
//! - [`Registry`] keeps the authoritative set ([`MemoryRegistry`], [`FileRegistry`])
//! - [`Service`] holds one unit's runtime state behind its own guard

mod registry;
mod scanner;
mod service;

pub use registry::{FileRegistry, MemoryRegistry, Registry, ServiceMap};
pub use scanner::Scanner;
pub use service::{Service, ServiceDef, ServiceState, RUN_FILE};
