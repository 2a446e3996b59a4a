//! The Model Registry: loads the model configuration file, resolves
//! `ENV:<NAME>` secrets, and builds one Adapter per enabled, available
//! entry.

pub mod config;
pub mod registry;

pub use config::{AdapterKind, ConfigDocument, ModelEntry};
pub use registry::{load, load_from_str, Registry, RegistryEntry, SharedRegistry};
