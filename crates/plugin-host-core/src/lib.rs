//! # Plugin Host Core
//!
//! Data model, error taxonomy, and gateway collaborator traits shared by
//! the external plugin host's transport and runtime crates.
//!
//! This crate defines no async machinery of its own beyond the trait
//! signatures in [`collaborator`] — it exists so
//! `plugin-host-transport` and `plugin-host-runtime` can agree on the
//! vocabulary (`ServerDef`, `PluginDescriptor`, `InstanceKey`,
//! `PluginHostError`) without depending on each other.

pub mod collaborator;
pub mod error;
pub mod model;

pub use collaborator::{DeferredScheduler, LogContextSnapshot, PdkDispatcher, RequestContextAccessor, WorkerInfo};
pub use error::{PluginHostError, PluginHostResult};
pub use model::{InstanceKey, PluginConfig, PluginDescriptor, ServerDef, phase};

/// Prelude for common imports.
pub mod prelude {
    pub use super::collaborator::{
        DeferredScheduler, LogContextSnapshot, PdkDispatcher, RequestContextAccessor, WorkerInfo,
    };
    pub use super::error::{PluginHostError, PluginHostResult};
    pub use super::model::{InstanceKey, PluginConfig, PluginDescriptor, ServerDef, phase};
}
