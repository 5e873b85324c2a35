//! # Plugin Host
//!
//! Facade crate for the external plugin host: runs out-of-process
//! plugin servers and routes an API gateway's phase callbacks to them
//! over local RPC.
//!
//! A gateway embeds this crate by constructing one
//! [`PluginHost`](plugin_host_runtime::PluginHost) per logical worker
//! from a parsed [`ServerDef`](plugin_host_core::ServerDef) list and its
//! own implementations of the collaborator traits in
//! [`plugin_host_core::collaborator`] (`PdkDispatcher`,
//! `DeferredScheduler`, `RequestContextAccessor`, `WorkerInfo`):
//!
//! ```rust,ignore
//! use plugin_host::prelude::*;
//!
//! let servers = ConfigLoader::load_from_file("/etc/gateway/plugins.yaml")?;
//! let host = PluginHost::new(servers, worker, pdk, scheduler, ctx).await;
//!
//! host.manage_servers(); // only on the supervisor worker
//!
//! if let Some(plugin) = host.load_plugin("rate-limiting") {
//!     plugin.call_phase("access", conf).await?;
//! }
//! ```
//!
//! ## Crate layout
//!
//! | Crate | Houses |
//! |---|---|
//! | `plugin-host-core` | Data model, error taxonomy, gateway collaborator traits |
//! | `plugin-host-transport` | The MessagePack-RPC transport |
//! | `plugin-host-runtime` | Process supervision, discovery, the instance registry, the bridge, the phase adapter, configuration loading, logging, `PluginHost` |
//! | `plugin-host` | This crate — re-exports and a `prelude` |

pub use plugin_host_core::{
    collaborator, error, model, DeferredScheduler, InstanceKey, LogContextSnapshot, PdkDispatcher,
    PluginConfig, PluginDescriptor, PluginHostError, PluginHostResult, RequestContextAccessor,
    ServerDef, WorkerInfo,
};
pub use plugin_host_runtime::{
    current_log_snapshot, ConfigError, ConfigLoader, ConfigResult, Instance, InstanceRegistry,
    PluginHandle, PluginHost, ServerHandle,
};
pub use plugin_host_transport::{NotificationHandler, RpcClient};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use plugin_host_core::prelude::*;
    pub use plugin_host_runtime::{ConfigLoader, PluginHandle, PluginHost};
    pub use plugin_host_transport::RpcClient;
}
