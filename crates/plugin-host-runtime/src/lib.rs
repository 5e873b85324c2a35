//! # Plugin Host Runtime
//!
//! Process supervision, plugin discovery, the instance registry, the
//! event bridge, and the phase adapter for the external plugin host —
//! plus the configuration loader and logging setup that wrap them into a
//! runnable service.
//!
//! [`PluginHost`] is the single entrypoint a gateway embeds: one
//! instance per logical worker, constructed from a parsed server list
//! and the gateway's collaborator implementations (`plugin-host-core`'s
//! `PdkDispatcher`, `DeferredScheduler`, `RequestContextAccessor`,
//! `WorkerInfo`).
//!
//! ```rust,ignore
//! use plugin_host_runtime::{ConfigLoader, PluginHost};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     plugin_host_runtime::logging::init_plugin_host();
//!
//!     let servers = ConfigLoader::load_from_file("/etc/gateway/plugins.yaml")?;
//!     let host = PluginHost::new(servers, worker, pdk, scheduler, ctx).await;
//!
//!     host.manage_servers();
//!
//!     let schema = host.load_schema("my-plugin");
//!     let plugin = host.load_plugin("my-plugin").unwrap();
//!     plugin.call_phase("access", conf).await?;
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod config;
pub mod descriptors;
pub mod host;
pub mod logging;
pub mod phase;
pub mod registry;
pub mod supervisor;

pub use config::{ConfigError, ConfigLoader, ConfigResult};
pub use descriptors::DescriptorTable;
pub use host::PluginHost;
pub use phase::{current_log_snapshot, PluginHandle};
pub use registry::{Instance, InstanceRegistry};
pub use supervisor::ServerHandle;

// Re-export tracing for consumers that want the same macros the host uses.
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{ConfigLoader, PluginHandle, PluginHost};
    pub use plugin_host_core::prelude::*;
    pub use tracing::{debug, error, info, instrument, span, trace, warn, Level};
}
