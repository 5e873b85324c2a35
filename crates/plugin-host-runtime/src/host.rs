//! Top-level orchestrator wiring process supervision, discovery, the
//! instance registry, the event bridge, and the phase adapter together,
//! and exposing the gateway-facing surface: `load_schema`, `load_plugin`,
//! `manage_servers`.
//!
//! One `PluginHost` is constructed per logical gateway worker: every
//! worker loads its own descriptor table and connects its own
//! `RpcClient` per server, but only the worker whose [`WorkerInfo::id`]
//! is `0` is expected to also call [`PluginHost::manage_servers`].

use crate::descriptors::{self, DescriptorTable};
use crate::phase::PluginHandle;
use crate::registry::InstanceRegistry;
use crate::supervisor::{self, ServerHandle};
use plugin_host_core::{DeferredScheduler, PdkDispatcher, RequestContextAccessor, ServerDef, WorkerInfo};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// The external plugin host. Holds everything needed to service the
/// gateway-facing surface for one worker.
pub struct PluginHost {
    servers: HashMap<String, Arc<ServerHandle>>,
    descriptors: Arc<DescriptorTable>,
    registry: Arc<InstanceRegistry>,
    worker: Arc<dyn WorkerInfo>,
    pdk: Arc<dyn PdkDispatcher>,
    scheduler: Arc<dyn DeferredScheduler>,
    context_accessor: Arc<dyn RequestContextAccessor>,
}

impl PluginHost {
    /// Builds a host for `worker`: resolves server definitions, loads
    /// every server's descriptor list, and connects this worker's own
    /// `RpcClient` to each server's socket — every worker but the
    /// supervisor worker is a pure client of the already-running
    /// children.
    pub async fn new(
        server_defs: Vec<ServerDef>,
        worker: Arc<dyn WorkerInfo>,
        pdk: Arc<dyn PdkDispatcher>,
        scheduler: Arc<dyn DeferredScheduler>,
        context_accessor: Arc<dyn RequestContextAccessor>,
    ) -> Self {
        let descriptors = Arc::new(DescriptorTable::new());
        descriptors::load_all_infos(&server_defs, &descriptors).await;

        let registry = Arc::new(InstanceRegistry::new());
        let handles: Vec<Arc<ServerHandle>> = server_defs.into_iter().map(ServerHandle::new).collect();
        supervisor::connect_all(&handles, &registry).await;

        let servers = handles.into_iter().map(|h| (h.def.name.clone(), h)).collect();

        Self {
            servers,
            descriptors,
            registry,
            worker,
            pdk,
            scheduler,
            context_accessor,
        }
    }

    /// `load_schema(plugin_name) -> schema | nil`, consumed by the
    /// gateway's schema validator at startup.
    pub fn load_schema(&self, plugin_name: &str) -> Option<serde_json::Value> {
        self.descriptors.schema(plugin_name)
    }

    /// `load_plugin(plugin_name) -> plugin_object`: returns a
    /// [`PluginHandle`] exposing one callable per phase in the plugin's
    /// descriptor. Returns `None` if no such plugin was registered.
    pub fn load_plugin(&self, plugin_name: &str) -> Option<PluginHandle> {
        let descriptor = self.descriptors.get(plugin_name)?;
        let server = self.servers.get(&descriptor.server_name)?.clone();
        Some(PluginHandle::new(
            descriptor,
            server,
            self.registry.clone(),
            self.pdk.clone(),
            self.scheduler.clone(),
            self.context_accessor.clone(),
        ))
    }

    /// `manage_servers()`: spawns the process-supervisor loop for every
    /// server with an `exec`. A no-op on any worker other than the
    /// designated supervisor worker — children are never started on
    /// workers other than the one designated to supervise them; calling
    /// it from elsewhere is a caller error the host tolerates by logging
    /// and skipping, rather than panicking, since the contract only
    /// promises the gateway will call it once on the supervisor worker —
    /// it does not forbid a defensive call from others.
    pub fn manage_servers(&self) {
        if self.worker.id() != 0 {
            info!(worker = self.worker.id(), "manage_servers called on a non-supervisor worker; ignoring");
            return;
        }
        let handles: Vec<Arc<ServerHandle>> = self.servers.values().cloned().collect();
        supervisor::manage_servers(handles, self.worker.clone(), self.registry.clone());
    }

    /// Plugin names registered across every server, in no particular
    /// order. Exposed for gateways that want to enumerate plugins rather
    /// than look each one up by name.
    pub fn plugin_names(&self) -> Vec<String> {
        self.descriptors.all().into_iter().map(|d| d.name).collect()
    }

    /// The phase list for a registered plugin, or `None` if unknown.
    pub fn phases_for(&self, plugin_name: &str) -> Option<Vec<String>> {
        self.descriptors.get(plugin_name).map(|d| d.phases)
    }
}
