//! The phase adapter: exposes the per-phase entrypoints the gateway
//! invokes, and the `log`-phase deferral machinery.
//!
//! The per-task association for the `log` phase is realized as a global
//! map keyed by `tokio::task::Id` — any mechanism that establishes
//! task-local or scope-local storage would do — queried by
//! [`current_log_snapshot`] from inside a gateway-supplied
//! `PdkDispatcher` implementation running within the deferred task.

use crate::bridge;
use crate::registry::InstanceRegistry;
use crate::supervisor::ServerHandle;
use plugin_host_core::{
    DeferredScheduler, LogContextSnapshot, PdkDispatcher, PluginConfig, PluginDescriptor,
    PluginHostError, PluginHostResult, RequestContextAccessor, phase,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tracing::error;

fn log_snapshots() -> &'static Mutex<HashMap<tokio::task::Id, LogContextSnapshot>> {
    static STORE: OnceLock<Mutex<HashMap<tokio::task::Id, LogContextSnapshot>>> = OnceLock::new();
    STORE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Reads the `log`-phase snapshot associated with the currently running
/// task, if any. A gateway-supplied [`PdkDispatcher`] calls this from
/// inside the deferred task to recover the serialized log record and
/// context maps it may need to service a PDK callback made during the
/// `log` phase.
pub fn current_log_snapshot() -> Option<LogContextSnapshot> {
    let id = tokio::task::try_id()?;
    log_snapshots().lock().unwrap().get(&id).cloned()
}

/// Everything needed to drive one plugin's phase calls: its descriptor,
/// the shared instance registry, and the gateway collaborators it calls
/// back through.
#[derive(Clone)]
pub struct PluginHandle {
    descriptor: Arc<PluginDescriptor>,
    server: Arc<ServerHandle>,
    registry: Arc<InstanceRegistry>,
    pdk: Arc<dyn PdkDispatcher>,
    scheduler: Arc<dyn DeferredScheduler>,
    context_accessor: Arc<dyn RequestContextAccessor>,
}

impl PluginHandle {
    pub fn new(
        descriptor: PluginDescriptor,
        server: Arc<ServerHandle>,
        registry: Arc<InstanceRegistry>,
        pdk: Arc<dyn PdkDispatcher>,
        scheduler: Arc<dyn DeferredScheduler>,
        context_accessor: Arc<dyn RequestContextAccessor>,
    ) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            server,
            registry,
            pdk,
            scheduler,
            context_accessor,
        }
    }

    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    /// Invokes `phase` for this plugin with `conf` — the
    /// `phase_fn(self, conf)` the gateway calls for every phase in
    /// the descriptor's phase list. Dispatches to the deferred path for
    /// `log` and the inline path for everything else.
    pub async fn call_phase(&self, phase_name: &str, conf: PluginConfig) -> PluginHostResult<()> {
        if phase_name == phase::LOG {
            self.call_log_phase(conf)
        } else {
            self.call_inline_phase(phase_name, conf).await
        }
    }

    /// Non-`log` phases: ask the registry for an instance id, drive the
    /// bridge, and retry once if the remote reports the instance gone.
    async fn call_inline_phase(&self, phase_name: &str, conf: PluginConfig) -> PluginHostResult<()> {
        let client = self.server.client().await.ok_or_else(|| PluginHostError::TransportClosed {
            server: self.descriptor.server_name.clone(),
        })?;

        let instance_id = self
            .registry
            .get_instance_id(&self.descriptor.name, &conf, client.clone())
            .await?;

        match bridge::drive_phase(&client, self.pdk.as_ref(), &instance_id, phase_name).await {
            Ok(()) => Ok(()),
            Err(PluginHostError::NoRemoteInstance { .. }) => {
                self.registry.reset_instance(&self.descriptor.name, &conf).await;
                let instance_id = self
                    .registry
                    .get_instance_id(&self.descriptor.name, &conf, client.clone())
                    .await?;
                // a second failure here propagates to the caller.
                bridge::drive_phase(&client, self.pdk.as_ref(), &instance_id, phase_name).await
            }
            Err(err) => Err(err),
        }
    }

    /// `log` phase: snapshot request-time state, defer the conversation
    /// past the response boundary, and make the snapshot recoverable by
    /// PDK calls the plugin issues from within the deferred task. Errors
    /// in the deferred task are logged and swallowed — the response has
    /// already been sent.
    fn call_log_phase(&self, conf: PluginConfig) -> PluginHostResult<()> {
        let snapshot = self.context_accessor.snapshot_log_context();
        let this = self.clone();

        let task = Box::pin(async move {
            let task_id = tokio::task::try_id();
            if let Some(id) = task_id {
                log_snapshots().lock().unwrap().insert(id, snapshot);
            }

            let result = this.call_inline_phase(phase::LOG, conf).await;

            if let Some(id) = task_id {
                log_snapshots().lock().unwrap().remove(&id);
            }

            if let Err(err) = result {
                error!(plugin = %this.descriptor.name, error = %err, "log phase failed after response was sent");
            }
        });

        self.scheduler.run_after(Duration::ZERO, task);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InstanceRegistry;
    use crate::supervisor::ServerHandle;
    use async_trait::async_trait;
    use plugin_host_transport::RpcClient;
    use rmpv::Value as RmpValue;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixListener;

    struct EchoPdk;

    #[async_trait]
    impl PdkDispatcher for EchoPdk {
        async fn call_pdk_method(&self, _name: &str, _args: serde_json::Value) -> Result<serde_json::Value, serde_json::Value> {
            Ok(serde_json::json!("ok"))
        }
    }

    struct ImmediateScheduler {
        ran: Arc<AtomicUsize>,
    }

    impl DeferredScheduler for ImmediateScheduler {
        fn run_after(&self, _delay: Duration, task: std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>) {
            self.ran.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(task);
        }
    }

    struct FakeContextAccessor;

    impl RequestContextAccessor for FakeContextAccessor {
        fn snapshot_log_context(&self) -> LogContextSnapshot {
            LogContextSnapshot {
                serialized_log: serde_json::json!({"msg": "hello"}),
                request_context: serde_json::Value::Null,
                shared_context: serde_json::Value::Null,
            }
        }
    }

    /// A fake plugin server handling `StartInstance` (always succeeds) and
    /// `HandleEvent` (always a scripted single-hop "No plugin instance" on
    /// the first handled instance, then a clean `"ret"` afterwards) so the
    /// evict-and-retry path in `call_inline_phase` can be exercised without
    /// a real plugin binary.
    async fn flaky_once_server() -> (Arc<ServerHandle>, Arc<InstanceRegistry>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("phase-test.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let failed_once = Arc::new(StdMutex::new(false));

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (mut read_half, mut write_half) = tokio::io::split(stream);
            let mut buf: Vec<u8> = Vec::new();

            loop {
                let value = loop {
                    if !buf.is_empty() {
                        let mut cursor = std::io::Cursor::new(&buf[..]);
                        if let Ok(v) = rmpv::decode::read_value(&mut cursor) {
                            let consumed = cursor.position() as usize;
                            buf.drain(..consumed);
                            break Some(v);
                        }
                    }
                    let mut tmp = [0u8; 4096];
                    match read_half.read(&mut tmp).await {
                        Ok(0) => break None,
                        Ok(n) => buf.extend_from_slice(&tmp[..n]),
                        Err(_) => break None,
                    }
                };
                let Some(RmpValue::Array(items)) = value else { break };
                let msgid = items[1].as_u64().unwrap();
                let method = items[2].as_str().unwrap().to_string();

                let (error, result) = if method == "plugin.StartInstance" {
                    (RmpValue::Nil, rmpv::ext::to_value(&serde_json::json!({"Id": "inst-1"})).unwrap())
                } else if method == "plugin.HandleEvent" {
                    let mut guard = failed_once.lock().unwrap();
                    if !*guard {
                        *guard = true;
                        (RmpValue::from("No plugin instance: inst-1"), RmpValue::Nil)
                    } else {
                        (RmpValue::Nil, rmpv::ext::to_value(&serde_json::json!({"EventId": 1, "Data": "ret"})).unwrap())
                    }
                } else {
                    (RmpValue::Nil, RmpValue::Nil)
                };

                let frame = RmpValue::Array(vec![RmpValue::from(1), RmpValue::from(msgid), error, result]);
                let mut out = Vec::new();
                rmpv::encode::write_value(&mut out, &frame).unwrap();
                if write_half.write_all(&out).await.is_err() {
                    break;
                }
            }
        });

        let client = RpcClient::connect("flaky", Path::new(&path)).await.unwrap();
        let def = plugin_host_core::ServerDef {
            name: "flaky".to_string(),
            socket: path,
            exec: None,
            args: Vec::new(),
            environment: Default::default(),
            info_cmd: None,
        };
        let handle = ServerHandle::new(def);
        handle.set_client(Some(client)).await;
        (handle, Arc::new(InstanceRegistry::new()), dir)
    }

    fn descriptor(phases: Vec<&str>) -> plugin_host_core::PluginDescriptor {
        plugin_host_core::PluginDescriptor {
            name: "p".to_string(),
            priority: 1,
            version: "v1".to_string(),
            schema: serde_json::json!({}),
            phases: phases.into_iter().map(str::to_string).collect(),
            server_name: "flaky".to_string(),
        }
    }

    fn conf() -> PluginConfig {
        PluginConfig {
            key: Some("k".to_string()),
            seq: 1,
            value: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn inline_phase_evicts_and_retries_once_on_no_remote_instance() {
        let (server, registry, _dir) = flaky_once_server().await;
        let handle = PluginHandle::new(
            descriptor(vec!["access"]),
            server,
            registry,
            Arc::new(EchoPdk),
            Arc::new(ImmediateScheduler { ran: Arc::new(AtomicUsize::new(0)) }),
            Arc::new(FakeContextAccessor),
        );

        handle.call_phase("access", conf()).await.unwrap();
    }

    #[tokio::test]
    async fn log_phase_is_deferred_and_snapshot_is_recoverable() {
        let (server, registry, _dir) = flaky_once_server().await;
        let ran = Arc::new(AtomicUsize::new(0));
        let handle = PluginHandle::new(
            descriptor(vec!["log"]),
            server,
            registry,
            Arc::new(EchoPdk),
            Arc::new(ImmediateScheduler { ran: ran.clone() }),
            Arc::new(FakeContextAccessor),
        );

        // call_phase for "log" returns immediately without driving the bridge.
        handle.call_phase("log", conf()).await.unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1, "the deferred task must have been scheduled");

        // give the spawned deferred task a moment to run to completion.
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn current_log_snapshot_is_none_outside_a_deferred_task() {
        assert!(current_log_snapshot().is_none());
    }
}
