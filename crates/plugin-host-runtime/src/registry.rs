//! The instance registry: a keyed map from a plugin-configuration
//! identity to a remote instance id, with at-most-one-start semantics.
//!
//! A bare `Mutex<HashMap<...>>` isn't enough: the at-most-one-start gate
//! needs a caller that finds a start already in flight to wait for it
//! instead of issuing its own `StartInstance`, rather than busy-polling
//! until the slot resolves — realized here as a
//! `Slot::Starting(Arc<Notify>)` waiters block on.

use async_trait::async_trait;
use plugin_host_core::{InstanceKey, PluginConfig, PluginHostError, PluginHostResult};
use plugin_host_transport::{NotificationHandler, RpcClient};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, trace, warn};

/// One cached remote plugin instance.
#[derive(Clone)]
pub struct Instance {
    pub key: InstanceKey,
    pub seq: u64,
    pub id: String,
    pub client: Arc<RpcClient>,
}

/// An entry in the registry map: either a completed instance, or a
/// marker that a start is in flight, carrying the `Notify` waiters park
/// on.
enum Slot {
    Starting(Arc<Notify>),
    Ready(Instance),
}

/// Process-wide (per `PluginHost`) cache of running instances.
#[derive(Default)]
pub struct InstanceRegistry {
    slots: Mutex<HashMap<InstanceKey, Slot>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `get_instance_id`. `client` is the `RpcClient` for
    /// the server that owns `plugin_name`, resolved by the caller from the
    /// plugin descriptor.
    pub async fn get_instance_id(
        &self,
        plugin_name: &str,
        conf: &PluginConfig,
        client: Arc<RpcClient>,
    ) -> PluginHostResult<String> {
        let key = InstanceKey::derive(plugin_name, conf);
        let seq = conf.seq;

        let (notify, old) = loop {
            let mut slots = self.slots.lock().await;
            match slots.get(&key) {
                // `Notified` only registers as a waiter once it is polled
                // (or explicitly `enable()`d), not when it is merely
                // created: `notify_waiters` wakes only already-registered
                // waiters and stores no permit. Enabling it here, while the
                // lock is still held, is what makes it safe to drop the
                // lock afterward — any `notify_waiters()` call from the
                // starter from this point on is guaranteed to observe this
                // waiter instead of losing the wakeup.
                Some(Slot::Starting(existing)) => {
                    let existing = existing.clone();
                    let mut notified = Box::pin(existing.notified());
                    notified.as_mut().enable();
                    drop(slots);
                    trace!(key = %key, "waiting for in-flight plugin instance start");
                    notified.await;
                    continue;
                }
                Some(Slot::Ready(inst)) if inst.seq == seq => {
                    return Ok(inst.id.clone());
                }
                Some(Slot::Ready(inst)) => {
                    let old = Some(inst.id.clone());
                    let notify = Arc::new(Notify::new());
                    slots.insert(key.clone(), Slot::Starting(notify.clone()));
                    break (notify, old);
                }
                None => {
                    let notify = Arc::new(Notify::new());
                    slots.insert(key.clone(), Slot::Starting(notify.clone()));
                    break (notify, None);
                }
            }
        };

        let serialized_conf = match serde_json::to_string(conf) {
            Ok(s) => s,
            Err(err) => {
                self.slots.lock().await.remove(&key);
                notify.notify_waiters();
                return Err(PluginHostError::StartFailed {
                    plugin_name: plugin_name.to_string(),
                    reason: format!("failed to serialize plugin config: {err}"),
                });
            }
        };
        let start_result = client
            .call(
                "plugin.StartInstance",
                json!({"Name": plugin_name, "Config": serialized_conf}),
            )
            .await;

        let new_id = match start_result {
            Ok(result) => match result.get("Id").and_then(|v| v.as_str()) {
                Some(id) => id.to_string(),
                None => {
                    self.slots.lock().await.remove(&key);
                    notify.notify_waiters();
                    return Err(PluginHostError::StartFailed {
                        plugin_name: plugin_name.to_string(),
                        reason: "StartInstance response missing 'Id'".to_string(),
                    });
                }
            },
            Err(err) => {
                self.slots.lock().await.remove(&key);
                notify.notify_waiters();
                return Err(PluginHostError::StartFailed {
                    plugin_name: plugin_name.to_string(),
                    reason: err.to_string(),
                });
            }
        };

        let instance = Instance {
            key: key.clone(),
            seq,
            id: new_id.clone(),
            client: client.clone(),
        };
        self.slots.lock().await.insert(key.clone(), Slot::Ready(instance));
        notify.notify_waiters();

        if let Some(old_id) = old {
            debug!(key = %key, old_id = %old_id, "evicting superseded plugin instance");
            let client = client.clone();
            tokio::spawn(async move {
                let _ = client.call("plugin.CloseInstance", json!({"Id": old_id})).await;
            });
        }

        Ok(new_id)
    }

    /// Drops the entry for `(plugin_name, conf)`'s derived key. Used when a
    /// remote call returns the "No plugin instance" sentinel.
    pub async fn reset_instance(&self, plugin_name: &str, conf: &PluginConfig) {
        let key = InstanceKey::derive(plugin_name, conf);
        self.slots.lock().await.remove(&key);
    }

    /// `on_server_pid`: evicts every `Ready` entry bound to
    /// `client` when its pid changes. The first observation for a client
    /// (no prior pid) only records; it never evicts.
    pub async fn on_server_pid(&self, client: &Arc<RpcClient>, pid: u32) {
        let previous = client.set_observed_pid(pid).await;
        match previous {
            None => {
                debug!(server = client.server_name(), pid, "recorded initial server pid");
            }
            Some(prev) if prev == pid => {}
            Some(prev) => {
                warn!(
                    server = client.server_name(),
                    old_pid = prev,
                    new_pid = pid,
                    "server pid changed; evicting cached instances"
                );
                let mut slots = self.slots.lock().await;
                slots.retain(|_, slot| match slot {
                    Slot::Ready(inst) => !Arc::ptr_eq(&inst.client, client),
                    Slot::Starting(_) => true,
                });
            }
        }
    }
}

/// Registered on every `RpcClient` as its `serverPid` notification
/// handler: translates the notification
/// into a registry eviction. Handlers receive the client as their first
/// argument, which is how this ties a pid change back to exactly the
/// instances living on that connection.
pub struct ServerPidHandler {
    registry: Arc<InstanceRegistry>,
}

impl ServerPidHandler {
    pub fn new(registry: Arc<InstanceRegistry>) -> Arc<Self> {
        Arc::new(Self { registry })
    }
}

#[async_trait]
impl NotificationHandler for ServerPidHandler {
    async fn handle(&self, client: &Arc<RpcClient>, params: serde_json::Value) {
        let Some(pid) = params
            .get("pid")
            .or_else(|| params.as_array().and_then(|a| a.first()))
            .and_then(|v| v.as_u64())
        else {
            warn!(server = client.server_name(), "malformed serverPid notification: {params}");
            return;
        };
        self.registry.on_server_pid(client, pid as u32).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugin_host_transport::RpcClient;
    use rmpv::Value as RmpValue;
    use std::path::Path;
    use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixListener;

    /// A minimal fake plugin server: accepts one connection and answers every
    /// `plugin.StartInstance` call with a fresh incrementing id, and ignores
    /// `plugin.CloseInstance`. Good enough to exercise the registry without a
    /// real plugin binary.
    async fn fake_server() -> (Arc<RpcClient>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sock");
        let listener = UnixListener::bind(&path).unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (mut read_half, mut write_half) = tokio::io::split(stream);
            let next_id = AtomicU64::new(1);
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

                let result = if method == "plugin.StartInstance" {
                    let id = next_id.fetch_add(1, AtomicOrdering::SeqCst);
                    RmpValue::Map(vec![(RmpValue::from("Id"), RmpValue::from(id.to_string()))])
                } else {
                    RmpValue::Nil
                };

                let frame = RmpValue::Array(vec![
                    RmpValue::from(1),
                    RmpValue::from(msgid),
                    RmpValue::Nil,
                    result,
                ]);
                let mut out = Vec::new();
                rmpv::encode::write_value(&mut out, &frame).unwrap();
                if write_half.write_all(&out).await.is_err() {
                    break;
                }
            }
        });

        let client = RpcClient::connect("test-server", Path::new(&path)).await.unwrap();
        (client, dir)
    }

    fn conf(key: &str, seq: u64) -> PluginConfig {
        PluginConfig {
            key: Some(key.to_string()),
            seq,
            value: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn reset_instance_drops_entry_without_rpc() {
        let registry = InstanceRegistry::new();
        registry.reset_instance("p", &conf("k", 1)).await;
        assert!(registry.slots.lock().await.is_empty());
    }

    #[tokio::test]
    async fn concurrent_starts_on_same_key_share_one_instance() {
        let registry = Arc::new(InstanceRegistry::new());
        let (client, _dir) = fake_server().await;

        let c = conf("k", 1);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let client = client.clone();
            let c = c.clone();
            handles.push(tokio::spawn(async move {
                registry.get_instance_id("p", &c, client).await.unwrap()
            }));
        }

        let mut ids = Vec::new();
        for h in handles {
            ids.push(h.await.unwrap());
        }
        assert!(ids.iter().all(|id| id == &ids[0]), "all callers must observe the same instance id: {ids:?}");
    }

    #[tokio::test]
    async fn seq_change_starts_a_new_instance() {
        let registry = InstanceRegistry::new();
        let (client, _dir) = fake_server().await;

        let first = registry.get_instance_id("p", &conf("k", 1), client.clone()).await.unwrap();
        let second = registry.get_instance_id("p", &conf("k", 2), client.clone()).await.unwrap();
        assert_ne!(first, second);

        // re-fetching with seq 2 again must hit the cache, not start a third.
        let third = registry.get_instance_id("p", &conf("k", 2), client.clone()).await.unwrap();
        assert_eq!(second, third);
    }

    #[tokio::test]
    async fn server_pid_change_evicts_only_that_clients_instances() {
        let registry = InstanceRegistry::new();
        let (client_a, _dir_a) = fake_server().await;
        let (client_b, _dir_b) = fake_server().await;

        let id_a = registry.get_instance_id("p", &conf("a", 1), client_a.clone()).await.unwrap();
        let id_b = registry.get_instance_id("p", &conf("b", 1), client_b.clone()).await.unwrap();

        registry.on_server_pid(&client_a, 100).await;
        registry.on_server_pid(&client_a, 200).await;

        let refreshed_a = registry.get_instance_id("p", &conf("a", 1), client_a.clone()).await.unwrap();
        assert_ne!(refreshed_a, id_a, "client_a's instance must have been evicted and restarted");

        let still_b = registry.get_instance_id("p", &conf("b", 1), client_b.clone()).await.unwrap();
        assert_eq!(still_b, id_b, "client_b's instance must be untouched");
    }
}
