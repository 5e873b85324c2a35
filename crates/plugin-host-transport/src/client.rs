//! The RPC transport: a connection-oriented UNIX-socket client speaking
//! MessagePack-RPC.
//!
//! A msgid-keyed `pending` map matches async responses to their callers,
//! and a spawned read task owns the socket's read half so `call` never
//! blocks on anything but its own `oneshot::Receiver`.

use async_trait::async_trait;
use plugin_host_core::{PluginHostError, PluginHostResult};
use rmpv::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, trace, warn};

use crate::message::{self, Frame};

/// A handler invoked for a server→client notification, registered via
/// [`RpcClient::on_notification`]. Handlers receive the owning client as the first
/// argument, which is how per-client state such as the last-observed
/// server pid is threaded through (see `plugin_host_runtime::registry`).
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn handle(&self, client: &Arc<RpcClient>, params: serde_json::Value);
}

struct PendingCall {
    tx: oneshot::Sender<Result<Value, Value>>,
}

/// One live connection to a plugin server.
pub struct RpcClient {
    server_name: String,
    write_tx: mpsc::Sender<Vec<u8>>,
    pending: StdMutex<HashMap<u64, PendingCall>>,
    next_msgid: AtomicU64,
    notification_handlers: StdMutex<HashMap<String, Arc<dyn NotificationHandler>>>,
    closed: AtomicBool,
    last_pid: Mutex<Option<u32>>,
}

impl RpcClient {
    /// Connects to `socket` and starts the read/write tasks. A single
    /// attempt — retry-with-timeout across respawns is the supervisor's
    /// job, not this layer's. Reconnection is not automatic here.
    pub async fn connect(server_name: impl Into<String>, socket: &Path) -> PluginHostResult<Arc<Self>> {
        let stream = UnixStream::connect(socket).await?;
        let (read_half, write_half) = tokio::io::split(stream);
        let (write_tx, write_rx) = mpsc::channel::<Vec<u8>>(64);

        let client = Arc::new(RpcClient {
            server_name: server_name.into(),
            write_tx,
            pending: StdMutex::new(HashMap::new()),
            next_msgid: AtomicU64::new(1),
            notification_handlers: StdMutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            last_pid: Mutex::new(None),
        });

        tokio::spawn(write_loop(write_half, write_rx));
        tokio::spawn(read_loop(Arc::downgrade(&client), read_half));

        Ok(client)
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// `call(method, args) -> (result, error)`, collapsed into a
    /// `Result`. Multiple concurrent calls share the one socket; each is
    /// tagged with a unique message id and matched on return.
    pub async fn call(&self, method: &str, args: serde_json::Value) -> PluginHostResult<serde_json::Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PluginHostError::TransportClosed {
                server: self.server_name.clone(),
            });
        }

        let msgid = self.next_msgid.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(msgid, PendingCall { tx });

        let params = message::to_msgpack_value(&args)
            .map_err(|reason| PluginHostError::DecodeError { server: self.server_name.clone(), reason })?;
        let frame = message::encode_request(msgid, method, params);

        if self.write_tx.send(frame).await.is_err() {
            self.pending.lock().unwrap().remove(&msgid);
            return Err(PluginHostError::TransportClosed {
                server: self.server_name.clone(),
            });
        }

        match rx.await {
            Ok(Ok(result)) => message::from_msgpack_value(result)
                .map_err(|reason| PluginHostError::DecodeError { server: self.server_name.clone(), reason }),
            Ok(Err(error)) => Err(message::classify_remote_error(&self.server_name, error)),
            Err(_) => Err(PluginHostError::TransportClosed {
                server: self.server_name.clone(),
            }),
        }
    }

    /// Fire-and-forget notification to the server. No `msgid`, no response.
    pub async fn notify(&self, method: &str, args: serde_json::Value) -> PluginHostResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PluginHostError::TransportClosed {
                server: self.server_name.clone(),
            });
        }
        let params = message::to_msgpack_value(&args)
            .map_err(|reason| PluginHostError::DecodeError { server: self.server_name.clone(), reason })?;
        let frame = message::encode_notification(method, params);
        self.write_tx
            .send(frame)
            .await
            .map_err(|_| PluginHostError::TransportClosed { server: self.server_name.clone() })
    }

    /// Registers a handler for server→client notifications named `name`.
    pub fn on_notification(&self, name: &str, handler: Arc<dyn NotificationHandler>) {
        self.notification_handlers
            .lock()
            .unwrap()
            .insert(name.to_string(), handler);
    }

    /// Drains outstanding calls with `TransportClosed`. Idempotent.
    ///
    /// Dropping each pending call's `oneshot::Sender` without a send, rather
    /// than sending an error payload through it, is deliberate: `call`'s
    /// `Err(_)` arm (a dropped sender) already maps straight to
    /// `PluginHostError::TransportClosed`, while a sent payload would be
    /// routed through `classify_remote_error` and misreported as a
    /// `RemoteError` since it isn't the "No plugin instance" sentinel.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let pending = std::mem::take(&mut *self.pending.lock().unwrap());
        drop(pending);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Last server pid this client observed via a `serverPid`
    /// notification, if any.
    pub async fn observed_pid(&self) -> Option<u32> {
        *self.last_pid.lock().await
    }

    /// Records the latest observed pid, returning the previous value.
    pub async fn set_observed_pid(&self, pid: u32) -> Option<u32> {
        let mut guard = self.last_pid.lock().await;
        guard.replace(pid)
    }

}

async fn write_loop(mut write_half: WriteHalf<UnixStream>, mut rx: mpsc::Receiver<Vec<u8>>) {
    while let Some(frame) = rx.recv().await {
        if let Err(err) = write_half.write_all(&frame).await {
            warn!("plugin RPC write failed: {err}");
            break;
        }
    }
}

async fn read_loop(client: Weak<RpcClient>, mut read_half: tokio::io::ReadHalf<UnixStream>) {
    let mut buf = Vec::new();
    loop {
        let value = match message::read_frame(&mut read_half, &mut buf).await {
            Ok(Some(value)) => value,
            Ok(None) => break,
            Err(err) => {
                debug!("plugin RPC read error: {err}");
                break;
            }
        };

        let Some(client) = client.upgrade() else { break };

        match message::decode_frame(value) {
            Ok(Frame::Response { msgid, error, result }) => {
                let pending = client.pending.lock().unwrap().remove(&msgid);
                if let Some(pending) = pending {
                    let outcome = if matches!(error, Value::Nil) { Ok(result) } else { Err(error) };
                    let _ = pending.tx.send(outcome);
                } else {
                    trace!("unmatched RPC response for msgid {msgid}");
                }
            }
            Ok(Frame::Notification { method, params }) => {
                let handler = client.notification_handlers.lock().unwrap().get(&method).cloned();
                if let Some(handler) = handler {
                    let params = message::from_msgpack_value(params).unwrap_or(serde_json::Value::Null);
                    let client = client.clone();
                    tokio::spawn(async move { handler.handle(&client, params).await });
                }
            }
            Ok(Frame::Request { .. }) => {
                trace!("ignoring unexpected client-directed request frame");
            }
            Err(reason) => {
                debug!("failed to decode RPC frame: {reason}");
            }
        }
    }

    if let Some(client) = client.upgrade() {
        client.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::net::UnixListener;

    /// A fake server that echoes `args` back as the call result, and fires
    /// a `serverPid` notification once a connection is accepted.
    async fn fake_server(pid: u32) -> (Arc<RpcClient>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client-test.sock");
        let listener = UnixListener::bind(&path).unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (mut read_half, mut write_half) = tokio::io::split(stream);

            let notif = message::encode_notification("serverPid", Value::from(pid));
            write_half.write_all(&notif).await.unwrap();

            let mut buf: Vec<u8> = Vec::new();
            loop {
                let Ok(Some(value)) = message::read_frame(&mut read_half, &mut buf).await else { break };
                let Ok(Frame::Request { msgid, params, .. }) = message::decode_frame(value) else { break };
                let result = message::encode_response(msgid, Value::Nil, params);
                if write_half.write_all(&result).await.is_err() {
                    break;
                }
            }
        });

        let client = RpcClient::connect("echo-server", &path).await.unwrap();
        (client, dir)
    }

    struct CountingHandler {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl NotificationHandler for CountingHandler {
        async fn handle(&self, _client: &Arc<RpcClient>, _params: serde_json::Value) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn call_round_trips_through_echo_server() {
        let (client, _dir) = fake_server(1).await;
        let result = client.call("plugin.Echo", serde_json::json!({"x": 1})).await.unwrap();
        assert_eq!(result, serde_json::json!({"x": 1}));
    }

    #[tokio::test]
    async fn concurrent_calls_are_matched_by_msgid() {
        let (client, _dir) = fake_server(1).await;
        let mut handles = Vec::new();
        for i in 0..16 {
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                client.call("plugin.Echo", serde_json::json!(i)).await.unwrap()
            }));
        }
        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.unwrap(), serde_json::json!(i));
        }
    }

    #[tokio::test]
    async fn notification_handler_is_invoked() {
        let (client, _dir) = fake_server(999).await;
        let count = Arc::new(AtomicUsize::new(0));
        client.on_notification("serverPid", Arc::new(CountingHandler { count: count.clone() }));

        // give the read loop a moment to deliver the notification the fake
        // server sends immediately upon accept.
        for _ in 0..50 {
            if count.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_fails_pending_and_future_calls() {
        let (client, _dir) = fake_server(1).await;
        client.close();
        assert!(client.is_closed());
        let result = client.call("plugin.Echo", serde_json::json!(null)).await;
        assert!(matches!(result, Err(PluginHostError::TransportClosed { .. })));
    }

    #[tokio::test]
    async fn close_drains_an_in_flight_call_with_transport_closed() {
        // A server that never replies, so the call is still pending when
        // `close()` runs.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("silent.sock");
        let listener = UnixListener::bind(&path).unwrap();
        tokio::spawn(async move {
            let _ = listener.accept().await;
            std::future::pending::<()>().await;
        });

        let client = RpcClient::connect("silent-server", &path).await.unwrap();
        let in_flight = {
            let client = client.clone();
            tokio::spawn(async move { client.call("plugin.HandleEvent", serde_json::json!(null)).await })
        };

        // give the call time to register itself as pending before closing.
        tokio::task::yield_now().await;
        client.close();

        let result = in_flight.await.unwrap();
        assert!(
            matches!(result, Err(PluginHostError::TransportClosed { .. })),
            "a pending call drained by close() must surface TransportClosed, not RemoteError: {result:?}"
        );
    }

    #[tokio::test]
    async fn observed_pid_starts_unset() {
        let (client, _dir) = fake_server(1).await;
        assert_eq!(client.observed_pid().await, None);
        let previous = client.set_observed_pid(123).await;
        assert_eq!(previous, None);
        assert_eq!(client.observed_pid().await, Some(123));
    }
}
