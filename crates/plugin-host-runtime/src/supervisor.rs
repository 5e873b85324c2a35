//! The process supervisor: spawns, log-drains, reaps, and respawns each
//! server process.
//!
//! Respawn uses a doubling backoff between loop iterations rather than
//! within one connection's retry — the host never reconnects an existing
//! transport, it replaces it wholesale by looping back to spawning a
//! fresh child.

use crate::registry::{InstanceRegistry, ServerPidHandler};
use plugin_host_core::{PluginHostError, PluginHostResult, ServerDef, WorkerInfo};
use plugin_host_transport::RpcClient;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(100);
const CONNECT_OVERALL_TIMEOUT: Duration = Duration::from_secs(10);
const INITIAL_BACKOFF: Duration = Duration::from_millis(200);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const BACKOFF_MULTIPLIER: f64 = 2.0;

/// One configured server's runtime state: the immutable definition plus
/// the currently-live RPC client, if connected.
pub struct ServerHandle {
    pub def: Arc<ServerDef>,
    client: RwLock<Option<Arc<RpcClient>>>,
}

impl ServerHandle {
    pub fn new(def: ServerDef) -> Arc<Self> {
        Arc::new(Self {
            def: Arc::new(def),
            client: RwLock::new(None),
        })
    }

    pub async fn client(&self) -> Option<Arc<RpcClient>> {
        self.client.read().await.clone()
    }

    pub(crate) async fn set_client(&self, client: Option<Arc<RpcClient>>) {
        *self.client.write().await = client;
    }
}

/// Connects every worker's own `RpcClient` to each configured server's
/// socket, retrying briefly if the socket doesn't exist yet (the server
/// may be mid-spawn by the supervisor worker, or an externally-managed
/// process that is still starting). Every worker calls this once at
/// construction — only the supervisor worker additionally calls
/// [`manage_servers`] to own the process lifecycle; children are never
/// started on workers other than the designated supervisor worker, and
/// every other worker is a pure client of the already-running children.
pub async fn connect_all(handles: &[Arc<ServerHandle>], registry: &Arc<InstanceRegistry>) {
    for handle in handles {
        match connect_with_retry(&handle.def).await {
            Ok(client) => {
                client.on_notification("serverPid", ServerPidHandler::new(registry.clone()));
                handle.set_client(Some(client)).await;
            }
            Err(err) => {
                warn!(server = %handle.def.name, error = %err, "could not connect to plugin server socket at startup");
            }
        }
    }
}

async fn connect_with_retry(def: &ServerDef) -> PluginHostResult<Arc<RpcClient>> {
    let deadline = tokio::time::Instant::now() + CONNECT_OVERALL_TIMEOUT;
    loop {
        match RpcClient::connect(def.name.clone(), &def.socket).await {
            Ok(client) => return Ok(client),
            Err(err) => {
                if tokio::time::Instant::now() >= deadline {
                    return Err(err);
                }
                tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
            }
        }
    }
}

/// Spawns one supervisor task per `ServerDef` that has an `exec`. Must
/// be called exactly once, on the designated supervisor worker, at
/// startup.
pub fn manage_servers(handles: Vec<Arc<ServerHandle>>, worker: Arc<dyn WorkerInfo>, registry: Arc<InstanceRegistry>) {
    for handle in handles {
        if handle.def.exec.is_none() {
            continue;
        }
        let worker = worker.clone();
        let registry = registry.clone();
        tokio::spawn(async move { supervise(handle, worker, registry).await });
    }
}

async fn supervise(handle: Arc<ServerHandle>, worker: Arc<dyn WorkerInfo>, registry: Arc<InstanceRegistry>) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        if worker.is_exiting() {
            return;
        }

        let exec = handle.def.exec.as_ref().expect("checked by caller");
        let mut command = Command::new(exec);
        command
            .args(&handle.def.args)
            .envs(&handle.def.environment)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                let err = PluginHostError::SpawnFailure { server: handle.def.name.clone(), source };
                error!(server = %handle.def.name, error = %err, "supervisor loop for this server is exiting");
                return;
            }
        };

        drain_output(&handle.def.name, &mut child);

        let client = match connect_with_retry(&handle.def).await {
            Ok(client) => client,
            Err(err) => {
                warn!(server = %handle.def.name, error = %err, "could not connect after spawning; killing child and retrying");
                let _ = child.start_kill();
                let _ = child.wait().await;
                tokio::time::sleep(backoff).await;
                backoff = next_backoff(backoff);
                continue;
            }
        };
        client.on_notification("serverPid", ServerPidHandler::new(registry.clone()));
        handle.set_client(Some(client)).await;
        backoff = INITIAL_BACKOFF;

        let status = child.wait().await;
        match status {
            Ok(status) => info!(server = %handle.def.name, %status, "plugin server exited"),
            Err(err) => error!(server = %handle.def.name, error = %err, "failed to wait on plugin server"),
        }

        if let Some(client) = handle.client().await {
            client.close();
        }
        handle.set_client(None).await;

        if worker.is_exiting() {
            return;
        }

        tokio::time::sleep(backoff).await;
        backoff = next_backoff(backoff);
    }
}

fn next_backoff(current: Duration) -> Duration {
    let doubled = Duration::from_secs_f64((current.as_secs_f64() * BACKOFF_MULTIPLIER).max(0.001));
    std::cmp::min(doubled, MAX_BACKOFF)
}

/// Forwards each non-empty stdout/stderr line to the gateway log at INFO
/// with a fixed per-server prefix. Implemented as two
/// concurrent line-reader tasks rather than a literal joined pipe, since
/// `std::process::Stdio` gives no single merged descriptor to read both
/// streams from. Line interleaving between the two streams is not
/// guaranteed.
fn drain_output(server_name: &str, child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        let server_name = server_name.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if !line.is_empty() {
                    info!(target: "plugin", server = %server_name, "{line}");
                }
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        let server_name = server_name.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if !line.is_empty() {
                    info!(target: "plugin", server = %server_name, "{line}");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let mut delay = INITIAL_BACKOFF;
        for _ in 0..20 {
            delay = next_backoff(delay);
        }
        assert_eq!(delay, MAX_BACKOFF);
    }

    #[test]
    fn backoff_first_step_doubles_initial() {
        assert_eq!(next_backoff(INITIAL_BACKOFF), INITIAL_BACKOFF * 2);
    }
}
