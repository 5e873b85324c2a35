//! The info loader: at startup, runs each server's `info_cmd` and builds
//! the read-only plugin descriptor table.
//!
//! The descriptor table itself is owned by `PluginHost`, not a module
//! global — see `DESIGN.md` for the reasoning. Its lifecycle is simple
//! either way: built once at startup, read-only and never torn down
//! thereafter.

use plugin_host_core::{PluginDescriptor, PluginHostError, PluginHostResult, ServerDef};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::process::Command;
use tracing::{error, info, warn};

/// Read-only (after startup) map from plugin name to its descriptor.
#[derive(Default)]
pub struct DescriptorTable {
    inner: RwLock<HashMap<String, PluginDescriptor>>,
}

impl DescriptorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one descriptor, rejecting duplicate names — the first
    /// registration wins. Idempotent on identical input:
    /// re-registering the exact same name+server is still a duplicate and
    /// is rejected the same way — callers that want idempotent reload must
    /// build a fresh table, since this one never mutates after startup.
    pub fn register(&self, desc: PluginDescriptor) -> PluginHostResult<()> {
        let mut table = self.inner.write().unwrap();
        if table.contains_key(&desc.name) {
            return Err(PluginHostError::DuplicatePlugin(desc.name));
        }
        table.insert(desc.name.clone(), desc);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<PluginDescriptor> {
        self.inner.read().unwrap().get(name).cloned()
    }

    pub fn schema(&self, name: &str) -> Option<serde_json::Value> {
        self.get(name).map(|d| d.schema)
    }

    pub fn all(&self) -> Vec<PluginDescriptor> {
        self.inner.read().unwrap().values().cloned().collect()
    }
}

/// Runs `info_cmd` for every server that has one and registers the
/// resulting descriptors into `table`. Servers without `info_cmd`
/// contribute no plugins (logged at INFO).
///
/// Failures are isolated per server: a server whose `info_cmd` cannot be
/// run or parsed is logged and skipped; other servers are unaffected.
/// The table is built exactly once and is read-only thereafter.
pub async fn load_all_infos(servers: &[ServerDef], table: &DescriptorTable) {
    for server in servers {
        let Some(info_cmd) = &server.info_cmd else {
            info!(server = %server.name, "server has no info_cmd; contributes no plugins");
            continue;
        };

        match run_info_cmd(&server.name, info_cmd).await {
            Ok(descriptors) => {
                for desc in descriptors {
                    if let Err(err) = table.register(desc) {
                        error!(server = %server.name, error = %err, "rejecting duplicate plugin registration");
                    }
                }
            }
            Err(err) => {
                error!(server = %server.name, error = %err, "info command failed; skipping server's plugins");
            }
        }
    }
}

/// Executes `info_cmd` via `sh -c`, reads stdout to completion, and
/// parses it as a YAML/JSON document whose top level is a descriptor
/// sequence (`serde_yaml` accepts both formats).
async fn run_info_cmd(server_name: &str, info_cmd: &str) -> PluginHostResult<Vec<PluginDescriptor>> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(info_cmd)
        .output()
        .await
        .map_err(|e| PluginHostError::InfoCmdFailure {
            server: server_name.to_string(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        warn!(server = %server_name, status = %output.status, "info_cmd exited non-zero; exit status is not inspected, attempting to parse stdout anyway");
    }

    if output.stdout.is_empty() {
        return Err(PluginHostError::InfoCmdFailure {
            server: server_name.to_string(),
            reason: "empty output".to_string(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let entries: Vec<RawDescriptor> =
        serde_yaml::from_str(&stdout).map_err(|e| PluginHostError::InfoCmdFailure {
            server: server_name.to_string(),
            reason: e.to_string(),
        })?;

    Ok(entries
        .into_iter()
        .map(|raw| PluginDescriptor {
            name: raw.name,
            priority: raw.priority,
            version: raw.version,
            schema: raw.schema,
            phases: raw.phases,
            server_name: server_name.to_string(),
        })
        .collect())
}

#[derive(serde::Deserialize)]
struct RawDescriptor {
    name: String,
    priority: i64,
    version: String,
    #[serde(default)]
    schema: serde_json::Value,
    #[serde(default)]
    phases: Vec<String>,
}
