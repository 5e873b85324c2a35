//! Data model shared across the plugin host: configuration-level types
//! that carry no runtime handles, so they can be depended on by both the
//! transport and runtime crates without a cycle.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// One configured plugin server, fully resolved — `name` has already
/// been defaulted to `plugin server #<i>` by position if the
/// configuration omitted it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerDef {
    /// Globally unique name for this server.
    pub name: String,
    /// UNIX socket path the server listens on.
    pub socket: PathBuf,
    /// Path to the server executable. `None` means the supervisor never
    /// spawns this server; it is assumed already running.
    pub exec: Option<PathBuf>,
    /// Argument vector passed to `exec`.
    pub args: Vec<String>,
    /// Environment variables merged into the child's environment.
    pub environment: HashMap<String, String>,
    /// Shell command whose stdout yields this server's plugin descriptor
    /// list. `None` means this server contributes no plugins.
    pub info_cmd: Option<String>,
}

/// One plugin advertised by a server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Globally unique plugin name.
    pub name: String,
    /// Plugin priority; higher runs earlier among plugins on the same phase.
    pub priority: i64,
    /// Plugin version string.
    pub version: String,
    /// Opaque schema value consumed by the gateway's validator.
    pub schema: serde_json::Value,
    /// Subset of the gateway's phase names this plugin participates in.
    pub phases: Vec<String>,
    /// Name of the owning [`ServerDef`].
    pub server_name: String,
}

/// The configuration value the gateway passes for one phase call,
/// carrying the two reserved fields the host reads to derive an
/// [`InstanceKey`] and detect configuration changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    /// `conf.__key__`, if the gateway supplied a stable per-configuration identity.
    #[serde(rename = "__key__", default)]
    pub key: Option<String>,
    /// `conf.__seq__`, a monotonic sequence number for this key.
    #[serde(rename = "__seq__")]
    pub seq: u64,
    /// The full configuration value, passed through to `StartInstance`.
    #[serde(flatten)]
    pub value: serde_json::Value,
}

/// The identity under which a running remote plugin instance is cached.
///
/// Derived from `conf.__key__` when present, otherwise the plugin name.
/// Two configuration values that share a key replace rather than
/// duplicate one another's Instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceKey(String);

impl InstanceKey {
    /// Derives the key for a `(plugin_name, conf)` pair.
    pub fn derive(plugin_name: &str, conf: &PluginConfig) -> Self {
        match &conf.key {
            Some(key) if !key.is_empty() => Self(key.clone()),
            _ => Self(plugin_name.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `&'static str` constants for the gateway's well-known phase names, as a
/// convenience; the phase set itself is the gateway's to define, so
/// [`PluginDescriptor::phases`] stores plain strings, not this enum.
pub mod phase {
    pub const CERTIFICATE: &str = "certificate";
    pub const REWRITE: &str = "rewrite";
    pub const ACCESS: &str = "access";
    pub const HEADER_FILTER: &str = "header_filter";
    pub const BODY_FILTER: &str = "body_filter";
    pub const LOG: &str = "log";
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conf(key: Option<&str>, seq: u64) -> PluginConfig {
        PluginConfig {
            key: key.map(str::to_string),
            seq,
            value: serde_json::json!({}),
        }
    }

    #[test]
    fn derive_uses_key_when_present() {
        let key = InstanceKey::derive("my-plugin", &conf(Some("stable-id"), 1));
        assert_eq!(key.as_str(), "stable-id");
    }

    #[test]
    fn derive_falls_back_to_plugin_name() {
        let key = InstanceKey::derive("my-plugin", &conf(None, 1));
        assert_eq!(key.as_str(), "my-plugin");
    }

    #[test]
    fn derive_falls_back_when_key_is_empty() {
        let key = InstanceKey::derive("my-plugin", &conf(Some(""), 1));
        assert_eq!(key.as_str(), "my-plugin");
    }

    #[test]
    fn instance_key_equality_is_by_value() {
        let a = InstanceKey::derive("p", &conf(Some("k"), 1));
        let b = InstanceKey::derive("p", &conf(Some("k"), 2));
        assert_eq!(a, b, "the key is independent of seq");
    }

    #[test]
    fn plugin_config_reserved_fields_are_stripped_from_value() {
        let parsed: PluginConfig =
            serde_json::from_value(serde_json::json!({"__key__": "k", "__seq__": 3, "timeout": 10}))
                .unwrap();
        assert_eq!(parsed.key.as_deref(), Some("k"));
        assert_eq!(parsed.seq, 3);
        assert_eq!(parsed.value, serde_json::json!({"timeout": 10}));
    }
}
