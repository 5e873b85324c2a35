//! Configuration schema for the external plugin host.
//!
//! The host consumes a single YAML document whose top level is a sequence
//! of server definitions. There is no adapter-style extensibility here —
//! unlike a multi-source application config, this file has exactly one
//! shape, fixed at startup (see the Non-goals on hot-reload).
//!
//! # Example Configuration (YAML)
//!
//! ```yaml
//! - name: auth-plugins
//!   socket: /tmp/auth-plugins.sock
//!   exec: /usr/local/bin/auth-plugin-server
//!   args: ["--log-level", "info"]
//!   environment:
//!     PLUGIN_HOME: /etc/plugins/auth
//!   info_cmd: "/usr/local/bin/auth-plugin-server --dump-info"
//! - socket: /tmp/metrics-plugins.sock
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// One entry of the top-level server list.
///
/// `name` is optional in the file; the loader fills in the positional
/// default `plugin server #<i>` (1-based) for entries that omit it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerDefConfig {
    /// Unique name for this server. Defaulted by position if absent.
    pub name: Option<String>,

    /// UNIX socket path the server listens on.
    pub socket: PathBuf,

    /// Path to the server executable. Servers without `exec` are never
    /// spawned by the supervisor; they are assumed to be started and
    /// managed externally.
    pub exec: Option<PathBuf>,

    /// Argument vector passed to `exec`.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables merged into the child's environment.
    #[serde(default)]
    pub environment: HashMap<String, String>,

    /// Shell command whose stdout yields the plugin descriptor list.
    pub info_cmd: Option<String>,
}

/// The parsed configuration document: a bare sequence of server
/// definitions, matching the file's top level exactly.
pub type ServerListConfig = Vec<ServerDefConfig>;
