//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use plugin_host_core::ServerDef;
use std::collections::HashSet;

/// Validates the resolved server list: names unique, sockets non-empty.
pub fn validate_server_list(servers: &[ServerDef]) -> ConfigResult<()> {
    let mut seen_names = HashSet::new();

    for server in servers {
        if !seen_names.insert(&server.name) {
            return Err(ConfigError::DuplicateServerName(server.name.clone()));
        }
        if server.socket.as_os_str().is_empty() {
            return Err(ConfigError::missing_field("socket"));
        }
    }

    Ok(())
}
