//! Configuration file loader.
//!
//! There is no search-path or multi-source discovery here: the host
//! consumes a single path handed in by the surrounding gateway
//! configuration. Environment variable expansion is kept as an ambient
//! convenience layered on top of that single path.

use super::error::{ConfigError, ConfigResult};
use super::schema::ServerListConfig;
use super::validation::validate_server_list;
use plugin_host_core::ServerDef;
use std::path::Path;
use tracing::{debug, info};

/// Loads and validates the plugin server list from a single YAML path.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration from a specific file, returning resolved
    /// [`ServerDef`]s (names defaulted, validated for uniqueness).
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Vec<ServerDef>> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading external plugin configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path)?;
        Self::load_from_str(&content)
    }

    /// Loads configuration from a YAML string (used directly by tests).
    pub fn load_from_str(yaml: &str) -> ConfigResult<Vec<ServerDef>> {
        let expanded = expand_env_vars(yaml);
        let servers: ServerListConfig = serde_yaml::from_str(&expanded)?;
        let resolved = resolve_server_defs(servers);
        validate_server_list(&resolved)?;
        debug!(count = resolved.len(), "loaded plugin server definitions");
        Ok(resolved)
    }
}

/// Fills in the positional default name (`plugin server #<i>`, 1-based)
/// for entries that omit `name`.
fn resolve_server_defs(servers: ServerListConfig) -> Vec<ServerDef> {
    servers
        .into_iter()
        .enumerate()
        .map(|(i, s)| ServerDef {
            name: s.name.unwrap_or_else(|| format!("plugin server #{}", i + 1)),
            socket: s.socket,
            exec: s.exec,
            args: s.args,
            environment: s.environment,
            info_cmd: s.info_cmd,
        })
        .collect()
}

/// Expands `${VAR_NAME}` and `${VAR_NAME:-default}` references.
fn expand_env_vars(content: &str) -> String {
    let mut result = content.to_string();
    let re = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(:-([^}]*))?\}").unwrap();

    for cap in re.captures_iter(content) {
        let full_match = cap.get(0).unwrap().as_str();
        let var_name = cap.get(1).unwrap().as_str();
        let default_value = cap.get(3).map(|m| m.as_str());

        let value = std::env::var(var_name)
            .ok()
            .or_else(|| default_value.map(String::from))
            .unwrap_or_default();

        result = result.replace(full_match, &value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_yaml() {
        let servers = ConfigLoader::load_from_str("[]").unwrap();
        assert!(servers.is_empty());
    }

    #[test]
    fn test_default_name_by_position() {
        let yaml = r#"
- socket: /tmp/a.sock
- name: explicit
  socket: /tmp/b.sock
"#;
        let servers = ConfigLoader::load_from_str(yaml).unwrap();
        assert_eq!(servers[0].name, "plugin server #1");
        assert_eq!(servers[1].name, "explicit");
    }

    #[test]
    fn test_parse_full_server_def() {
        let yaml = r#"
- name: auth
  socket: /tmp/auth.sock
  exec: /usr/local/bin/auth-server
  args: ["--flag"]
  environment:
    FOO: bar
  info_cmd: "/usr/local/bin/auth-server --dump-info"
"#;
        let servers = ConfigLoader::load_from_str(yaml).unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].args, vec!["--flag".to_string()]);
        assert_eq!(servers[0].environment.get("FOO").map(String::as_str), Some("bar"));
    }

    #[test]
    fn test_env_var_expansion() {
        // SAFETY: this test runs in a single-threaded context
        unsafe { std::env::set_var("TEST_SOCKET", "/tmp/test.sock") };

        let yaml = "- socket: ${TEST_SOCKET}\n";
        let servers = ConfigLoader::load_from_str(yaml).unwrap();
        assert_eq!(servers[0].socket.to_str().unwrap(), "/tmp/test.sock");

        // SAFETY: this test runs in a single-threaded context
        unsafe { std::env::remove_var("TEST_SOCKET") };
    }

    #[test]
    fn test_env_var_default_value() {
        let yaml = "- socket: ${NONEXISTENT_VAR:-/tmp/default.sock}\n";
        let servers = ConfigLoader::load_from_str(yaml).unwrap();
        assert_eq!(servers[0].socket.to_str().unwrap(), "/tmp/default.sock");
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let yaml = r#"
- name: dup
  socket: /tmp/a.sock
- name: dup
  socket: /tmp/b.sock
"#;
        let result = ConfigLoader::load_from_str(yaml);
        assert!(matches!(result, Err(ConfigError::DuplicateServerName(_))));
    }
}
