//! Configuration module for the external plugin host.
//!
//! Loads and validates the single YAML server-list file into resolved
//! `plugin_host_core::ServerDef`s.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use schema::{ServerDefConfig, ServerListConfig};
pub use validation::validate_server_list;
