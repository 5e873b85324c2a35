//! Unified error taxonomy for the external plugin host.
//!
//! One variant per error kind that can propagate out of this crate's own
//! calls; the doc comment on each variant states its recovery policy so
//! call sites don't need to re-derive it. A PDK failure is not one of
//! these variants: `bridge::drive_phase` never turns it into a Rust
//! `Err` at all — the PDK method's raw `Err(Value)` becomes the
//! `StepError` continuation payload sent back to the plugin, which
//! decides how to proceed, so it has no typed representation here.

use thiserror::Error;

/// Errors produced anywhere in the plugin host.
#[derive(Debug, Error)]
pub enum PluginHostError {
    /// No external plugin config path was supplied. Logged at INFO by the
    /// caller; this variant exists so callers can match on it explicitly
    /// rather than treating "no config" as a parse failure.
    #[error("no external plugin configuration supplied")]
    ConfigMissing,

    /// The configuration file could not be parsed. Fatal: fails startup.
    #[error("failed to parse plugin configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Two servers advertised a plugin under the same name. The first
    /// registration wins; this error is logged, not propagated.
    #[error("duplicate plugin name: {0}")]
    DuplicatePlugin(String),

    /// A server's `info_cmd` could not be run or its output could not be
    /// parsed. That server's plugins are skipped; other servers are
    /// unaffected.
    #[error("info command failed for server '{server}': {reason}")]
    InfoCmdFailure { server: String, reason: String },

    /// The child process for a server could not be spawned. Fatal for
    /// that server's supervisor loop only.
    #[error("failed to spawn server '{server}': {source}")]
    SpawnFailure {
        server: String,
        #[source]
        source: std::io::Error,
    },

    /// The RPC socket closed mid-call. Surfaced to the caller; the phase
    /// adapter does not retry on this error.
    #[error("transport closed for server '{server}'")]
    TransportClosed { server: String },

    /// A response could not be decoded as a valid MessagePack-RPC frame.
    #[error("failed to decode RPC response from '{server}': {reason}")]
    DecodeError { server: String, reason: String },

    /// The remote peer returned an RPC-level error payload.
    #[error("remote error from '{server}': {payload}")]
    RemoteError {
        server: String,
        payload: serde_json::Value,
    },

    /// `plugin.StartInstance` returned an error. The registry's
    /// placeholder for this key has already been cleared by the caller.
    #[error("failed to start plugin instance '{plugin_name}': {reason}")]
    StartFailed { plugin_name: String, reason: String },

    /// An RPC returned the "No plugin instance" sentinel. The phase
    /// adapter evicts the stale entry and retries the phase exactly once;
    /// a second occurrence propagates as this same variant.
    #[error("no plugin instance for key '{key}'")]
    NoRemoteInstance { key: String },

    /// Any other I/O failure (process wait, socket connect, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type used throughout the plugin host.
pub type PluginHostResult<T> = Result<T, PluginHostError>;
