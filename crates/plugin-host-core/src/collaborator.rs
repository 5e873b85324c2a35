//! Gateway collaborator traits.
//!
//! These are the seams where the host calls back into the surrounding
//! gateway process. The host never implements them; the embedding
//! gateway supplies implementations and hands them to
//! `plugin_host_runtime::PluginHost::new`. There is deliberately no
//! logging-sink trait here — the host logs directly through `tracing`,
//! and the embedding process owns the subscriber.

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Dispatches a PDK method call a plugin makes while handling a phase.
///
/// Mirrors the gateway's own `call_pdk_method(name, args) -> (result, err)`
/// convention; the Rust shape folds the two-return-value convention into
/// a `Result`.
#[async_trait]
pub trait PdkDispatcher: Send + Sync {
    async fn call_pdk_method(&self, name: &str, args: Value) -> Result<Value, Value>;
}

/// Schedules a closure to run after the current response has been
/// delivered to the client — the mechanism the `log` phase uses to defer
/// its bridge conversation past the response boundary.
///
/// `run_after(Duration::ZERO, fut)` realizes the gateway's own
/// `run_after(0, fn)` scheduling primitive.
pub trait DeferredScheduler: Send + Sync {
    fn run_after(
        &self,
        delay: Duration,
        task: Pin<Box<dyn Future<Output = ()> + Send>>,
    );
}

/// A snapshot of per-request state taken at the moment the `log` phase
/// begins, so it can be read by PDK calls made from within the deferred
/// task long after the original request context is gone.
#[derive(Debug, Clone)]
pub struct LogContextSnapshot {
    /// The serialized log record the plugin may inspect or rewrite.
    pub serialized_log: Value,
    /// The per-request context map (`ngx.ctx`-equivalent).
    pub request_context: Value,
    /// The shared context map visible across the whole connection.
    pub shared_context: Value,
}

/// Produces a [`LogContextSnapshot`] from the currently executing
/// request. Only called synchronously, before the response is sent.
pub trait RequestContextAccessor: Send + Sync {
    fn snapshot_log_context(&self) -> LogContextSnapshot;
}

/// Identity and shutdown state of the OS worker the host is running in.
///
/// Only the worker for which `id() == 0` is authorised to spawn and
/// respawn plugin server processes — the "supervisor worker".
pub trait WorkerInfo: Send + Sync {
    /// This worker's numeric id; worker 0 is the supervisor worker.
    fn id(&self) -> u32;
    /// True once a shutdown signal has been received; checked at
    /// supervisor-loop boundaries.
    fn is_exiting(&self) -> bool;
}
