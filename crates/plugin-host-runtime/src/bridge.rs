//! The event bridge: drives one phase call as a nested RPC conversation.
//!
//! `HandleEvent` starts the conversation; each subsequent `Data` payload
//! either terminates it (`"ret"`) or names a PDK method to invoke, whose
//! outcome is threaded back in as `plugin.Step`/`plugin.StepError`. The
//! `EventId` the server hands back is opaque to the host — it is echoed
//! verbatim on every continuation, never inspected.

use plugin_host_core::{PdkDispatcher, PluginHostError, PluginHostResult};
use plugin_host_transport::RpcClient;
use serde_json::{json, Value};
use tracing::trace;

/// Drives the full `HandleEvent` conversation for one phase call on
/// `instance_id`, servicing PDK callbacks through `pdk` until the server
/// sends `"ret"` or an RPC call fails.
pub async fn drive_phase(
    client: &RpcClient,
    pdk: &dyn PdkDispatcher,
    instance_id: &str,
    phase: &str,
) -> PluginHostResult<()> {
    let mut response = client
        .call(
            "plugin.HandleEvent",
            json!({"InstanceId": instance_id, "EventName": phase}),
        )
        .await?;

    loop {
        let event_id = extract_field(client, &response, "EventId")?;
        let data = extract_field(client, &response, "Data")?;

        if data.as_str() == Some("ret") {
            trace!(instance_id, phase, "phase conversation completed");
            return Ok(());
        }

        let method = data
            .get("Method")
            .and_then(Value::as_str)
            .ok_or_else(|| decode_error(client, "Data.Method missing or not a string"))?
            .to_string();
        let args = data.get("Args").cloned().unwrap_or(Value::Null);

        let (continuation_method, payload) = match pdk.call_pdk_method(&method, args).await {
            Ok(result) => ("plugin.Step", result),
            Err(err) => ("plugin.StepError", err),
        };

        response = client
            .call(continuation_method, json!({"EventId": event_id, "Data": payload}))
            .await?;
    }
}

fn extract_field(client: &RpcClient, response: &Value, field: &str) -> PluginHostResult<Value> {
    response
        .get(field)
        .cloned()
        .ok_or_else(|| decode_error(client, &format!("response missing '{field}'")))
}

fn decode_error(client: &RpcClient, reason: &str) -> PluginHostError {
    PluginHostError::DecodeError {
        server: client.server_name().to_string(),
        reason: reason.to_string(),
    }
}
