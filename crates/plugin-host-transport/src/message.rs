//! MessagePack-RPC wire framing.
//!
//! Built directly on `rmpv` rather than a dedicated msgpack-rpc crate —
//! see the root `DESIGN.md` for why. Frames are the three array shapes
//! MessagePack-RPC defines:
//!
//! - request:      `[0, msgid, method, params]`
//! - response:      `[1, msgid, error, result]`
//! - notification: `[2, method, params]`

use plugin_host_core::PluginHostError;
use rmpv::Value;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

const TYPE_REQUEST: i64 = 0;
const TYPE_RESPONSE: i64 = 1;
const TYPE_NOTIFICATION: i64 = 2;

/// A decoded MessagePack-RPC frame.
#[derive(Debug)]
pub enum Frame {
    Request { msgid: u64, method: String, params: Value },
    Response { msgid: u64, error: Value, result: Value },
    Notification { method: String, params: Value },
}

/// Converts any `Serialize` value (typically a `serde_json::Value`) into
/// an `rmpv::Value` suitable for framing.
pub fn to_msgpack_value<T: serde::Serialize>(value: &T) -> Result<Value, String> {
    rmpv::ext::to_value(value).map_err(|e| e.to_string())
}

/// Converts a decoded `rmpv::Value` back into a `serde_json::Value`.
pub fn from_msgpack_value(value: Value) -> Result<serde_json::Value, String> {
    rmpv::ext::from_value(value).map_err(|e| e.to_string())
}

pub fn encode_request(msgid: u64, method: &str, params: Value) -> Vec<u8> {
    let frame = Value::Array(vec![
        Value::from(TYPE_REQUEST),
        Value::from(msgid),
        Value::from(method),
        params,
    ]);
    encode(&frame)
}

pub fn encode_response(msgid: u64, error: Value, result: Value) -> Vec<u8> {
    let frame = Value::Array(vec![
        Value::from(TYPE_RESPONSE),
        Value::from(msgid),
        error,
        result,
    ]);
    encode(&frame)
}

pub fn encode_notification(method: &str, params: Value) -> Vec<u8> {
    let frame = Value::Array(vec![
        Value::from(TYPE_NOTIFICATION),
        Value::from(method),
        params,
    ]);
    encode(&frame)
}

fn encode(frame: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    rmpv::encode::write_value(&mut buf, frame).expect("encoding an in-memory Value cannot fail");
    buf
}

/// Parses a fully-buffered `rmpv::Value` array into a [`Frame`].
pub fn decode_frame(value: Value) -> Result<Frame, String> {
    let items = match value {
        Value::Array(items) => items,
        other => return Err(format!("expected array frame, got {other:?}")),
    };
    let mut items = items.into_iter();
    let kind = items
        .next()
        .and_then(|v| v.as_i64())
        .ok_or_else(|| "missing frame type".to_string())?;

    match kind {
        TYPE_REQUEST => {
            let msgid = items.next().and_then(|v| v.as_u64()).ok_or("missing msgid")?;
            let method = items
                .next()
                .and_then(|v| v.as_str().map(str::to_string))
                .ok_or("missing method")?;
            let params = items.next().unwrap_or(Value::Nil);
            Ok(Frame::Request { msgid, method, params })
        }
        TYPE_RESPONSE => {
            let msgid = items.next().and_then(|v| v.as_u64()).ok_or("missing msgid")?;
            let error = items.next().unwrap_or(Value::Nil);
            let result = items.next().unwrap_or(Value::Nil);
            Ok(Frame::Response { msgid, error, result })
        }
        TYPE_NOTIFICATION => {
            let method = items
                .next()
                .and_then(|v| v.as_str().map(str::to_string))
                .ok_or("missing method")?;
            let params = items.next().unwrap_or(Value::Nil);
            Ok(Frame::Notification { method, params })
        }
        other => Err(format!("unknown frame type {other}")),
    }
}

/// Reads one frame from an async byte stream, buffering partial reads
/// across calls. Returns `Ok(None)` on a clean EOF with no partial frame
/// pending.
pub async fn read_frame<R>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<Option<Value>>
where
    R: AsyncRead + Unpin,
{
    loop {
        if !buf.is_empty() {
            let mut cursor = io::Cursor::new(&buf[..]);
            match rmpv::decode::read_value(&mut cursor) {
                Ok(value) => {
                    let consumed = cursor.position() as usize;
                    buf.drain(..consumed);
                    return Ok(Some(value));
                }
                Err(rmpv::decode::Error::InvalidMarkerRead(e))
                | Err(rmpv::decode::Error::InvalidDataRead(e))
                    if e.kind() == io::ErrorKind::UnexpectedEof =>
                {
                    // fall through and read more bytes
                }
                Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e.to_string())),
            }
        }

        let mut tmp = [0u8; 8192];
        let n = reader.read(&mut tmp).await?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed mid-frame",
            ));
        }
        buf.extend_from_slice(&tmp[..n]);
    }
}

/// Maps a decoded RPC-level error payload to a [`PluginHostError`],
/// recognising the "No plugin instance" sentinel the bridge loop retries on.
pub fn classify_remote_error(server: &str, error: Value) -> PluginHostError {
    let payload = from_msgpack_value(error.clone()).unwrap_or(serde_json::Value::Null);
    let as_text = error.as_str().map(str::to_string).or_else(|| payload.as_str().map(str::to_string));
    if let Some(text) = as_text {
        if text.starts_with("No plugin instance") {
            return PluginHostError::NoRemoteInstance { key: text };
        }
    }
    PluginHostError::RemoteError {
        server: server.to_string(),
        payload,
    }
}
