//! Command bridge: JSON-RPC-shaped commands from HTTP or WebSocket clients
//! are forwarded to the host application's command dispatcher, with a hard
//! 10 second wait and structured id correlation on the way back.

use serde_json::{json, Value};

use crate::host::{HostError, HostHandle};

/// Forward a raw command string to the host and decode its reply.
pub async fn dispatch(host: &HostHandle, command: String) -> Value {
    match host.command(command).await {
        Ok(reply) => decode_reply(&reply),
        Err(HostError::Timeout) => json!({"ok": false, "error": "Command timed out"}),
        Err(HostError::Closed) => json!({"ok": false, "error": "Host unavailable"}),
    }
}

/// Host replies are free-form strings: a JSON object passes through
/// unchanged, an empty reply acknowledges, anything else is wrapped.
fn decode_reply(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({"ok": true});
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Value::Object(map),
        _ => json!({"ok": true, "result": raw}),
    }
}

/// Echo the request id into the response so the client can correlate.
/// Always merges through the serializer; reply payloads containing quotes
/// or backslashes must survive the trip intact.
pub fn correlate(id: Option<Value>, reply: Value) -> Value {
    match id {
        None => reply,
        Some(id) => match reply {
            Value::Object(mut map) => {
                map.insert("id".to_string(), id);
                Value::Object(map)
            }
            other => json!({"id": id, "result": other}),
        },
    }
}
