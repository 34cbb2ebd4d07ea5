//! Wire-level frame decoders: turn raw bytes off the socket into discrete
//! events, before any provider-specific interpretation happens.

pub mod event_stream;
pub mod sse;

use base64::Engine;
use serde_json::Value;

use crate::error::{LlmError, Result};

/// Bedrock frame payloads arrive in one of three shapes (spec.md §6): the
/// common `{"bytes":"<base64>"}` (the inner event JSON, base64-encoded,
/// wrapped once more), the equivalent nested `{"chunk":{"bytes":"<base64>"}}`
/// some SDKs surface, or direct JSON (seen on some error frames). All three
/// are normalized to a parsed `Value` here so every provider adapter
/// downstream only ever handles plain JSON, the same as an SSE event's
/// `data` field.
pub fn decode_event_stream_payload(message: &event_stream::EventStreamMessage) -> Result<Value> {
    let raw = serde_json::from_slice::<Value>(&message.payload)
        .map_err(|e| LlmError::DecodePayload(format!("frame payload is not valid JSON: {e}")))?;

    let bytes_holder = raw.get("chunk").unwrap_or(&raw);
    if let Some(b64) = bytes_holder.get("bytes").and_then(Value::as_str) {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(b64)
            .map_err(|e| LlmError::DecodePayload(format!("invalid base64 in frame payload: {e}")))?;
        return serde_json::from_slice::<Value>(&decoded)
            .map_err(|e| LlmError::DecodePayload(format!("decoded frame payload is not valid JSON: {e}")));
    }

    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn unwraps_base64_bytes_field() {
        let inner = serde_json::json!({ "type": "contentBlockDelta" });
        let b64 = base64::engine::general_purpose::STANDARD.encode(inner.to_string());
        let message = event_stream::EventStreamMessage {
            headers: vec![],
            payload: Bytes::from(serde_json::json!({ "bytes": b64 }).to_string()),
        };
        let decoded = decode_event_stream_payload(&message).unwrap();
        assert_eq!(decoded, inner);
    }

    #[test]
    fn unwraps_nested_chunk_bytes_field() {
        let inner = serde_json::json!({ "type": "contentBlockDelta" });
        let b64 = base64::engine::general_purpose::STANDARD.encode(inner.to_string());
        let message = event_stream::EventStreamMessage {
            headers: vec![],
            payload: Bytes::from(serde_json::json!({ "chunk": { "bytes": b64 } }).to_string()),
        };
        let decoded = decode_event_stream_payload(&message).unwrap();
        assert_eq!(decoded, inner);
    }

    #[test]
    fn passes_through_direct_json() {
        let inner = serde_json::json!({ "message": "boom" });
        let message = event_stream::EventStreamMessage { headers: vec![], payload: Bytes::from(inner.to_string()) };
        let decoded = decode_event_stream_payload(&message).unwrap();
        assert_eq!(decoded, inner);
    }
}
