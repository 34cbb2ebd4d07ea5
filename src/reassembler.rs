//! Tool-call argument reassembly.
//!
//! Providers stream tool-call arguments as fragmented JSON text tied to a
//! call id (OpenAI: index-keyed deltas; Anthropic: `input_json_delta` on a
//! content block). This module accumulates those fragments and produces a
//! finalized `Chunk::ToolCall` once the provider signals the call is
//! complete. A parse failure on finalize is logged and surfaced as a
//! finalized `Chunk::ToolCall` with empty arguments and `error` set, rather
//! than aborting the stream — one malformed tool call shouldn't take down
//! an otherwise healthy response.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::types::Chunk;

#[derive(Debug, Default, Clone)]
struct PendingCall {
    name: String,
    arguments_text: String,
}

/// Accumulates fragmented tool-call argument text, keyed by the provider's
/// call id. One instance lives for the duration of a single stream.
#[derive(Debug, Default)]
pub struct ToolCallReassembler {
    pending: BTreeMap<String, PendingCall>,
}

impl ToolCallReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a new tool call has started. Returns the informational
    /// partial chunk a caller can surface immediately.
    pub fn start(&mut self, id: impl Into<String>, name: impl Into<String>) -> Chunk {
        let id = id.into();
        let name = name.into();
        self.pending.insert(id.clone(), PendingCall { name: name.clone(), arguments_text: String::new() });
        Chunk::ToolCall { id, name, arguments: Value::Null, partial: true, error: None }
    }

    /// Append a fragment of argument JSON text for an in-progress call.
    /// Fragments for an id that was never `start`ed are accumulated under a
    /// synthetic empty name, since some providers (Bedrock Converse) only
    /// send the id on the opening event and deltas with no repeated id.
    pub fn append(&mut self, id: &str, fragment: &str) {
        self.pending
            .entry(id.to_string())
            .or_default()
            .arguments_text
            .push_str(fragment);
    }

    /// Finalize a call: parse the accumulated text as JSON and emit the
    /// terminal `Chunk::ToolCall`. If the text doesn't parse, the call is
    /// still removed from pending state (so a later fragment for the same
    /// id doesn't silently resurrect it) and the finalized chunk carries
    /// empty arguments with `error` set, rather than failing the stream.
    pub fn finish(&mut self, id: &str) -> Chunk {
        let Some(pending) = self.pending.remove(id) else {
            return Chunk::ToolCall {
                id: id.to_string(),
                name: String::new(),
                arguments: serde_json::json!({}),
                partial: false,
                error: Some(format!("tool call '{id}' finished with no matching start")),
            };
        };

        let text = if pending.arguments_text.is_empty() { "{}" } else { &pending.arguments_text };
        match serde_json::from_str::<Value>(text) {
            Ok(arguments) => {
                Chunk::ToolCall { id: id.to_string(), name: pending.name, arguments, partial: false, error: None }
            }
            Err(err) => {
                log::warn!("tool call '{id}' arguments did not parse as JSON: {err}");
                Chunk::ToolCall {
                    id: id.to_string(),
                    name: pending.name,
                    arguments: serde_json::json!({}),
                    partial: false,
                    error: Some(format!("json_parse_failed: {err}")),
                }
            }
        }
    }

    /// Ids with calls still pending at stream end (e.g. the provider closed
    /// the connection mid-call). Callers use this to decide whether to emit
    /// a synthetic failure for each one before finalizing the stream.
    pub fn outstanding_ids(&self) -> Vec<String> {
        self.pending.keys().cloned().collect()
    }
}
