//! Bedrock Converse API streaming adapter, used for model families with no
//! dedicated native wire format (Amazon Titan/Nova, Cohere, Mistral, and
//! others reached through Bedrock's unified `ConverseStream` event shape).
//!
//! Event shape: `contentBlockStart{start:{toolUse:{toolUseId,name}}}`,
//! `contentBlockDelta{delta:{text|reasoningContent:{text}|toolUse:{input}}}`,
//! `contentBlockStop`, `messageStop{stopReason}`, `metadata{usage}`.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::config::RequestOptions;
use crate::error::{LlmError, Result};
use crate::provider::{normalize_finish_reason, Provider};
use crate::reassembler::ToolCallReassembler;
use crate::types::{Chunk, Context, ContentPart, MetaFields, Role, Usage};

pub struct BedrockConverseAdapter;

pub struct ConverseState {
    reassembler: ToolCallReassembler,
    block_index_to_tool_id: BTreeMap<u64, String>,
    /// `messageStop` and the `metadata{usage}` event that follows it are
    /// separate events; holding the terminal `Meta` here until usage is
    /// merged in (or the transport ends) keeps it the last chunk emitted.
    pending_terminal: Option<MetaFields>,
    pending_usage: Option<Usage>,
}

impl Provider for BedrockConverseAdapter {
    type State = ConverseState;

    fn encode_request(&self, _model: &str, context: &Context, options: &RequestOptions) -> Value {
        let system: Vec<Value> = context
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .filter_map(|m| m.content.first())
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(serde_json::json!({ "text": text })),
                _ => None,
            })
            .collect();

        let messages: Vec<Value> = context
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(encode_message)
            .collect();

        let mut inference_config = serde_json::Map::new();
        if let Some(t) = options.temperature {
            inference_config.insert("temperature".into(), serde_json::json!(t));
        }
        if let Some(p) = options.top_p {
            inference_config.insert("topP".into(), serde_json::json!(p));
        }
        if let Some(m) = options.max_tokens {
            inference_config.insert("maxTokens".into(), serde_json::json!(m));
        }
        if !options.stop_sequences.is_empty() {
            inference_config.insert("stopSequences".into(), serde_json::json!(options.stop_sequences));
        }

        let mut body = serde_json::json!({ "messages": messages });
        if !system.is_empty() {
            body["system"] = Value::Array(system);
        }
        if !inference_config.is_empty() {
            body["inferenceConfig"] = Value::Object(inference_config);
        }
        if !context.tools.is_empty() {
            body["toolConfig"] = serde_json::json!({
                "tools": context.tools.iter().map(|t| serde_json::json!({
                    "toolSpec": {
                        "name": t.name,
                        "description": t.description,
                        "inputSchema": { "json": t.parameter_schema },
                    }
                })).collect::<Vec<_>>()
            });
        }
        body
    }

    fn init_state(&self) -> Self::State {
        ConverseState {
            reassembler: ToolCallReassembler::new(),
            block_index_to_tool_id: BTreeMap::new(),
            pending_terminal: None,
            pending_usage: None,
        }
    }

    fn decode_event(&self, event: &Value, state: &mut Self::State) -> Result<Vec<Chunk>> {
        let mut out = Vec::new();

        if let Some(err_message) = event.get("message").and_then(Value::as_str) {
            if event.get("contentBlockIndex").is_none() && event.get("delta").is_none() {
                return Err(LlmError::ApiResponse { status: 0, body: event.to_string(), reason: err_message.to_string() });
            }
        }

        if let Some(start) = event.get("contentBlockStart") {
            let index = start.get("contentBlockIndex").and_then(Value::as_u64).unwrap_or_default();
            if let Some(tool_use) = start.get("start").and_then(|s| s.get("toolUse")) {
                let id = tool_use.get("toolUseId").and_then(Value::as_str).unwrap_or_default();
                let name = tool_use.get("name").and_then(Value::as_str).unwrap_or_default();
                state.block_index_to_tool_id.insert(index, id.to_string());
                out.push(state.reassembler.start(id, name));
            }
        }

        if let Some(delta_event) = event.get("contentBlockDelta") {
            let index = delta_event.get("contentBlockIndex").and_then(Value::as_u64).unwrap_or_default();
            if let Some(delta) = delta_event.get("delta") {
                if let Some(text) = delta.get("text").and_then(Value::as_str) {
                    out.push(Chunk::Content { text: text.to_string() });
                }
                if let Some(text) = delta.get("reasoningContent").and_then(|r| r.get("text")).and_then(Value::as_str) {
                    out.push(Chunk::Thinking { text: text.to_string() });
                }
                if let Some(input) = delta.get("toolUse").and_then(|t| t.get("input")).and_then(Value::as_str) {
                    if let Some(id) = state.block_index_to_tool_id.get(&index).cloned() {
                        state.reassembler.append(&id, input);
                    }
                }
            }
        }

        if let Some(stop) = event.get("contentBlockStop") {
            let index = stop.get("contentBlockIndex").and_then(Value::as_u64).unwrap_or_default();
            if let Some(id) = state.block_index_to_tool_id.remove(&index) {
                out.push(state.reassembler.finish(&id));
            }
        }

        if let Some(stop) = event.get("messageStop") {
            let reason = stop.get("stopReason").and_then(Value::as_str).unwrap_or("stop");
            state.pending_terminal = Some(MetaFields {
                finish_reason: Some(normalize_finish_reason(reason)),
                terminal: Some(true),
                usage: state.pending_usage.take(),
                ..Default::default()
            });
        }

        if let Some(metadata) = event.get("metadata") {
            if let Some(usage) = metadata.get("usage") {
                let get = |key: &str| usage.get(key).and_then(Value::as_u64).unwrap_or(0) as u32;
                let usage = Usage {
                    input_tokens: get("inputTokens"),
                    output_tokens: get("outputTokens"),
                    total_tokens: get("totalTokens"),
                    ..Default::default()
                };
                match state.pending_terminal.take() {
                    Some(mut fields) => {
                        fields.usage = Some(usage);
                        out.push(Chunk::Meta { fields });
                    }
                    None => state.pending_usage = Some(usage),
                }
            }
        }

        Ok(out)
    }

    fn flush(&self, state: &mut Self::State) -> Vec<Chunk> {
        let mut out: Vec<Chunk> =
            state.reassembler.outstanding_ids().iter().map(|id| state.reassembler.finish(id)).collect();
        // No metadata event followed messageStop before the transport ended;
        // emit the terminal chunk as-is.
        if let Some(fields) = state.pending_terminal.take() {
            out.push(Chunk::Meta { fields });
        }
        out
    }
}

fn encode_message(message: &crate::types::Message) -> Value {
    let role = match message.role {
        Role::User | Role::Tool => "user",
        Role::Assistant => "assistant",
        Role::System => unreachable!("system messages are filtered before encode_message"),
    };

    let mut content = Vec::new();
    for part in &message.content {
        match part {
            ContentPart::Text { text } => content.push(serde_json::json!({ "text": text })),
            ContentPart::ToolResult { tool_call_id, content: c, is_error } => {
                content.push(serde_json::json!({
                    "toolResult": {
                        "toolUseId": tool_call_id,
                        "content": [{ "text": c }],
                        "status": if *is_error { "error" } else { "success" },
                    }
                }));
            }
            _ => {}
        }
    }
    if let Some(tool_calls) = &message.tool_calls {
        for tc in tool_calls {
            content.push(serde_json::json!({
                "toolUse": {
                    "toolUseId": tc.id,
                    "name": tc.function.name,
                    "input": serde_json::from_str::<Value>(&tc.function.arguments).unwrap_or(Value::Null),
                }
            }));
        }
    }

    serde_json::json!({ "role": role, "content": content })
}
