//! Anthropic Messages API streaming adapter.
//!
//! Anthropic's event stream is block-structured rather than delta-flat:
//! `content_block_start` announces a block (text, thinking, or
//! `tool_use`), `content_block_delta` streams its contents, and
//! `content_block_stop` closes it. Tool-call arguments arrive as
//! `input_json_delta` fragments tied to the block's index, reassembled via
//! [`crate::reassembler::ToolCallReassembler`] keyed by the tool's id
//! (captured at `content_block_start`).

use std::collections::BTreeMap;

use serde_json::Value;

use crate::config::{RequestOptions, ToolChoice};
use crate::error::{LlmError, Result};
use crate::provider::{normalize_finish_reason, Provider};
use crate::reassembler::ToolCallReassembler;
use crate::types::{Chunk, Context, ContentPart, MetaFields, Role, Usage};

pub struct AnthropicAdapter;

pub struct AnthropicState {
    reassembler: ToolCallReassembler,
    /// content_block index -> tool call id, populated at content_block_start
    /// so later content_block_delta/stop events (index-only) can find it.
    block_index_to_tool_id: BTreeMap<u64, String>,
    usage: Usage,
}

impl Provider for AnthropicAdapter {
    type State = AnthropicState;

    fn encode_request(&self, model: &str, context: &Context, options: &RequestOptions) -> Value {
        let system: Vec<&str> = context
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .filter_map(|m| m.content.first())
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();

        let messages: Vec<Value> = context
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(encode_message)
            .collect();

        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": true,
            // Anthropic requires max_tokens on every request; 4096 matches
            // the teacher's fallback when a caller doesn't specify one.
            "max_tokens": options.max_tokens.unwrap_or(4096),
        });

        if !system.is_empty() {
            body["system"] = serde_json::json!(system.join("\n\n"));
        }
        if let Some(t) = options.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        if let Some(p) = options.top_p {
            body["top_p"] = serde_json::json!(p);
        }
        if let Some(k) = options.top_k {
            body["top_k"] = serde_json::json!(k);
        }
        if !options.stop_sequences.is_empty() {
            body["stop_sequences"] = serde_json::json!(options.stop_sequences);
        }
        if let Some(crate::config::Reasoning::Budget { budget_tokens }) = options.reasoning {
            body["thinking"] = serde_json::json!({ "type": "enabled", "budget_tokens": budget_tokens });
        }
        if let Some(choice) = &options.tool_choice {
            body["tool_choice"] = match choice {
                ToolChoice::Auto => serde_json::json!({ "type": "auto" }),
                ToolChoice::None => serde_json::json!({ "type": "none" }),
                ToolChoice::Required => serde_json::json!({ "type": "any" }),
                ToolChoice::ByName { name } => serde_json::json!({ "type": "tool", "name": name }),
            };
        }
        if !context.tools.is_empty() {
            body["tools"] = serde_json::json!(context
                .tools
                .iter()
                .map(|t| serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameter_schema,
                }))
                .collect::<Vec<_>>());
        }

        body
    }

    fn init_state(&self) -> Self::State {
        AnthropicState {
            reassembler: ToolCallReassembler::new(),
            block_index_to_tool_id: BTreeMap::new(),
            usage: Usage::default(),
        }
    }

    fn decode_event(&self, event: &Value, state: &mut Self::State) -> Result<Vec<Chunk>> {
        decode_anthropic_event(event, state)
    }

    fn flush(&self, state: &mut Self::State) -> Vec<Chunk> {
        state.reassembler.outstanding_ids().iter().map(|id| state.reassembler.finish(id)).collect()
    }
}

/// Shared by the direct Anthropic adapter and the Bedrock Anthropic
/// sub-decoder (`provider::bedrock`), since both speak the same block
/// event shape once unwrapped from their respective transports.
pub fn decode_anthropic_event(event: &Value, state: &mut AnthropicState) -> Result<Vec<Chunk>> {
    let mut out = Vec::new();
    let event_type = event.get("type").and_then(Value::as_str).unwrap_or_default();

    match event_type {
        "content_block_start" => {
            let index = event.get("index").and_then(Value::as_u64).unwrap_or_default();
            if let Some(block) = event.get("content_block") {
                let block_type = block.get("type").and_then(Value::as_str).unwrap_or_default();
                if block_type == "tool_use" {
                    let id = block.get("id").and_then(Value::as_str).unwrap_or_default();
                    let name = block.get("name").and_then(Value::as_str).unwrap_or_default();
                    state.block_index_to_tool_id.insert(index, id.to_string());
                    out.push(state.reassembler.start(id, name));
                }
            }
        }
        "content_block_delta" => {
            let index = event.get("index").and_then(Value::as_u64).unwrap_or_default();
            if let Some(delta) = event.get("delta") {
                match delta.get("type").and_then(Value::as_str).unwrap_or_default() {
                    "text_delta" => {
                        if let Some(text) = delta.get("text").and_then(Value::as_str) {
                            out.push(Chunk::Content { text: text.to_string() });
                        }
                    }
                    "thinking_delta" => {
                        if let Some(text) = delta.get("thinking").and_then(Value::as_str) {
                            out.push(Chunk::Thinking { text: text.to_string() });
                        }
                    }
                    "input_json_delta" => {
                        if let Some(id) = state.block_index_to_tool_id.get(&index).cloned() {
                            let partial = delta.get("partial_json").and_then(Value::as_str).unwrap_or_default();
                            state.reassembler.append(&id, partial);
                        }
                    }
                    _ => {}
                }
            }
        }
        "content_block_stop" => {
            let index = event.get("index").and_then(Value::as_u64).unwrap_or_default();
            if let Some(id) = state.block_index_to_tool_id.remove(&index) {
                out.push(state.reassembler.finish(&id));
            }
        }
        "message_delta" => {
            if let Some(usage) = event.get("usage") {
                state.usage.output_tokens = usage
                    .get("output_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(state.usage.output_tokens as u64) as u32;
                state.usage.total_tokens = state.usage.input_tokens + state.usage.output_tokens;
            }
            if let Some(reason) = event
                .get("delta")
                .and_then(|d| d.get("stop_reason"))
                .and_then(Value::as_str)
            {
                out.push(Chunk::Meta {
                    fields: MetaFields {
                        finish_reason: Some(normalize_finish_reason(reason)),
                        usage: Some(state.usage),
                        ..Default::default()
                    },
                });
            }
        }
        "message_start" => {
            if let Some(usage) = event.get("message").and_then(|m| m.get("usage")) {
                state.usage.input_tokens = usage.get("input_tokens").and_then(Value::as_u64).unwrap_or(0) as u32;
                state.usage.cached_tokens = usage
                    .get("cache_read_input_tokens")
                    .and_then(Value::as_u64)
                    .map(|v| v as u32);
            }
        }
        "message_stop" => {
            out.push(Chunk::terminal());
        }
        "ping" => {}
        "error" => {
            // An explicit in-stream error event from the provider itself
            // (as opposed to a malformed payload we failed to parse) ends
            // the stream outright; status 0 marks it as originating from
            // the stream body rather than the HTTP response line.
            let message = event
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("anthropic stream error");
            return Err(LlmError::ApiResponse { status: 0, body: event.to_string(), reason: message.to_string() });
        }
        _ => {}
    }

    Ok(out)
}

fn encode_message(message: &crate::types::Message) -> Value {
    let role = match message.role {
        Role::User | Role::Tool => "user",
        Role::Assistant => "assistant",
        Role::System => unreachable!("system messages are filtered before encode_message"),
    };

    let mut parts = Vec::new();
    if message.role == Role::Tool {
        for part in &message.content {
            if let ContentPart::ToolResult { tool_call_id, content, is_error } = part {
                parts.push(serde_json::json!({
                    "type": "tool_result",
                    "tool_use_id": tool_call_id,
                    "content": content,
                    "is_error": is_error,
                }));
            }
        }
    } else {
        for part in &message.content {
            match part {
                ContentPart::Text { text } => parts.push(serde_json::json!({ "type": "text", "text": text })),
                ContentPart::Image { bytes, media_type } => parts.push(serde_json::json!({
                    "type": "image",
                    "source": {
                        "type": "base64",
                        "media_type": media_type,
                        "data": base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes),
                    }
                })),
                ContentPart::ImageUrl { url } => parts.push(serde_json::json!({
                    "type": "image",
                    "source": { "type": "url", "url": url }
                })),
                _ => {}
            }
        }
        if let Some(tool_calls) = &message.tool_calls {
            for tc in tool_calls {
                parts.push(serde_json::json!({
                    "type": "tool_use",
                    "id": tc.id,
                    "name": tc.function.name,
                    "input": serde_json::from_str::<Value>(&tc.function.arguments).unwrap_or(Value::Null),
                }));
            }
        }
    }

    serde_json::json!({ "role": role, "content": parts })
}
