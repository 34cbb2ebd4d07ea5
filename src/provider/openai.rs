//! OpenAI Chat Completions streaming adapter.
//!
//! Also covers OpenAI-compatible endpoints (Groq, Together, etc.) that
//! reuse the same `chat.completion.chunk` shape; those that inline
//! reasoning via `<think>` tags in `delta.content` get it split back out by
//! [`crate::provider::think_tag::ThinkTagSplitter`], which is a no-op when
//! no tags are present.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::config::{RequestOptions, ToolChoice};
use crate::error::{LlmError, Result};
use crate::provider::think_tag::{Piece, ThinkTagSplitter};
use crate::provider::{normalize_finish_reason, Provider};
use crate::reassembler::ToolCallReassembler;
use crate::types::{Chunk, Context, ContentPart, MetaFields, Role, Usage};

pub struct OpenAiAdapter;

/// Per-stream state: a tool-call reassembler keyed by OpenAI's `index`
/// rather than `id` (only the first fragment for a given index carries the
/// id; later fragments repeat the index only), plus the think-tag splitter
/// for inline reasoning.
pub struct OpenAiState {
    reassembler: ToolCallReassembler,
    index_to_id: BTreeMap<u32, String>,
    think: ThinkTagSplitter,
    /// `finish_reason` arrives on its own event, ahead of the trailing
    /// usage-only event `stream_options.include_usage` requests (that one
    /// carries an empty `choices` array). Held here instead of emitted
    /// immediately so the terminal `Meta` chunk stays the last chunk of the
    /// stream once usage is merged in, rather than usage trailing behind it.
    pending_terminal: Option<MetaFields>,
    /// Usage seen before `pending_terminal` exists yet (out-of-order wire,
    /// or usage folded into the same event as `finish_reason`).
    pending_usage: Option<Usage>,
}

impl Provider for OpenAiAdapter {
    type State = OpenAiState;

    fn encode_request(&self, model: &str, context: &Context, options: &RequestOptions) -> Value {
        let messages: Vec<Value> = context.messages.iter().map(encode_message).collect();

        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        if !context.tools.is_empty() {
            let tools: Vec<Value> = context
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameter_schema,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }

        if let Some(choice) = &options.tool_choice {
            body["tool_choice"] = match choice {
                ToolChoice::Auto => Value::String("auto".into()),
                ToolChoice::None => Value::String("none".into()),
                ToolChoice::Required => Value::String("required".into()),
                ToolChoice::ByName { name } => serde_json::json!({
                    "type": "function",
                    "function": { "name": name }
                }),
            };
        }

        let obj = body.as_object_mut().unwrap();
        if let Some(t) = options.temperature {
            obj.insert("temperature".into(), serde_json::json!(t));
        }
        if let Some(m) = options.max_tokens {
            obj.insert("max_completion_tokens".into(), serde_json::json!(m));
        }
        if let Some(p) = options.top_p {
            obj.insert("top_p".into(), serde_json::json!(p));
        }
        if !options.stop_sequences.is_empty() {
            obj.insert("stop".into(), serde_json::json!(options.stop_sequences));
        }
        if let Some(seed) = options.seed {
            obj.insert("seed".into(), serde_json::json!(seed));
        }
        if !options.logit_bias.is_empty() {
            obj.insert("logit_bias".into(), serde_json::json!(options.logit_bias));
        }
        if let Some(tier) = &options.service_tier {
            obj.insert("service_tier".into(), serde_json::json!(tier));
        }

        body
    }

    fn init_state(&self) -> Self::State {
        OpenAiState {
            reassembler: ToolCallReassembler::new(),
            index_to_id: BTreeMap::new(),
            think: ThinkTagSplitter::new(),
            pending_terminal: None,
            pending_usage: None,
        }
    }

    fn decode_event(&self, event: &Value, state: &mut Self::State) -> Result<Vec<Chunk>> {
        let mut out = Vec::new();

        if let Some(err) = event.get("error") {
            let message = err.get("message").and_then(Value::as_str).unwrap_or("unknown error");
            return Err(LlmError::ApiResponse { status: 0, body: event.to_string(), reason: message.to_string() });
        }

        if let Some(usage) = event.get("usage").filter(|u| !u.is_null()) {
            let usage = parse_usage(usage);
            match state.pending_terminal.take() {
                Some(mut fields) => {
                    fields.usage = Some(usage);
                    out.push(Chunk::Meta { fields });
                }
                None => state.pending_usage = Some(usage),
            }
        }

        let Some(choice) = event.get("choices").and_then(Value::as_array).and_then(|c| c.first()) else {
            return Ok(out);
        };

        if let Some(delta) = choice.get("delta") {
            if let Some(content) = delta.get("content").and_then(Value::as_str) {
                for piece in state.think.push(content) {
                    out.push(match piece {
                        Piece::Content(text) => Chunk::Content { text },
                        Piece::Thinking(text) => Chunk::Thinking { text },
                    });
                }
            }
            if let Some(reasoning) = delta.get("reasoning_content").and_then(Value::as_str) {
                out.push(Chunk::Thinking { text: reasoning.to_string() });
            }
            if let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) {
                for tc in tool_calls {
                    self.decode_tool_call_delta(tc, state, &mut out);
                }
            }
        }

        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            for piece in state.think.flush() {
                out.push(match piece {
                    Piece::Content(text) => Chunk::Content { text },
                    Piece::Thinking(text) => Chunk::Thinking { text },
                });
            }
            for id in state.reassembler.outstanding_ids() {
                out.push(state.reassembler.finish(&id));
            }
            state.pending_terminal = Some(MetaFields {
                finish_reason: Some(normalize_finish_reason(reason)),
                terminal: Some(true),
                usage: state.pending_usage.take(),
                ..Default::default()
            });
        }

        Ok(out)
    }

    fn flush(&self, state: &mut Self::State) -> Vec<Chunk> {
        let mut out = Vec::new();
        for piece in state.think.flush() {
            out.push(match piece {
                Piece::Content(text) => Chunk::Content { text },
                Piece::Thinking(text) => Chunk::Thinking { text },
            });
        }
        for id in state.reassembler.outstanding_ids() {
            out.push(state.reassembler.finish(&id));
        }
        // No further usage event arrived before the transport ended; emit
        // the terminal chunk as-is rather than holding it forever.
        if let Some(fields) = state.pending_terminal.take() {
            out.push(Chunk::Meta { fields });
        }
        out
    }
}

impl OpenAiAdapter {
    fn decode_tool_call_delta(&self, tc: &Value, state: &mut OpenAiState, out: &mut Vec<Chunk>) {
        let Some(index) = tc.get("index").and_then(Value::as_u64) else { return };
        let index = index as u32;

        if let Some(id) = tc.get("id").and_then(Value::as_str) {
            state.index_to_id.insert(index, id.to_string());
            let name = tc
                .get("function")
                .and_then(|f| f.get("name"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            out.push(state.reassembler.start(id, name));
        }

        let Some(id) = state.index_to_id.get(&index).cloned() else { return };
        if let Some(args) = tc.get("function").and_then(|f| f.get("arguments")).and_then(Value::as_str) {
            state.reassembler.append(&id, args);
        }
    }
}

fn parse_usage(usage: &Value) -> Usage {
    let get = |key: &str| usage.get(key).and_then(Value::as_u64).unwrap_or(0) as u32;
    Usage {
        input_tokens: get("prompt_tokens"),
        output_tokens: get("completion_tokens"),
        total_tokens: get("total_tokens"),
        cached_tokens: usage
            .get("prompt_tokens_details")
            .and_then(|d| d.get("cached_tokens"))
            .and_then(Value::as_u64)
            .map(|v| v as u32),
        reasoning_tokens: usage
            .get("completion_tokens_details")
            .and_then(|d| d.get("reasoning_tokens"))
            .and_then(Value::as_u64)
            .map(|v| v as u32),
        ..Default::default()
    }
}

fn encode_message(message: &crate::types::Message) -> Value {
    if message.role == Role::Tool {
        let text = message
            .content
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolResult { content, .. } => Some(content.clone()),
                ContentPart::Text { text } => Some(text.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        return serde_json::json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id,
            "content": text,
        });
    }

    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => unreachable!(),
    };

    let mut obj = serde_json::json!({ "role": role });

    let parts: Vec<Value> = message
        .content
        .iter()
        .filter_map(|p| match p {
            ContentPart::Text { text } => Some(serde_json::json!({ "type": "text", "text": text })),
            ContentPart::ImageUrl { url } => Some(serde_json::json!({
                "type": "image_url",
                "image_url": { "url": url }
            })),
            ContentPart::Image { bytes, media_type } => Some(serde_json::json!({
                "type": "image_url",
                "image_url": {
                    "url": format!("data:{media_type};base64,{}", base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes))
                }
            })),
            _ => None,
        })
        .collect();

    if parts.len() == 1 {
        if let Some(text) = parts[0].get("text") {
            obj["content"] = text.clone();
        } else {
            obj["content"] = Value::Array(parts);
        }
    } else if !parts.is_empty() {
        obj["content"] = Value::Array(parts);
    } else {
        obj["content"] = Value::String(String::new());
    }

    if let Some(tool_calls) = &message.tool_calls {
        obj["tool_calls"] = Value::Array(
            tool_calls
                .iter()
                .map(|tc| {
                    serde_json::json!({
                        "id": tc.id,
                        "type": "function",
                        "function": { "name": tc.function.name, "arguments": tc.function.arguments }
                    })
                })
                .collect(),
        );
    }

    obj
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    fn delta_event(content: &str) -> Value {
        serde_json::json!({
            "choices": [{ "index": 0, "delta": { "content": content } }]
        })
    }

    #[test]
    fn decodes_plain_content_delta() {
        let adapter = OpenAiAdapter;
        let mut state = adapter.init_state();
        let chunks = adapter.decode_event(&delta_event("hi"), &mut state).unwrap();
        assert_eq!(chunks, vec![Chunk::Content { text: "hi".into() }]);
    }

    #[test]
    fn finish_reason_emits_terminal_meta_on_flush_when_no_trailing_usage_event_arrives() {
        let adapter = OpenAiAdapter;
        let mut state = adapter.init_state();
        let event = serde_json::json!({
            "choices": [{ "index": 0, "delta": {}, "finish_reason": "stop" }]
        });
        let chunks = adapter.decode_event(&event, &mut state).unwrap();
        assert!(!chunks.iter().any(|c| c.is_terminal()), "terminal must wait for flush, not fire early");

        let flushed = adapter.flush(&mut state);
        assert_eq!(flushed.len(), 1);
        assert!(flushed[0].is_terminal());
    }

    #[test]
    fn trailing_usage_event_is_merged_into_the_terminal_chunk_and_stays_last() {
        let adapter = OpenAiAdapter;
        let mut state = adapter.init_state();

        let finish = serde_json::json!({
            "choices": [{ "index": 0, "delta": {}, "finish_reason": "stop" }]
        });
        let chunks = adapter.decode_event(&finish, &mut state).unwrap();
        assert!(chunks.is_empty(), "finish_reason alone must not yet emit the terminal chunk");

        let usage_only = serde_json::json!({
            "choices": [],
            "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 }
        });
        let chunks = adapter.decode_event(&usage_only, &mut state).unwrap();
        assert_eq!(chunks.len(), 1);
        match &chunks[0] {
            Chunk::Meta { fields } => {
                assert_eq!(fields.terminal, Some(true));
                let usage = fields.usage.as_ref().unwrap();
                assert_eq!(usage.input_tokens, 10);
                assert_eq!(usage.output_tokens, 5);
                assert_eq!(usage.total_tokens, 15);
            }
            other => panic!("expected a terminal Meta chunk, got {other:?}"),
        }

        // Nothing left to flush: the terminal chunk already went out, merged with usage.
        assert!(adapter.flush(&mut state).is_empty());
    }

    #[test]
    fn tool_call_delta_reassembles_across_fragments() {
        let adapter = OpenAiAdapter;
        let mut state = adapter.init_state();
        let start = serde_json::json!({
            "choices": [{ "index": 0, "delta": { "tool_calls": [
                { "index": 0, "id": "call_1", "function": { "name": "search", "arguments": "" } }
            ]}}]
        });
        adapter.decode_event(&start, &mut state).unwrap();

        let frag1 = serde_json::json!({
            "choices": [{ "index": 0, "delta": { "tool_calls": [
                { "index": 0, "function": { "arguments": "{\"q\":" } }
            ]}}]
        });
        adapter.decode_event(&frag1, &mut state).unwrap();

        let frag2 = serde_json::json!({
            "choices": [{ "index": 0, "delta": { "tool_calls": [
                { "index": 0, "function": { "arguments": "\"rust\"}" } }
            ]}}]
        });
        adapter.decode_event(&frag2, &mut state).unwrap();

        let done = serde_json::json!({
            "choices": [{ "index": 0, "delta": {}, "finish_reason": "tool_calls" }]
        });
        let chunks = adapter.decode_event(&done, &mut state).unwrap();
        let tool_call = chunks.iter().find(|c| matches!(c, Chunk::ToolCall { partial: false, .. })).unwrap();
        match tool_call {
            Chunk::ToolCall { name, arguments, .. } => {
                assert_eq!(name, "search");
                assert_eq!(arguments["q"], "rust");
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn encode_request_includes_tools() {
        let adapter = OpenAiAdapter;
        let ctx = Context {
            messages: vec![Message::text(Role::User, "hi")],
            tools: vec![crate::types::ToolDefinition {
                name: "search".into(),
                description: "search the web".into(),
                parameter_schema: serde_json::json!({"type":"object"}),
            }],
        };
        let body = adapter.encode_request("gpt-4o", &ctx, &RequestOptions::default());
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["tools"][0]["function"]["name"], "search");
    }
}
