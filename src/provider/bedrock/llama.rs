//! Bedrock Llama (`meta.llama*`) prompt-template adapter.
//!
//! Llama models on Bedrock take a single flat prompt string rather than a
//! structured message array, using Meta's instruction-tuned chat template
//! (`<|begin_of_text|>`, per-turn `<|start_header_id|>role<|end_header_id|>`
//! wrapping). The response side is equally flat: each event carries a
//! `generation` text fragment, and the final event adds `stop_reason` and
//! token counts.

use serde_json::Value;

use crate::config::RequestOptions;
use crate::error::Result;
use crate::provider::{normalize_finish_reason, Provider};
use crate::types::{Chunk, Context, ContentPart, MetaFields, Role, Usage};

pub struct BedrockLlamaAdapter;

/// No cross-event bookkeeping is needed: every event is self-contained.
pub struct LlamaState;

impl Provider for BedrockLlamaAdapter {
    type State = LlamaState;

    fn encode_request(&self, _model: &str, context: &Context, options: &RequestOptions) -> Value {
        let mut prompt = String::from("<|begin_of_text|>");
        for message in &context.messages {
            let role = match message.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                // Llama's template has no dedicated tool role; Bedrock's
                // Llama models don't support tool calling, so tool-result
                // messages are folded into the user turn as plain text.
                Role::Tool => "user",
            };
            let text = message
                .content
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ToolResult { content, .. } => Some(content.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            prompt.push_str(&format!(
                "<|start_header_id|>{role}<|end_header_id|>\n\n{text}<|eot_id|>"
            ));
        }
        prompt.push_str("<|start_header_id|>assistant<|end_header_id|>\n\n");

        let mut body = serde_json::json!({ "prompt": prompt });
        if let Some(t) = options.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        if let Some(p) = options.top_p {
            body["top_p"] = serde_json::json!(p);
        }
        if let Some(m) = options.max_tokens {
            body["max_gen_len"] = serde_json::json!(m);
        }
        body
    }

    fn init_state(&self) -> Self::State {
        LlamaState
    }

    fn decode_event(&self, event: &Value, _state: &mut Self::State) -> Result<Vec<Chunk>> {
        let mut out = Vec::new();
        if let Some(text) = event.get("generation").and_then(Value::as_str) {
            if !text.is_empty() {
                out.push(Chunk::Content { text: text.to_string() });
            }
        }
        if let Some(reason) = event.get("stop_reason").and_then(Value::as_str) {
            let prompt_tokens = event.get("prompt_token_count").and_then(Value::as_u64).unwrap_or(0) as u32;
            let gen_tokens = event.get("generation_token_count").and_then(Value::as_u64).unwrap_or(0) as u32;
            out.push(Chunk::Meta {
                fields: MetaFields {
                    finish_reason: Some(normalize_finish_reason(reason)),
                    terminal: Some(true),
                    usage: Some(Usage {
                        input_tokens: prompt_tokens,
                        output_tokens: gen_tokens,
                        total_tokens: prompt_tokens + gen_tokens,
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            });
        }
        Ok(out)
    }

    fn flush(&self, _state: &mut Self::State) -> Vec<Chunk> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    #[test]
    fn wraps_messages_in_llama_chat_template() {
        let ctx = Context { messages: vec![Message::text(Role::User, "hi")], tools: vec![] };
        let body = BedrockLlamaAdapter.encode_request("ignored", &ctx, &RequestOptions::default());
        let prompt = body["prompt"].as_str().unwrap();
        assert!(prompt.contains("<|start_header_id|>user<|end_header_id|>"));
        assert!(prompt.ends_with("<|start_header_id|>assistant<|end_header_id|>\n\n"));
    }

    #[test]
    fn decodes_generation_and_stop_reason() {
        let adapter = BedrockLlamaAdapter;
        let mut state = adapter.init_state();
        let chunks = adapter
            .decode_event(&serde_json::json!({ "generation": "hello" }), &mut state)
            .unwrap();
        assert_eq!(chunks, vec![Chunk::Content { text: "hello".into() }]);

        let chunks = adapter
            .decode_event(
                &serde_json::json!({
                    "generation": "",
                    "stop_reason": "stop",
                    "prompt_token_count": 10,
                    "generation_token_count": 5
                }),
                &mut state,
            )
            .unwrap();
        assert!(chunks[0].is_terminal());
    }
}
