//! Bedrock model families.
//!
//! Every Bedrock model is reached over the same AWS Event-Stream transport
//! (`decode::event_stream`); this module only covers what comes *after*
//! that binary envelope is unwrapped and its payload parsed as JSON — the
//! coordinator hands each unwrapped payload to these adapters exactly as it
//! would hand an SSE event's data field to a direct provider. Four distinct
//! inner shapes exist depending on the underlying model family:
//!
//! - `anthropic.*` models: identical block-event shape to the direct
//!   Anthropic Messages API, reused via [`super::anthropic`].
//! - `meta.llama*` models: a flat prompt template on the way in, a flat
//!   `generation`/`stop_reason` text delta on the way out.
//! - Converse-routed models (Amazon Titan/Nova and others without a
//!   dedicated native wire format): `contentBlockDelta`/`contentBlockStart`/
//!   `messageStop`/`metadata` events.
//! - `openai.*` (gpt-oss) models: OpenAI Chat Completions chunk shape,
//!   reused via [`super::openai`].

pub mod converse;
pub mod llama;

use serde_json::Value;

use crate::config::RequestOptions;
use crate::error::Result;
use crate::provider::anthropic::{decode_anthropic_event, AnthropicAdapter, AnthropicState};
use crate::provider::openai::{OpenAiAdapter, OpenAiState};
use crate::provider::Provider;
use crate::types::{Chunk, Context};

pub struct BedrockAnthropicAdapter;

impl Provider for BedrockAnthropicAdapter {
    type State = AnthropicState;

    fn encode_request(&self, _model: &str, context: &Context, options: &RequestOptions) -> Value {
        // Bedrock's native Anthropic invocation body omits `model` and
        // `stream` (both are implied by the endpoint/API call) but otherwise
        // matches the direct Messages API body, so delegate and strip.
        let mut body = AnthropicAdapter.encode_request("unused", context, options);
        if let Some(obj) = body.as_object_mut() {
            obj.remove("model");
            obj.remove("stream");
            obj.insert("anthropic_version".into(), Value::String("bedrock-2023-05-31".into()));
        }
        body
    }

    fn init_state(&self) -> Self::State {
        AnthropicAdapter.init_state()
    }

    fn decode_event(&self, event: &Value, state: &mut Self::State) -> Result<Vec<Chunk>> {
        decode_anthropic_event(event, state)
    }

    fn flush(&self, state: &mut Self::State) -> Vec<Chunk> {
        AnthropicAdapter.flush(state)
    }
}

pub struct BedrockOpenAiOssAdapter;

impl Provider for BedrockOpenAiOssAdapter {
    type State = OpenAiState;

    fn encode_request(&self, model: &str, context: &Context, options: &RequestOptions) -> Value {
        let mut body = OpenAiAdapter.encode_request(model, context, options);
        if let Some(obj) = body.as_object_mut() {
            obj.remove("model");
            obj.remove("stream");
            obj.remove("stream_options");
        }
        body
    }

    fn init_state(&self) -> Self::State {
        OpenAiAdapter.init_state()
    }

    fn decode_event(&self, event: &Value, state: &mut Self::State) -> Result<Vec<Chunk>> {
        OpenAiAdapter.decode_event(event, state)
    }

    fn flush(&self, state: &mut Self::State) -> Vec<Chunk> {
        OpenAiAdapter.flush(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Message, Role};

    #[test]
    fn bedrock_anthropic_strips_gateway_only_fields() {
        let ctx = Context { messages: vec![Message::text(Role::User, "hi")], tools: vec![] };
        let body = BedrockAnthropicAdapter.encode_request("ignored", &ctx, &RequestOptions::default());
        assert!(body.get("model").is_none());
        assert!(body.get("stream").is_none());
        assert_eq!(body["anthropic_version"], "bedrock-2023-05-31");
    }

    // Delegates decode_event/flush straight to OpenAiAdapter, so the terminal
    // chunk buffering fix there must hold through this path too.
    #[test]
    fn bedrock_openai_oss_keeps_terminal_chunk_last_after_trailing_usage_event() {
        let adapter = BedrockOpenAiOssAdapter;
        let mut state = adapter.init_state();

        let finish = serde_json::json!({
            "choices": [{ "index": 0, "delta": {}, "finish_reason": "stop" }]
        });
        let chunks = adapter.decode_event(&finish, &mut state).unwrap();
        assert!(chunks.is_empty());

        let usage_only = serde_json::json!({
            "choices": [],
            "usage": { "prompt_tokens": 3, "completion_tokens": 4, "total_tokens": 7 }
        });
        let chunks = adapter.decode_event(&usage_only, &mut state).unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_terminal());
        if let Chunk::Meta { fields } = &chunks[0] {
            let usage = fields.usage.as_ref().unwrap();
            assert_eq!(usage.total_tokens, 7);
        } else {
            unreachable!();
        }

        assert!(adapter.flush(&mut state).is_empty());
    }
}
