//! Provider adapters: the only part of the pipeline that knows a specific
//! wire format.
//!
//! Every adapter implements [`Provider`]: build the outgoing request body,
//! initialize whatever per-stream state it needs, and turn each decoded
//! wire event into zero or more canonical [`Chunk`]s. The coordinator
//! (`coordinator.rs`) drives this trait; it never branches on provider
//! identity itself.

pub mod anthropic;
pub mod bedrock;
pub mod openai;
pub mod think_tag;

use serde_json::Value;

use crate::config::RequestOptions;
use crate::error::Result;
use crate::types::{Chunk, Context, FinishReason};

/// Which wire protocol a model family speaks. Picked by [`resolve`] from a
/// model identifier; doesn't by itself determine transport (Bedrock models
/// are always reached over the AWS Event-Stream transport regardless of
/// which of these three framings they speak underneath).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    BedrockAnthropic,
    BedrockLlama,
    BedrockConverse,
    BedrockOpenAiOss,
}

/// Per-stream decode state, opaque to the coordinator. Each adapter defines
/// its own concrete type and boxes it behind this trait object so the
/// coordinator can hold "some provider's state" without a generic
/// parameter.
pub trait DecodeState: Send {}
impl<T: Send> DecodeState for T {}

/// A provider adapter. `S` is the adapter's own per-stream decode state.
pub trait Provider {
    type State: DecodeState;

    /// Build the JSON request body for a streaming completion call.
    fn encode_request(&self, model: &str, context: &Context, options: &RequestOptions) -> Value;

    /// Fresh decode state for a new stream.
    fn init_state(&self) -> Self::State;

    /// Decode one wire-level event (an `SseEvent`'s data field already
    /// parsed as JSON, or a Bedrock frame's JSON payload) into zero or more
    /// canonical chunks, given and updating the adapter's running state.
    fn decode_event(&self, event: &Value, state: &mut Self::State) -> Result<Vec<Chunk>>;

    /// Emit any chunks implied by the stream ending without further events
    /// (e.g. a tool call still open). Called once, after the transport
    /// signals end-of-stream.
    fn flush(&self, state: &mut Self::State) -> Vec<Chunk>;
}

/// Map a provider's raw stop-reason string onto the normalized set. Unknown
/// strings fall back to `Stop` so an unrecognized value never fails a
/// stream outright.
pub fn normalize_finish_reason(raw: &str) -> FinishReason {
    match raw {
        "stop" | "end_turn" | "stop_sequence" | "COMPLETE" => FinishReason::Stop,
        "length" | "max_tokens" => FinishReason::Length,
        "tool_calls" | "tool_use" | "function_call" => FinishReason::ToolCalls,
        "content_filter" | "CONTENT_FILTERED" => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

/// Resolve a model identifier to the wire protocol it speaks. Bedrock model
/// ids are namespaced (`anthropic.claude-*`, `meta.llama*`, `amazon.*`
/// dispatched through Converse, `openai.gpt-oss*`); anything else is
/// assumed to be a direct OpenAI- or Anthropic-compatible endpoint based on
/// its prefix.
pub fn resolve(model: &str) -> Result<ProviderKind> {
    if let Some(rest) = model.strip_prefix("bedrock/") {
        return Ok(if rest.starts_with("anthropic.") {
            ProviderKind::BedrockAnthropic
        } else if rest.starts_with("meta.llama") {
            ProviderKind::BedrockLlama
        } else if rest.starts_with("openai.") {
            ProviderKind::BedrockOpenAiOss
        } else {
            ProviderKind::BedrockConverse
        });
    }
    if model.starts_with("claude-") {
        return Ok(ProviderKind::Anthropic);
    }
    if model.starts_with("gpt-") || model.starts_with("o1") || model.starts_with("o3") {
        return Ok(ProviderKind::OpenAi);
    }
    Err(crate::error::LlmError::ProviderUnsupported { model: model.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_bedrock_namespaces() {
        assert_eq!(resolve("bedrock/anthropic.claude-3-5-sonnet").unwrap(), ProviderKind::BedrockAnthropic);
        assert_eq!(resolve("bedrock/meta.llama3-70b").unwrap(), ProviderKind::BedrockLlama);
        assert_eq!(resolve("bedrock/openai.gpt-oss-120b").unwrap(), ProviderKind::BedrockOpenAiOss);
        assert_eq!(resolve("bedrock/amazon.titan-text").unwrap(), ProviderKind::BedrockConverse);
    }

    #[test]
    fn resolves_direct_providers() {
        assert_eq!(resolve("claude-3-5-sonnet-latest").unwrap(), ProviderKind::Anthropic);
        assert_eq!(resolve("gpt-4o").unwrap(), ProviderKind::OpenAi);
    }

    #[test]
    fn unknown_model_is_unsupported() {
        assert!(resolve("some-random-model").is_err());
    }

    #[test]
    fn unrecognized_finish_reason_falls_back_to_stop() {
        assert_eq!(normalize_finish_reason("weird_new_value"), FinishReason::Stop);
    }
}
