//! Canonical value types shared by every provider adapter.
//!
//! These are the types the rest of the crate is built around: pure values
//! with deep equality, produced by adapters and consumed by callers. A
//! `Chunk` is self-contained and immutable; a stream is a finite ordered
//! sequence of them, ending in at most one terminal `Meta`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One unit of streamed output.
///
/// `Content` and `Thinking` are never concatenated together — callers that
/// want "the text" and callers that want "the reasoning" read different
/// variants. `ToolCall` may appear twice for the same `id`: once with
/// `partial: true` (informational, emitted as soon as a provider announces
/// the call) and once with `partial: false` (the finalized call). Only the
/// finalized one should be persisted into conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Chunk {
    Content { text: String },
    Thinking { text: String },
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
        partial: bool,
        /// Set when finalization failed to parse the accumulated argument
        /// text as JSON (`arguments` is then an empty object). Absent on
        /// every other chunk, including the informational `partial: true`
        /// announcement.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        error: Option<String>,
    },
    Meta { fields: MetaFields },
}

impl Chunk {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Chunk::Meta { fields } if fields.terminal == Some(true))
    }

    pub fn terminal() -> Self {
        let mut fields = MetaFields::default();
        fields.terminal = Some(true);
        Chunk::Meta { fields }
    }
}

/// The `Meta` chunk's field bag. Known keys are first-class; anything else a
/// provider sends rides along in `raw_event` so it round-trips without the
/// adapter needing to understand it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_event: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Normalized stop reason. Provider-specific strings are mapped onto this
/// set by each adapter (see `provider::normalize_finish_reason`); anything
/// unrecognized falls back to `Stop` rather than failing the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

/// Resolved once per stream, at completion, error, or cancellation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamMetadata {
    pub status: Option<u16>,
    pub headers: BTreeMap<String, String>,
    pub usage: Option<Usage>,
    pub finish_reason: Option<FinishReason>,
    pub message: Option<Message>,
    pub provider_fields: BTreeMap<String, Value>,
}

/// Token accounting. Costs are populated only when a caller attaches
/// pricing externally; this crate never looks up prices itself (pricing
/// tables are out of scope, per spec.md §1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
}

impl Usage {
    pub fn merge(&mut self, other: Usage) {
        self.input_tokens = other.input_tokens;
        self.output_tokens = other.output_tokens;
        self.total_tokens = other.total_tokens;
        self.cached_tokens = other.cached_tokens.or(self.cached_tokens);
        self.reasoning_tokens = other.reasoning_tokens.or(self.reasoning_tokens);
    }
}

/// Role of a message's sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One piece of a message's content. A message with role `Tool` must carry
/// `tool_call_id` on the owning `Message`, not on the part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image { bytes: Vec<u8>, media_type: String },
    ImageUrl { url: String },
    File { bytes: Vec<u8>, media_type: String, name: String },
    Thinking { text: String },
    ToolCall { id: String, name: String, arguments: Value },
    ToolResult { tool_call_id: String, content: String, is_error: bool },
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl Message {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentPart::Text { text: text.into() }],
            tool_call_id: None,
            tool_calls: None,
            name: None,
            metadata: BTreeMap::new(),
        }
    }
}

/// A finalized tool invocation. Arguments are kept as JSON text — some
/// providers only ever emit them as a string — and parsed on demand by
/// callers via `arguments_value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    pub fn arguments_value(&self) -> std::result::Result<Value, serde_json::Error> {
        serde_json::from_str(&self.function.arguments)
    }
}

/// A tool the model may call. `callback` is intentionally absent from this
/// type: the core surfaces tool calls but never executes them (spec.md §1
/// non-goal).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameter_schema: Value,
}

/// Ordered conversation plus optionally attached tools. The input to a
/// request, and — after a stream finalizes — the input with the assistant
/// message appended.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Context {
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

impl Context {
    pub fn with_assistant_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    /// Reject contexts carrying more than one `system` message. Every
    /// provider this crate speaks to accepts at most one system prompt;
    /// silently joining several would hide a caller mistake, so this is a
    /// hard `config.validation` error rather than a lossy merge.
    pub fn validate(&self) -> crate::error::Result<()> {
        let system_count = self.messages.iter().filter(|m| m.role == Role::System).count();
        if system_count > 1 {
            return Err(crate::error::LlmError::ConfigValidation {
                field: "messages".into(),
                reason: format!("at most one system message is allowed, got {system_count}"),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;

    #[test]
    fn rejects_multiple_system_messages() {
        let context = Context {
            messages: vec![
                Message::text(Role::System, "be terse"),
                Message::text(Role::System, "answer in French"),
                Message::text(Role::User, "hi"),
            ],
            tools: vec![],
        };
        let err = context.validate().unwrap_err();
        assert!(matches!(err, LlmError::ConfigValidation { field, .. } if field == "messages"));
    }

    #[test]
    fn accepts_a_single_system_message() {
        let context = Context {
            messages: vec![Message::text(Role::System, "be terse"), Message::text(Role::User, "hi")],
            tools: vec![],
        };
        assert!(context.validate().is_ok());
    }
}
