//! The closed error taxonomy for the streaming pipeline.
//!
//! Every failure path a caller can observe — transport, decode, provider
//! response, reassembly, configuration — resolves to one of these variants.
//! Panics are reserved for invariant breaks in our own bookkeeping, never
//! for provider or network misbehavior.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LlmError>;

/// Why an AWS Event-Stream frame failed to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStreamFault {
    Crc,
    Length,
    ResyncFailed,
}

impl std::fmt::Display for EventStreamFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Crc => "crc",
            Self::Length => "length",
            Self::ResyncFailed => "resync_failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("connection error: {0}")]
    TransportConnection(String),

    #[error("request timed out: {0}")]
    TransportTimeout(String),

    #[error("provider returned HTTP {status}: {reason}")]
    ApiResponse {
        status: u16,
        body: String,
        reason: String,
    },

    #[error("malformed SSE stream: {0}")]
    DecodeSse(String),

    #[error("AWS event-stream framing failure ({fault}): {detail}")]
    DecodeEventStream { fault: EventStreamFault, detail: String },

    #[error("valid frame with malformed payload: {0}")]
    DecodePayload(String),

    #[error("tool arguments did not parse as JSON: {0}")]
    ParseToolArguments(String),

    #[error("no adapter registered for model '{model}'")]
    ProviderUnsupported { model: String },

    #[error("missing credentials: {0}")]
    AuthMissingCredentials(String),

    #[error("failed to assume role: {0}")]
    AuthAssumeRoleFailed(String),

    #[error("invalid option '{field}': {reason}")]
    ConfigValidation { field: String, reason: String },

    #[error("stream cancelled")]
    Cancelled,

    #[error("HTTP ingress task crashed")]
    InternalTaskCrash,

    #[error("decode buffer exceeded hard cap ({size} bytes)")]
    BufferOverflow { size: usize },
}

impl LlmError {
    /// Build an `api.response` error from a raw HTTP status and body, lifting
    /// `error.message` out of the body when it parses as JSON.
    pub fn from_api_response(status: u16, body: String) -> Self {
        let reason = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| {
                v.get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| format!("HTTP {status}"));

        Self::ApiResponse { status, body, reason }
    }

    /// Whether this error is recoverable mid-stream (logged and dropped)
    /// versus fatal (aborts the stream). Only per-frame decode noise during
    /// resync is recoverable; everything else aborts.
    pub fn is_stream_fatal(&self) -> bool {
        !matches!(self, Self::DecodePayload(_))
    }
}
