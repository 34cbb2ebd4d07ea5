//! A provider-agnostic streaming completion client for LLM chat APIs.
//!
//! The entry point is [`Client`]: build one with a [`KeyProvider`], then
//! call [`Client::stream`] (for directly-reached OpenAI- or
//! Anthropic-compatible endpoints) or [`Client::stream_bedrock`] (for
//! Bedrock, where the caller supplies an already SigV4-signed request —
//! this crate decodes Bedrock's wire format but does not sign requests
//! itself). Both return an [`LlmStream`]: a lazy, cancellable chunk stream
//! with an independently-awaitable metadata future.
//!
//! ```no_run
//! use llmflow::{Client, Context, Message, Role, RequestOptions};
//! use llmflow::key_provider::StaticKeyProvider;
//!
//! # async fn run() -> llmflow::error::Result<()> {
//! let client = Client::new(StaticKeyProvider::new().with_api_key("openai", "sk-..."));
//! let context = Context { messages: vec![Message::text(Role::User, "hi")], tools: vec![] };
//! let mut stream = client.stream("gpt-4o", &context, &RequestOptions::default()).await?;
//! while let Some(chunk) = stream.next().await {
//!     let _chunk = chunk?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod decode;
pub mod error;
pub mod fixture;
pub mod handle;
pub mod http;
pub mod key_provider;
pub mod provider;
pub mod reassembler;
pub mod types;

use std::sync::Arc;

use futures::TryStreamExt;

use coordinator::{StreamOptions, Transport, DEFAULT_QUEUE_CAPACITY};
use error::{LlmError, Result};
use fixture::FixtureSink;
use handle::LlmStream;
use key_provider::KeyProvider;
use provider::{anthropic::AnthropicAdapter, openai::OpenAiAdapter, Provider, ProviderKind};

pub use config::RequestOptions;
pub use handle::Response;
pub use types::{Chunk, Context, ContentPart, FinishReason, Message, Role, StreamMetadata, ToolCall, ToolDefinition, Usage};

/// Ties an HTTP client and credential source together. Cheap to clone
/// (everything inside is reference-counted); typically constructed once
/// per process.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    keys: Arc<dyn KeyProvider>,
    fixture_sink: Option<Arc<dyn FixtureSink>>,
}

impl Client {
    pub fn new(keys: impl KeyProvider + 'static) -> Self {
        Self::with_http_client(http::build_client().expect("default TLS backend is always available"), keys)
    }

    pub fn with_http_client(http: reqwest::Client, keys: impl KeyProvider + 'static) -> Self {
        Self { http, keys: Arc::new(keys), fixture_sink: None }
    }

    /// Attach a fixture sink: every stream this client starts afterwards
    /// persists its request/response/chunks/raw bytes through it exactly
    /// once, on clean completion.
    pub fn with_fixture_sink(mut self, sink: impl FixtureSink + 'static) -> Self {
        self.fixture_sink = Some(Arc::new(sink));
        self
    }

    /// Start a streaming completion against a direct OpenAI- or
    /// Anthropic-compatible endpoint. `model` determines which adapter and
    /// base URL are used (see [`provider::resolve`]).
    pub async fn stream(&self, model: &str, context: &Context, options: &RequestOptions) -> Result<LlmStream> {
        options.validate()?;
        context.validate()?;
        match provider::resolve(model)? {
            ProviderKind::OpenAi => self.stream_openai_compatible(model, context, options, OPENAI_BASE_URL, "openai").await,
            ProviderKind::Anthropic => self.stream_anthropic(model, context, options).await,
            ProviderKind::BedrockAnthropic
            | ProviderKind::BedrockLlama
            | ProviderKind::BedrockConverse
            | ProviderKind::BedrockOpenAiOss => {
                Err(LlmError::ProviderUnsupported {
                    model: format!("{model} (use Client::stream_bedrock for Bedrock models)"),
                })
            }
        }
    }

    async fn stream_openai_compatible(
        &self,
        model: &str,
        context: &Context,
        options: &RequestOptions,
        base_url: &str,
        key_name: &str,
    ) -> Result<LlmStream> {
        let adapter = Arc::new(OpenAiAdapter);
        let body = adapter.encode_request(model, context, options);
        let api_key = self.keys.api_key(key_name).await?;

        let response = self
            .http
            .post(format!("{base_url}/chat/completions"))
            .bearer_auth(secrecy::ExposeSecret::expose_secret(&api_key))
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        self.spawn_sse_stream(response, adapter, &body, options).await
    }

    async fn stream_anthropic(&self, model: &str, context: &Context, options: &RequestOptions) -> Result<LlmStream> {
        let adapter = Arc::new(AnthropicAdapter);
        let body = adapter.encode_request(model, context, options);
        let api_key = self.keys.api_key("anthropic").await?;

        let response = self
            .http
            .post(format!("{ANTHROPIC_BASE_URL}/v1/messages"))
            .header("x-api-key", secrecy::ExposeSecret::expose_secret(&api_key))
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        self.spawn_sse_stream(response, adapter, &body, options).await
    }

    fn stream_options(&self, request: &serde_json::Value, options: &RequestOptions) -> StreamOptions {
        let json_mode = matches!(options.response_format, Some(config::ResponseFormat::JsonSchema { .. }));
        StreamOptions {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            json_mode,
            fixture_sink: self.fixture_sink.clone(),
            request_for_fixture: self.fixture_sink.as_ref().map(|_| request.clone()),
        }
    }

    /// Start a streaming completion against Bedrock's
    /// `InvokeModelWithResponseStream` endpoint. The caller is responsible
    /// for building and SigV4-signing `request` (this crate treats request
    /// signing as an external concern, per its scope); `kind` must be one
    /// of the `Bedrock*` variants.
    pub async fn stream_bedrock(&self, request: reqwest::Request, kind: ProviderKind) -> Result<LlmStream> {
        let response = self.http.execute(request).await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::from_api_response(status, body));
        }
        let headers = header_map(response.headers());
        let body = response.bytes_stream().map_err(map_reqwest_stream_error);

        let options = StreamOptions {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            json_mode: false,
            fixture_sink: self.fixture_sink.clone(),
            request_for_fixture: None,
        };

        macro_rules! spawn_bedrock {
            ($adapter:expr) => {{
                let adapter = Arc::new($adapter);
                let handles = coordinator::spawn(
                    adapter,
                    Transport::EventStream(decode::event_stream::EventStreamDecoder::new()),
                    body,
                    status,
                    headers,
                    options,
                );
                Ok(LlmStream::from_coordinator(handles))
            }};
        }

        match kind {
            ProviderKind::BedrockAnthropic => spawn_bedrock!(provider::bedrock::BedrockAnthropicAdapter),
            ProviderKind::BedrockLlama => spawn_bedrock!(provider::bedrock::llama::BedrockLlamaAdapter),
            ProviderKind::BedrockConverse => spawn_bedrock!(provider::bedrock::converse::BedrockConverseAdapter),
            ProviderKind::BedrockOpenAiOss => spawn_bedrock!(provider::bedrock::BedrockOpenAiOssAdapter),
            ProviderKind::OpenAi | ProviderKind::Anthropic => {
                Err(LlmError::ProviderUnsupported { model: "non-bedrock kind passed to stream_bedrock".into() })
            }
        }
    }

    async fn spawn_sse_stream<P>(
        &self,
        response: reqwest::Response,
        adapter: Arc<P>,
        request: &serde_json::Value,
        options: &RequestOptions,
    ) -> Result<LlmStream>
    where
        P: provider::Provider + Send + Sync + 'static,
        P::State: Send + 'static,
    {
        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::from_api_response(status, body));
        }
        let headers = header_map(response.headers());
        let body = response.bytes_stream().map_err(map_reqwest_stream_error);
        let stream_options = self.stream_options(request, options);
        let handles = coordinator::spawn(adapter, Transport::Sse(decode::sse::SseDecoder::new()), body, status, headers, stream_options);
        Ok(LlmStream::from_coordinator(handles))
    }
}

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

fn header_map(headers: &reqwest::header::HeaderMap) -> std::collections::BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
        .collect()
}

fn map_reqwest_error(err: reqwest::Error) -> LlmError {
    if err.is_timeout() {
        LlmError::TransportTimeout(err.to_string())
    } else {
        LlmError::TransportConnection(err.to_string())
    }
}

fn map_reqwest_stream_error(err: reqwest::Error) -> LlmError {
    map_reqwest_error(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_is_constructible() {
        let _client = Client::new(key_provider::StaticKeyProvider::new().with_api_key("openai", "sk-test"));
    }
}
