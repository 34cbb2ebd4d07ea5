//! The public-facing stream type. Wraps the coordinator's raw channel
//! ends into something a caller can use as a lazy chunk iterator, poll
//! metadata from independently of consuming chunks, or collect into a
//! single materialized `Response`.

use futures::Stream;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use tokio::sync::oneshot;

use crate::coordinator::{CancelHandle, CoordinatorHandles};
use crate::error::Result;
use crate::types::{Chunk, ContentPart, Message, Role, StreamMetadata};

/// A live streaming completion. Implements [`Stream`] so it can be consumed
/// with `while let Some(chunk) = stream.next().await` or any `futures`
/// combinator; `metadata()` can be awaited independently (even before the
/// stream is fully drained) to learn the final usage/finish reason as soon
/// as the provider reports them.
pub struct LlmStream {
    receiver: tokio::sync::mpsc::Receiver<Result<Chunk>>,
    metadata: Option<oneshot::Receiver<StreamMetadata>>,
    cancel: CancelHandle,
}

impl LlmStream {
    pub(crate) fn from_coordinator(handles: CoordinatorHandles) -> Self {
        Self { receiver: handles.receiver, metadata: Some(handles.metadata), cancel: handles.cancel }
    }

    /// Pull the next chunk, or `None` once the stream has ended (cleanly or
    /// via a fatal error already delivered as the final `Err` item).
    pub async fn next(&mut self) -> Option<Result<Chunk>> {
        self.receiver.recv().await
    }

    /// Resolve once the stream reaches a terminal state: completion, a
    /// fatal error, or cancellation. Can be awaited concurrently with
    /// draining `next()` — it reads from a side channel, not the chunk
    /// queue — but consumes the metadata handle, so it can only be called
    /// once per stream.
    pub async fn metadata(&mut self) -> StreamMetadata {
        match self.metadata.take() {
            Some(rx) => rx.await.unwrap_or_default(),
            None => StreamMetadata::default(),
        }
    }

    /// Request cancellation. Idempotent; safe to call after the stream has
    /// already finished on its own.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drain every chunk into one materialized `Response`, appending the
    /// reassembled assistant message onto `context`. Text and thinking
    /// chunks are concatenated in arrival order; finalized tool calls
    /// become their own content parts.
    pub async fn collect(mut self, context: crate::types::Context) -> Result<Response> {
        let mut text = String::new();
        let mut thinking = String::new();
        let mut tool_calls = Vec::new();

        while let Some(result) = self.next().await {
            match result? {
                Chunk::Content { text: t } => text.push_str(&t),
                Chunk::Thinking { text: t } => thinking.push_str(&t),
                Chunk::ToolCall { id, name, arguments, partial: false, .. } => {
                    tool_calls.push(crate::types::ToolCall {
                        id: id.clone(),
                        function: crate::types::FunctionCall {
                            name,
                            arguments: arguments.to_string(),
                        },
                    });
                }
                Chunk::ToolCall { .. } | Chunk::Meta { .. } => {}
            }
        }

        let metadata = self.metadata().await;

        let mut content = Vec::new();
        if !thinking.is_empty() {
            content.push(ContentPart::Thinking { text: thinking });
        }
        if !text.is_empty() {
            content.push(ContentPart::Text { text: text.clone() });
        }
        for tc in &tool_calls {
            let arguments = tc.arguments_value().unwrap_or(serde_json::Value::Null);
            content.push(ContentPart::ToolCall { id: tc.id.clone(), name: tc.function.name.clone(), arguments });
        }

        let message = Message {
            role: Role::Assistant,
            content,
            tool_call_id: None,
            tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
            name: None,
            metadata: Default::default(),
        };

        Ok(Response { context: context.with_assistant_message(message), metadata })
    }
}

impl Stream for LlmStream {
    type Item = Result<Chunk>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// A fully materialized completion: the input context with the assistant's
/// reply appended, plus the metadata the stream resolved to.
#[derive(Debug, Clone)]
pub struct Response {
    pub context: crate::types::Context,
    pub metadata: StreamMetadata,
}

impl Response {
    pub fn assistant_message(&self) -> Option<&Message> {
        self.context.messages.last()
    }

    /// Concatenated text content of the assistant message, or `""` if it has
    /// none.
    pub fn text(&self) -> String {
        self.content_parts()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Concatenated thinking content of the assistant message, or `""` if it
    /// has none.
    pub fn thinking(&self) -> String {
        self.content_parts()
            .filter_map(|part| match part {
                ContentPart::Thinking { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// All finalized tool calls, in emission order.
    pub fn tool_calls(&self) -> &[crate::types::ToolCall] {
        self.assistant_message().and_then(|m| m.tool_calls.as_deref()).unwrap_or(&[])
    }

    fn content_parts(&self) -> impl Iterator<Item = &ContentPart> {
        self.assistant_message().map(|m| m.content.iter()).into_iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{spawn, StreamOptions, Transport, DEFAULT_QUEUE_CAPACITY};
    use crate::decode::sse::SseDecoder;
    use crate::provider::openai::OpenAiAdapter;
    use futures::stream as fstream;
    use std::sync::Arc;

    #[tokio::test]
    async fn collect_joins_text_and_appends_assistant_message() {
        let provider = Arc::new(OpenAiAdapter);
        let body = fstream::iter(vec![
            Ok::<_, std::io::Error>(bytes::Bytes::from(
                "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"hi there\"}}]}\n\n",
            )),
            Ok(bytes::Bytes::from(
                "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            )),
        ]);
        let handles = spawn(
            provider,
            Transport::Sse(SseDecoder::new()),
            body,
            200,
            Default::default(),
            StreamOptions::with_queue_capacity(DEFAULT_QUEUE_CAPACITY),
        );
        let stream = LlmStream::from_coordinator(handles);

        let context = crate::types::Context::default();
        let response = stream.collect(context).await.unwrap();
        let message = response.assistant_message().unwrap();
        assert_eq!(message.role, Role::Assistant);
        match &message.content[0] {
            ContentPart::Text { text } => assert_eq!(text, "hi there"),
            other => panic!("unexpected part: {other:?}"),
        }
    }
}
