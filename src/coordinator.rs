//! The stream coordinator: a single task that owns the HTTP response body,
//! the wire decoder, and the provider's decode state, and turns all three
//! into a consumer-facing channel of canonical chunks.
//!
//! Backpressure comes for free from a bounded `tokio::mpsc` channel: once
//! the consumer falls behind and the channel fills, `Sender::send` on this
//! task simply awaits, which in turn stops polling the HTTP body, which
//! lets TCP-level flow control push back on the server. Cancellation is a
//! cooperative, idempotent flag checked alongside every socket read.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Notify};

use crate::decode::decode_event_stream_payload;
use crate::decode::event_stream::EventStreamDecoder;
use crate::decode::sse::SseDecoder;
use crate::error::{LlmError, Result};
use crate::fixture::{FixtureRecord, FixtureSink};
use crate::provider::Provider;
use crate::types::{Chunk, StreamMetadata};

/// Which wire framing the transport uses. Chosen once per stream based on
/// `provider::resolve`.
pub enum Transport {
    Sse(SseDecoder),
    EventStream(EventStreamDecoder),
}

impl Transport {
    fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Value>> {
        match self {
            Transport::Sse(dec) => {
                let events = dec.feed(bytes)?;
                events
                    .into_iter()
                    .filter(|e| !e.is_done_sentinel())
                    .map(|e| {
                        serde_json::from_str::<Value>(&e.data)
                            .map_err(|err| LlmError::DecodeSse(format!("event data is not JSON: {err}")))
                    })
                    .collect()
            }
            Transport::EventStream(dec) => {
                let messages = dec.feed(bytes)?;
                messages.iter().map(decode_event_stream_payload).collect()
            }
        }
    }

    fn flush_trailing(&mut self) -> Result<Vec<Value>> {
        match self {
            Transport::Sse(dec) => dec
                .flush()
                .into_iter()
                .filter(|e| !e.is_done_sentinel())
                .map(|e| {
                    serde_json::from_str::<Value>(&e.data)
                        .map_err(|err| LlmError::DecodeSse(format!("event data is not JSON: {err}")))
                })
                .collect(),
            Transport::EventStream(_) => Ok(Vec::new()),
        }
    }
}

/// Shared, idempotent cancellation signal. Cloning shares the same
/// underlying flag; calling `cancel` more than once is a no-op after the
/// first call.
#[derive(Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelHandle {
    fn new() -> Self {
        Self { cancelled: Arc::new(AtomicBool::new(false)), notify: Arc::new(Notify::new()) }
    }

    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

/// Handles returned to the caller constructing a stream: the chunk
/// receiver, the metadata future, and the cancel signal. `handle.rs` wraps
/// these into the public, ergonomic `LlmStream` type.
pub struct CoordinatorHandles {
    pub receiver: mpsc::Receiver<Result<Chunk>>,
    pub metadata: oneshot::Receiver<StreamMetadata>,
    pub cancel: CancelHandle,
}

/// Default bound on the output channel — the high watermark a slow
/// consumer can fall behind by before the producer task stops reading off
/// the socket.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Per-stream options orthogonal to the provider/transport: the output
/// queue depth, whether to run the JSON-object-streaming assembly pass
/// (spec.md §4.6), and an optional fixture recorder (spec.md §4.5/§6).
/// Bundled into one struct rather than a growing `spawn` parameter list.
#[derive(Default)]
pub struct StreamOptions {
    pub queue_capacity: usize,
    pub json_mode: bool,
    pub fixture_sink: Option<Arc<dyn FixtureSink>>,
    pub request_for_fixture: Option<serde_json::Value>,
}

impl StreamOptions {
    pub fn with_queue_capacity(queue_capacity: usize) -> Self {
        Self { queue_capacity, ..Default::default() }
    }
}

/// Spawn the coordinator task for one stream. `status`/`headers` seed the
/// metadata that's available immediately, before any body bytes arrive.
pub fn spawn<P, B, E>(
    provider: Arc<P>,
    mut transport: Transport,
    mut body: B,
    status: u16,
    headers: std::collections::BTreeMap<String, String>,
    options: StreamOptions,
) -> CoordinatorHandles
where
    P: Provider + Send + Sync + 'static,
    P::State: Send + 'static,
    B: futures::Stream<Item = std::result::Result<bytes::Bytes, E>> + Send + Unpin + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let (tx, rx) = mpsc::channel(options.queue_capacity.max(1));
    let (meta_tx, meta_rx) = oneshot::channel();
    let cancel = CancelHandle::new();
    let task_cancel = cancel.clone();

    tokio::spawn(async move {
        let mut metadata = StreamMetadata { status: Some(status), headers, ..Default::default() };
        let mut state = provider.init_state();
        let mut recorder = Recorder::new(&options);

        let outcome =
            run_body(&provider, &mut transport, &mut body, &mut state, &tx, &mut metadata, &task_cancel, &mut recorder)
                .await;

        match outcome {
            Ok(()) => recorder.persist(status, &options),
            Err(err) => {
                log::error!("stream coordinator ending with error: {err}");
                let _ = tx.send(Err(err)).await;
            }
        }

        // `meta_tx.send` fails only if every handle was dropped; nothing to
        // do about it, the stream is unobserved anyway.
        let _ = meta_tx.send(metadata);
    });

    CoordinatorHandles { receiver: rx, metadata: meta_rx, cancel }
}

/// Bookkeeping for the two optional end-of-stream passes: JSON-object
/// assembly and fixture recording. Kept separate from the main loop so
/// neither feature costs anything when unused (empty buffers, no-op
/// persist).
struct Recorder {
    json_mode: bool,
    json_buffer: String,
    json_emitted: bool,
    raw_bytes: Vec<u8>,
    chunks: Vec<Chunk>,
    recording: bool,
}

impl Recorder {
    fn new(options: &StreamOptions) -> Self {
        Self {
            json_mode: options.json_mode,
            json_buffer: String::new(),
            json_emitted: false,
            raw_bytes: Vec::new(),
            chunks: Vec::new(),
            recording: options.fixture_sink.is_some(),
        }
    }

    fn observe_bytes(&mut self, bytes: &[u8]) {
        if self.recording {
            self.raw_bytes.extend_from_slice(bytes);
        }
    }

    fn observe_chunk(&mut self, chunk: &Chunk) {
        if self.json_mode {
            if let Chunk::Content { text } = chunk {
                self.json_buffer.push_str(text);
            }
        }
        if self.recording {
            self.chunks.push(chunk.clone());
        }
    }

    /// If JSON-object mode is on and the accumulated content parses as a
    /// JSON value, the synthetic `structured_output` tool call chunk to
    /// emit immediately before the terminal chunk. `None` on a parse
    /// failure or if already emitted (only ever fires once per stream).
    fn take_structured_output_chunk(&mut self) -> Option<Chunk> {
        if !self.json_mode || self.json_emitted {
            return None;
        }
        self.json_emitted = true;
        let parsed = serde_json::from_str::<serde_json::Value>(&self.json_buffer).ok()?;
        Some(Chunk::ToolCall {
            id: format!("structured_{}", uuid::Uuid::new_v4()),
            name: "structured_output".to_string(),
            arguments: parsed,
            partial: false,
            error: None,
        })
    }

    fn persist(&self, status: u16, options: &StreamOptions) {
        let Some(sink) = &options.fixture_sink else { return };
        let record = FixtureRecord {
            request: options.request_for_fixture.clone().unwrap_or(serde_json::Value::Null),
            response_status: status,
            canonical_chunks: self.chunks.clone(),
            raw_stream_bytes: self.raw_bytes.clone(),
        };
        if let Err(err) = sink.persist(record) {
            log::error!("fixture sink failed: {err}");
        }
    }
}

async fn run_body<P, B, E>(
    provider: &Arc<P>,
    transport: &mut Transport,
    body: &mut B,
    state: &mut P::State,
    tx: &mpsc::Sender<Result<Chunk>>,
    metadata: &mut StreamMetadata,
    cancel: &CancelHandle,
    recorder: &mut Recorder,
) -> Result<()>
where
    P: Provider + Send + Sync + 'static,
    P::State: Send + 'static,
    B: futures::Stream<Item = std::result::Result<bytes::Bytes, E>> + Send + Unpin + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let mut saw_terminal = false;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            item = body.next() => item,
        };

        let Some(item) = next else { break };
        let bytes = item.map_err(|e| LlmError::TransportConnection(e.to_string()))?;
        recorder.observe_bytes(&bytes);

        let events = transport.feed(&bytes)?;
        for event in events {
            let Some(chunks) = decode_one_event(provider, &event, state)? else { continue };
            for chunk in chunks {
                saw_terminal |= chunk.is_terminal();
                if !emit(tx, metadata, recorder, chunk).await {
                    // Consumer dropped the handle; stop pulling bytes.
                    return Ok(());
                }
            }
        }
    }

    for event in transport.flush_trailing()? {
        let Some(chunks) = decode_one_event(provider, &event, state)? else { continue };
        for chunk in chunks {
            saw_terminal |= chunk.is_terminal();
            if !emit(tx, metadata, recorder, chunk).await {
                return Ok(());
            }
        }
    }

    for chunk in provider.flush(state) {
        saw_terminal |= chunk.is_terminal();
        if !emit(tx, metadata, recorder, chunk).await {
            return Ok(());
        }
    }

    // The body ended without the provider ever emitting a terminal `Meta`
    // (truncated connection, an omitted terminal event, or a terminal event
    // that was itself dropped as a non-fatal decode error). Consumers rely
    // on exactly one `Meta{terminal=true}` being the last chunk they see, so
    // synthesize it here rather than leaving the stream's end ambiguous.
    if !saw_terminal {
        let _ = emit(tx, metadata, recorder, Chunk::terminal()).await;
    }

    Ok(())
}

/// Send one provider-produced chunk to the consumer, first threading it
/// through the JSON-object-assembly and fixture-recording passes. If the
/// chunk is terminal and JSON-object streaming is on, the synthetic
/// `structured_output` tool call (spec.md §4.6) is emitted immediately
/// before it. Returns `false` once the consumer has dropped the handle, at
/// which point the caller should stop producing further chunks.
async fn emit(tx: &mpsc::Sender<Result<Chunk>>, metadata: &mut StreamMetadata, recorder: &mut Recorder, chunk: Chunk) -> bool {
    if chunk.is_terminal() {
        if let Some(structured) = recorder.take_structured_output_chunk() {
            recorder.observe_chunk(&structured);
            apply_to_metadata(metadata, &structured);
            if tx.send(Ok(structured)).await.is_err() {
                return false;
            }
        }
    }
    recorder.observe_chunk(&chunk);
    apply_to_metadata(metadata, &chunk);
    tx.send(Ok(chunk)).await.is_ok()
}

/// Decode one event, treating `decode.payload` failures (a valid frame with
/// a malformed inner payload) as recoverable: log and drop the event rather
/// than aborting the whole stream, per `LlmError::is_stream_fatal`.
fn decode_one_event<P: Provider>(provider: &Arc<P>, event: &Value, state: &mut P::State) -> Result<Option<Vec<Chunk>>> {
    match provider.decode_event(event, state) {
        Ok(chunks) => Ok(Some(chunks)),
        Err(err) if !err.is_stream_fatal() => {
            log::warn!("dropping event after non-fatal decode error: {err}");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

fn apply_to_metadata(metadata: &mut StreamMetadata, chunk: &Chunk) {
    if let Chunk::Meta { fields } = chunk {
        if let Some(usage) = fields.usage {
            match &mut metadata.usage {
                Some(existing) => existing.merge(usage),
                None => metadata.usage = Some(usage),
            }
        }
        if let Some(reason) = fields.finish_reason {
            metadata.finish_reason = Some(reason);
        }
    }
}
