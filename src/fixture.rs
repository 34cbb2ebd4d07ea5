//! The fixture-sink hook.
//!
//! spec.md §1 treats "fixture-based test recording/replay" as an external
//! collaborator, not a first-class feature of this crate — but §4.5 and §6
//! require the coordinator itself to expose the *hook point* an external
//! recorder attaches to, with an at-most-once persistence guarantee. This
//! module is that hook: a trait a caller implements (writing to a directory
//! of JSON files, a test fixture store, whatever), plus the record shape
//! the coordinator hands it once per stream.
//!
//! This crate ships no concrete implementation beyond what `tests/` uses to
//! exercise the guarantee — the actual fixture format and storage are the
//! caller's concern.

use serde_json::Value;

use crate::error::Result;
use crate::types::Chunk;

/// Everything persisted for one completed stream. Mirrors spec.md §6's
/// `{request, response, canonical_json, raw_stream_bytes}` shape.
#[derive(Debug, Clone)]
pub struct FixtureRecord {
    pub request: Value,
    pub response_status: u16,
    pub canonical_chunks: Vec<Chunk>,
    pub raw_stream_bytes: Vec<u8>,
}

/// Attached to a stream to record it for later replay. The coordinator
/// guarantees `persist` is called at most once per stream, after the
/// transport reaches end-of-stream (never on a fatal mid-stream error).
pub trait FixtureSink: Send + Sync {
    fn persist(&self, record: FixtureRecord) -> Result<()>;
}
