//! Line-oriented Server-Sent Events decoder.
//!
//! Providers that speak SSE (OpenAI, Anthropic direct) deliver chunks of
//! bytes that may split a line, a field, or even a UTF-8 code point in half.
//! `SseDecoder::feed` absorbs whatever arrives and returns only the events
//! that are now complete, carrying the remainder forward internally. Feeding
//! the same overall byte stream through any chunking produces the same
//! sequence of events — that boundary-independence is the core invariant
//! this type exists to guarantee.

use crate::error::{LlmError, Result};

/// A fully parsed SSE event. Multiple `data:` lines within one event are
/// joined with `\n`, per the SSE spec.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
    pub retry: Option<String>,
}

impl SseEvent {
    /// The `[DONE]` sentinel OpenAI-compatible servers send as a plain
    /// `data: [DONE]` event instead of closing the connection.
    pub fn is_done_sentinel(&self) -> bool {
        self.event.is_none() && self.data.trim() == "[DONE]"
    }
}

/// Hard cap on a single buffered (incomplete) line, guarding against a
/// provider that never sends a newline. Exceeding it is a fatal decode
/// error, not a silently truncated event.
const MAX_LINE_BYTES: usize = 8 * 1024 * 1024;

/// Incremental decoder. One instance per stream; not reusable across
/// streams.
#[derive(Debug, Default)]
pub struct SseDecoder {
    carry: Vec<u8>,
    event: PendingEvent,
}

#[derive(Debug, Default)]
struct PendingEvent {
    event: Option<String>,
    data_lines: Vec<String>,
    id: Option<String>,
    retry: Option<String>,
    saw_any_field: bool,
}

impl PendingEvent {
    fn take_if_nonempty(&mut self) -> Option<SseEvent> {
        if !self.saw_any_field {
            return None;
        }
        let event = std::mem::take(self);
        Some(SseEvent {
            event: event.event,
            data: event.data_lines.join("\n"),
            id: event.id,
            retry: event.retry,
        })
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed newly-arrived bytes in. Returns every event completed by this
    /// call, in order. Bytes that don't yet form a complete line are
    /// retained internally and combined with the next call's input.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<SseEvent>> {
        self.carry.extend_from_slice(bytes);
        if self.carry.len() > MAX_LINE_BYTES {
            let size = self.carry.len();
            self.carry.clear();
            return Err(LlmError::DecodeSse(format!(
                "line exceeded {MAX_LINE_BYTES} bytes without a terminator (got {size})"
            )));
        }

        let mut events = Vec::new();
        let mut start = 0;
        while let Some(rel_nl) = find_newline(&self.carry[start..]) {
            let mut end = start + rel_nl;
            let line_end = end;
            // Trim a trailing \r so "\r\n" and "\n" behave identically.
            if end > start && self.carry[end - 1] == b'\r' {
                end -= 1;
            }
            let line = &self.carry[start..end];
            self.process_line(line, &mut events)?;
            start = line_end + 1;
        }

        // Retain only the unconsumed, possibly-incomplete tail. We must
        // preserve UTF-8 boundaries here: the tail may end mid-codepoint if
        // the transport fragmented a multi-byte character across two feeds.
        // Since we only split on ASCII '\n'/'\r', and never interpret the
        // tail as text until a full line is found, holding it as raw bytes
        // is always safe regardless of where the split landed.
        self.carry.drain(..start);
        Ok(events)
    }

    fn process_line(&mut self, line: &[u8], events: &mut Vec<SseEvent>) -> Result<()> {
        if line.is_empty() {
            if let Some(event) = self.event.take_if_nonempty() {
                events.push(event);
            }
            return Ok(());
        }

        let line = std::str::from_utf8(line)
            .map_err(|e| LlmError::DecodeSse(format!("invalid utf-8 in line: {e}")))?;

        if line.starts_with(':') {
            // Comment line, ignored per spec (often used as a keep-alive).
            return Ok(());
        }

        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };

        self.event.saw_any_field = true;
        match field {
            "event" => self.event.event = Some(value.to_string()),
            "data" => self.event.data_lines.push(value.to_string()),
            "id" => self.event.id = Some(value.to_string()),
            "retry" => self.event.retry = Some(value.to_string()),
            _ => {}
        }
        Ok(())
    }

    /// Flush any trailing event that never received a closing blank line.
    /// Some servers close the connection immediately after their last
    /// `data:` line instead of sending one; without this, that final chunk
    /// would be silently dropped.
    pub fn flush(&mut self) -> Vec<SseEvent> {
        self.event.take_if_nonempty().into_iter().collect()
    }
}

fn find_newline(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_single_event_in_one_feed() {
        let mut dec = SseDecoder::new();
        let events = dec.feed(b"event: message\ndata: hello\n\n").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("message"));
        assert_eq!(events[0].data, "hello");
    }

    #[test]
    fn joins_multiple_data_lines() {
        let mut dec = SseDecoder::new();
        let events = dec.feed(b"data: line one\ndata: line two\n\n").unwrap();
        assert_eq!(events[0].data, "line one\nline two");
    }

    #[test]
    fn boundary_independence_byte_by_byte() {
        let whole = b"event: a\ndata: {\"x\":1}\n\ndata: second\n\n".to_vec();

        let mut one_shot = SseDecoder::new();
        let expected = one_shot.feed(&whole).unwrap();

        let mut incremental = SseDecoder::new();
        let mut got = Vec::new();
        for byte in &whole {
            got.extend(incremental.feed(&[*byte]).unwrap());
        }
        assert_eq!(got, expected);
    }

    #[test]
    fn handles_crlf_terminators() {
        let mut dec = SseDecoder::new();
        let events = dec.feed(b"data: hi\r\n\r\n").unwrap();
        assert_eq!(events[0].data, "hi");
    }

    #[test]
    fn splits_multibyte_utf8_across_feeds() {
        let mut dec = SseDecoder::new();
        let payload = "data: caf\u{00e9}\n\n".as_bytes().to_vec();
        let mid = payload.len() - 3; // split inside the 2-byte 'é' encoding
        let mut events = dec.feed(&payload[..mid]).unwrap();
        assert!(events.is_empty());
        events = dec.feed(&payload[mid..]).unwrap();
        assert_eq!(events[0].data, "caf\u{00e9}");
    }

    #[test]
    fn ignores_comment_lines() {
        let mut dec = SseDecoder::new();
        let events = dec.feed(b": keep-alive\ndata: x\n\n").unwrap();
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn recognizes_done_sentinel() {
        let mut dec = SseDecoder::new();
        let events = dec.feed(b"data: [DONE]\n\n").unwrap();
        assert!(events[0].is_done_sentinel());
    }

    #[test]
    fn flush_recovers_unterminated_trailing_event() {
        let mut dec = SseDecoder::new();
        let events = dec.feed(b"data: partial").unwrap();
        assert!(events.is_empty());
        let flushed = dec.flush();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].data, "partial");
    }

    #[test]
    fn overlong_line_without_terminator_errors() {
        let mut dec = SseDecoder::new();
        let huge = vec![b'a'; MAX_LINE_BYTES + 1];
        assert!(dec.feed(&huge).is_err());
    }
}
