//! AWS Event-Stream binary frame decoder, used for Bedrock's
//! `InvokeModelWithResponseStream` wire format.
//!
//! Frame layout (all integers big-endian):
//!
//! ```text
//! [ total_len : 4 ][ headers_len : 4 ][ prelude_crc : 4 ]
//! [ headers : headers_len ][ payload : total_len - headers_len - 16 ]
//! [ message_crc : 4 ]
//! ```
//!
//! Unlike SSE, a corrupt frame here can't be resynchronized by scanning for
//! a delimiter — there isn't one. `resync` instead scans forward for a byte
//! offset whose length prefix looks plausible and has enough trailing bytes
//! to actually contain a frame, per spec.md §4.2.2.

use bytes::{Buf, Bytes};
use crc32fast::Hasher;

use crate::error::{EventStreamFault, LlmError, Result};

const PRELUDE_LEN: usize = 8;
const PRELUDE_CRC_LEN: usize = 4;
const MESSAGE_CRC_LEN: usize = 4;
/// Minimum possible frame: prelude + prelude crc + empty headers + empty
/// payload + message crc.
const MIN_FRAME_LEN: u32 = (PRELUDE_LEN + PRELUDE_CRC_LEN + MESSAGE_CRC_LEN) as u32;
const MAX_PLAUSIBLE_FRAME_LEN: u32 = 100_000;

/// One decoded header (`:event-type`, `:message-type`, `:content-type`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventStreamHeader {
    pub name: String,
    pub value: HeaderValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    String(String),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl HeaderValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// A fully decoded, CRC-verified frame.
#[derive(Debug, Clone)]
pub struct EventStreamMessage {
    pub headers: Vec<EventStreamHeader>,
    pub payload: Bytes,
}

impl EventStreamMessage {
    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers.iter().find(|h| h.name == name).map(|h| &h.value)
    }

    pub fn event_type(&self) -> Option<&str> {
        self.header(":event-type").and_then(HeaderValue::as_str)
    }

    pub fn message_type(&self) -> Option<&str> {
        self.header(":message-type").and_then(HeaderValue::as_str)
    }
}

/// Outcome of trying to decode a frame from the front of a buffer.
enum Attempt {
    /// A complete, valid frame was decoded; `consumed` bytes should be
    /// dropped from the buffer.
    Frame { message: EventStreamMessage, consumed: usize },
    /// Not enough bytes yet to tell; caller should wait for more data.
    Incomplete,
    /// The bytes at the front don't form a valid frame per CRC/length
    /// checks. `trusted_skip` is `Some(total_len)` when the prelude CRC
    /// validated (so the length prefix is trustworthy and we can skip the
    /// whole frame directly); `None` means even the prelude is suspect and
    /// a byte-by-byte scan is required.
    Invalid { fault: EventStreamFault, detail: String, trusted_skip: Option<usize> },
}

/// Incremental decoder over a byte stream of concatenated Event-Stream
/// frames. One instance per connection.
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    buffer: Vec<u8>,
    /// Total bytes dropped during resync so far, surfaced for diagnostics.
    pub bytes_skipped: u64,
}

/// Hard cap on the buffer so a runaway length prefix can't grow it forever.
const MAX_BUFFER_BYTES: usize = 16 * 1024 * 1024;

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed newly arrived bytes and return every frame that could be fully
    /// decoded. On a corrupt frame, attempts resync (scanning forward for
    /// the next plausible frame boundary) rather than aborting the whole
    /// stream; if resync exhausts the buffer without finding one, returns
    /// `DecodeEventStream { fault: ResyncFailed, .. }`.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<EventStreamMessage>> {
        self.buffer.extend_from_slice(bytes);
        if self.buffer.len() > MAX_BUFFER_BYTES {
            let size = self.buffer.len();
            self.buffer.clear();
            return Err(LlmError::BufferOverflow { size });
        }

        let mut out = Vec::new();
        loop {
            match self.try_decode_one() {
                Attempt::Frame { message, consumed } => {
                    self.buffer.drain(..consumed);
                    out.push(message);
                }
                Attempt::Incomplete => break,
                Attempt::Invalid { fault, detail, trusted_skip: Some(skip) } => {
                    log::warn!(
                        "event-stream frame invalid ({fault}): {detail}, skipping {skip} trusted bytes"
                    );
                    self.buffer.drain(..skip);
                    self.bytes_skipped += skip as u64;
                }
                Attempt::Invalid { fault, detail, trusted_skip: None } => {
                    log::warn!("event-stream frame invalid ({fault}): {detail}, scanning for resync");
                    match self.resync() {
                        ResyncOutcome::Resynced(skipped) => {
                            self.bytes_skipped += skipped as u64;
                        }
                        ResyncOutcome::KeepWaiting => break,
                        ResyncOutcome::GiveUp => {
                            return Err(LlmError::DecodeEventStream {
                                fault: EventStreamFault::ResyncFailed,
                                detail: format!(
                                    "no plausible frame found in {} buffered bytes after {fault}",
                                    self.buffer.len()
                                ),
                            });
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    fn try_decode_one(&self) -> Attempt {
        let buf = &self.buffer;
        if buf.len() < PRELUDE_LEN + PRELUDE_CRC_LEN {
            return Attempt::Incomplete;
        }

        let total_len = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        let headers_len = u32::from_be_bytes(buf[4..8].try_into().unwrap());
        let prelude_crc = u32::from_be_bytes(buf[8..12].try_into().unwrap());

        if total_len < MIN_FRAME_LEN || total_len > MAX_PLAUSIBLE_FRAME_LEN {
            return Attempt::Invalid {
                fault: EventStreamFault::Length,
                detail: format!("implausible total_len {total_len}"),
                trusted_skip: None,
            };
        }
        if headers_len > total_len - MIN_FRAME_LEN {
            return Attempt::Invalid {
                fault: EventStreamFault::Length,
                detail: format!("headers_len {headers_len} exceeds frame capacity"),
                trusted_skip: None,
            };
        }

        let mut hasher = Hasher::new();
        hasher.update(&buf[0..8]);
        if hasher.finalize() != prelude_crc {
            return Attempt::Invalid {
                fault: EventStreamFault::Crc,
                detail: "prelude checksum mismatch".into(),
                trusted_skip: None,
            };
        }

        let total_len = total_len as usize;
        if buf.len() < total_len {
            return Attempt::Incomplete;
        }

        let message_crc_offset = total_len - MESSAGE_CRC_LEN;
        let expected_message_crc =
            u32::from_be_bytes(buf[message_crc_offset..total_len].try_into().unwrap());
        let mut hasher = Hasher::new();
        hasher.update(&buf[0..message_crc_offset]);
        if hasher.finalize() != expected_message_crc {
            // The prelude CRC already validated, so total_len is trustworthy
            // even though the payload is corrupt: skip exactly this frame.
            return Attempt::Invalid {
                fault: EventStreamFault::Crc,
                detail: "message checksum mismatch".into(),
                trusted_skip: Some(total_len),
            };
        }

        let headers_start = PRELUDE_LEN + PRELUDE_CRC_LEN;
        let headers_end = headers_start + headers_len as usize;
        let headers = match parse_headers(&buf[headers_start..headers_end]) {
            Ok(h) => h,
            Err(detail) => {
                return Attempt::Invalid { fault: EventStreamFault::Length, detail, trusted_skip: Some(total_len) };
            }
        };
        let payload = Bytes::copy_from_slice(&buf[headers_end..message_crc_offset]);

        Attempt::Frame {
            message: EventStreamMessage { headers, payload },
            consumed: total_len,
        }
    }

    /// Scan forward byte-by-byte from offset 1 looking for a position whose
    /// 4-byte big-endian prefix is a plausible `total_len` (within bounds
    /// and with enough trailing buffered bytes to plausibly hold a frame,
    /// per spec.md's resync algorithm).
    fn resync(&mut self) -> ResyncOutcome {
        let buf = &self.buffer;
        if buf.len() <= 4 {
            return ResyncOutcome::KeepWaiting;
        }
        for offset in 1..=buf.len() - 4 {
            let candidate = u32::from_be_bytes(buf[offset..offset + 4].try_into().unwrap());
            if candidate >= MIN_FRAME_LEN
                && candidate <= MAX_PLAUSIBLE_FRAME_LEN
                && (buf.len() - offset) as u64 >= u64::from(candidate)
            {
                self.buffer.drain(..offset);
                return ResyncOutcome::Resynced(offset);
            }
        }
        // Nothing plausible found yet. A real candidate might still be
        // forming near the tail if more bytes are on the way; only give up
        // once we've accumulated enough buffer that waiting longer isn't
        // reasonable (the hard buffer cap in `feed` is the backstop above
        // this).
        if buf.len() > MAX_PLAUSIBLE_FRAME_LEN as usize * 2 {
            ResyncOutcome::GiveUp
        } else {
            ResyncOutcome::KeepWaiting
        }
    }
}

enum ResyncOutcome {
    Resynced(usize),
    KeepWaiting,
    GiveUp,
}

fn parse_headers(mut buf: &[u8]) -> std::result::Result<Vec<EventStreamHeader>, String> {
    let mut headers = Vec::new();
    while buf.has_remaining() {
        if buf.remaining() < 2 {
            return Err("truncated header name length".into());
        }
        let name_len = buf.get_u8() as usize;
        if buf.remaining() < name_len + 1 {
            return Err("truncated header name".into());
        }
        let name = String::from_utf8(buf[..name_len].to_vec())
            .map_err(|e| format!("header name not utf-8: {e}"))?;
        buf.advance(name_len);

        let value_type = buf.get_u8();
        let value = match value_type {
            0 | 1 => HeaderValue::Bool(value_type == 1),
            7 => {
                if buf.remaining() < 2 {
                    return Err("truncated string header length".into());
                }
                let value_len = buf.get_u16() as usize;
                if buf.remaining() < value_len {
                    return Err("truncated string header value".into());
                }
                let value = String::from_utf8(buf[..value_len].to_vec())
                    .map_err(|e| format!("header value not utf-8: {e}"))?;
                buf.advance(value_len);
                HeaderValue::String(value)
            }
            6 => {
                if buf.remaining() < 2 {
                    return Err("truncated byte-array header length".into());
                }
                let value_len = buf.get_u16() as usize;
                if buf.remaining() < value_len {
                    return Err("truncated byte-array header value".into());
                }
                let value = buf[..value_len].to_vec();
                buf.advance(value_len);
                HeaderValue::Bytes(value)
            }
            other => return Err(format!("unsupported header value type {other}")),
        };

        headers.push(EventStreamHeader { name, value });
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_frame(headers: &[(&str, &str)], payload: &[u8]) -> Vec<u8> {
        let mut header_bytes = Vec::new();
        for (name, value) in headers {
            header_bytes.push(name.len() as u8);
            header_bytes.extend_from_slice(name.as_bytes());
            header_bytes.push(7u8); // string type
            header_bytes.extend_from_slice(&(value.len() as u16).to_be_bytes());
            header_bytes.extend_from_slice(value.as_bytes());
        }

        let total_len = (PRELUDE_LEN + PRELUDE_CRC_LEN + header_bytes.len() + payload.len()
            + MESSAGE_CRC_LEN) as u32;
        let headers_len = header_bytes.len() as u32;

        let mut prelude = Vec::new();
        prelude.extend_from_slice(&total_len.to_be_bytes());
        prelude.extend_from_slice(&headers_len.to_be_bytes());

        let mut hasher = Hasher::new();
        hasher.update(&prelude);
        let prelude_crc = hasher.finalize();

        let mut frame = Vec::new();
        frame.extend_from_slice(&prelude);
        frame.extend_from_slice(&prelude_crc.to_be_bytes());
        frame.extend_from_slice(&header_bytes);
        frame.extend_from_slice(payload);

        let mut hasher = Hasher::new();
        hasher.update(&frame);
        let message_crc = hasher.finalize();
        frame.extend_from_slice(&message_crc.to_be_bytes());
        frame
    }

    #[test]
    fn decodes_single_well_formed_frame() {
        let frame = encode_frame(&[(":event-type", "contentBlockDelta")], b"{\"x\":1}");
        let mut dec = EventStreamDecoder::new();
        let messages = dec.feed(&frame).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].event_type(), Some("contentBlockDelta"));
        assert_eq!(&messages[0].payload[..], b"{\"x\":1}");
    }

    #[test]
    fn incomplete_frame_waits_for_more_bytes() {
        let frame = encode_frame(&[(":event-type", "messageStop")], b"{}");
        let mut dec = EventStreamDecoder::new();
        let messages = dec.feed(&frame[..frame.len() - 5]).unwrap();
        assert!(messages.is_empty());
        let messages = dec.feed(&frame[frame.len() - 5..]).unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn two_frames_back_to_back() {
        let mut combined = encode_frame(&[(":event-type", "a")], b"1");
        combined.extend(encode_frame(&[(":event-type", "b")], b"2"));
        let mut dec = EventStreamDecoder::new();
        let messages = dec.feed(&combined).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].event_type(), Some("a"));
        assert_eq!(messages[1].event_type(), Some("b"));
    }

    #[test]
    fn bad_prelude_crc_triggers_resync() {
        let good = encode_frame(&[(":event-type", "a")], b"1");
        let mut corrupt_then_good = vec![0xFFu8; 20];
        corrupt_then_good.extend_from_slice(&good);
        let mut dec = EventStreamDecoder::new();
        let messages = dec.feed(&corrupt_then_good).unwrap();
        assert_eq!(messages.len(), 1);
        assert!(dec.bytes_skipped > 0);
    }

    #[test]
    fn message_crc_mismatch_is_detected() {
        let mut frame = encode_frame(&[(":event-type", "a")], b"1");
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        let mut dec = EventStreamDecoder::new();
        // With no valid frame anywhere and a short buffer, this should
        // report incomplete (waiting for more bytes) rather than erroring,
        // since resync can't yet rule out a longer genuine frame.
        let result = dec.feed(&frame);
        assert!(result.is_ok());
        assert!(result.unwrap().is_empty());
    }
}
