//! Stateful `<think>...</think>` tag splitter.
//!
//! Some OpenAI-compatible providers (notably Groq's reasoning models) don't
//! send a separate "thinking" delta channel; instead the reasoning text is
//! inlined in the regular content stream, wrapped in `<think>`/`</think>`
//! tags. This splitter turns that single text channel back into the
//! canonical `Content`/`Thinking` split, the same shape every other adapter
//! produces natively.
//!
//! The open tag is 7 bytes (`<think>`), the close tag 8 (`</think>`). A
//! provider may flush its content one token at a time, so either tag can
//! arrive split across multiple fragments — the splitter must never emit a
//! prefix of a tag as ordinary content only to discover the rest of the tag
//! in the next fragment. To guarantee that, it holds back the longest
//! suffix of the buffered text that could still be the start of either tag
//! (up to 7 bytes, one short of the 8-byte close tag) until enough new text
//! arrives to either complete or rule out a tag there.

const OPEN_TAG: &str = "<think>";
const CLOSE_TAG: &str = "</think>";
/// One less than the longest tag (`</think>`), i.e. the longest possible
/// incomplete-tag suffix we might be holding.
const MAX_HOLDBACK: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Content,
    Thinking,
}

/// One piece of normalized output from the splitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece {
    Content(String),
    Thinking(String),
}

/// Splits a stream of raw text fragments on `<think>`/`</think>` boundaries.
#[derive(Debug)]
pub struct ThinkTagSplitter {
    mode: Mode,
    buffer: String,
}

impl Default for ThinkTagSplitter {
    fn default() -> Self {
        Self { mode: Mode::Content, buffer: String::new() }
    }
}

impl ThinkTagSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a fragment of raw content text. Returns the pieces that are now
    /// safe to emit; anything that might still be an in-progress tag stays
    /// buffered for the next call (or `flush`).
    pub fn push(&mut self, text: &str) -> Vec<Piece> {
        self.buffer.push_str(text);
        let mut out = Vec::new();
        loop {
            match self.mode {
                Mode::Content => {
                    if let Some(idx) = self.buffer.find(OPEN_TAG) {
                        let before = self.buffer[..idx].to_string();
                        if !before.is_empty() {
                            out.push(Piece::Content(before));
                        }
                        self.buffer.drain(..idx + OPEN_TAG.len());
                        self.mode = Mode::Thinking;
                        continue;
                    }
                }
                Mode::Thinking => {
                    if let Some(idx) = self.buffer.find(CLOSE_TAG) {
                        let before = self.buffer[..idx].to_string();
                        if !before.is_empty() {
                            out.push(Piece::Thinking(before));
                        }
                        self.buffer.drain(..idx + CLOSE_TAG.len());
                        self.mode = Mode::Content;
                        continue;
                    }
                }
            }
            break;
        }

        // No (more) complete tags in the buffer. Flush everything except a
        // trailing holdback window, since the tail might be the start of a
        // tag that completes on the next fragment.
        let safe_len = self.buffer.len().saturating_sub(MAX_HOLDBACK);
        let safe_len = floor_char_boundary(&self.buffer, safe_len);
        if safe_len > 0 {
            let flushed: String = self.buffer.drain(..safe_len).collect();
            match self.mode {
                Mode::Content => out.push(Piece::Content(flushed)),
                Mode::Thinking => out.push(Piece::Thinking(flushed)),
            }
        }
        out
    }

    /// Flush whatever remains at stream end, holdback included — there's no
    /// more text coming that could complete a tag.
    pub fn flush(&mut self) -> Vec<Piece> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        let remaining = std::mem::take(&mut self.buffer);
        match self.mode {
            Mode::Content => vec![Piece::Content(remaining)],
            Mode::Thinking => vec![Piece::Thinking(remaining)],
        }
    }
}

/// Largest byte index `<= len` that lies on a UTF-8 char boundary.
fn floor_char_boundary(s: &str, len: usize) -> usize {
    let mut idx = len.min(s.len());
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_content_passes_through() {
        let mut s = ThinkTagSplitter::new();
        let mut pieces = s.push("hello world");
        pieces.extend(s.flush());
        assert_eq!(pieces, vec![Piece::Content("hello world".to_string())]);
    }

    #[test]
    fn splits_single_fragment_with_full_tag() {
        let mut s = ThinkTagSplitter::new();
        let mut pieces = s.push("before <think>reasoning</think> after");
        pieces.extend(s.flush());
        assert_eq!(
            pieces,
            vec![
                Piece::Content("before ".to_string()),
                Piece::Thinking("reasoning".to_string()),
                Piece::Content(" after".to_string()),
            ]
        );
    }

    #[test]
    fn open_tag_split_across_fragments() {
        let mut s = ThinkTagSplitter::new();
        let mut pieces = s.push("hi <thi");
        pieces.extend(s.push("nk>reasoning</think>bye"));
        pieces.extend(s.flush());
        assert_eq!(
            pieces,
            vec![
                Piece::Content("hi ".to_string()),
                Piece::Thinking("reasoning".to_string()),
                Piece::Content("bye".to_string()),
            ]
        );
    }

    #[test]
    fn close_tag_split_one_byte_at_a_time() {
        let mut s = ThinkTagSplitter::new();
        let mut pieces = Vec::new();
        for ch in "<think>abc</think>def".chars() {
            pieces.extend(s.push(&ch.to_string()));
        }
        pieces.extend(s.flush());
        // Reassemble to confirm no bytes were lost or reordered across the
        // byte-at-a-time feed, regardless of how many pieces it took.
        let mut content = String::new();
        let mut thinking = String::new();
        for p in pieces {
            match p {
                Piece::Content(c) => content.push_str(&c),
                Piece::Thinking(t) => thinking.push_str(&t),
            }
        }
        assert_eq!(content, "def");
        assert_eq!(thinking, "abc");
    }

    #[test]
    fn never_emits_a_tag_prefix_as_content() {
        let mut s = ThinkTagSplitter::new();
        let pieces = s.push("hello <think");
        for p in pieces {
            if let Piece::Content(c) = p {
                assert!(!c.ends_with('<'));
            }
        }
    }

    #[test]
    fn holdback_respects_utf8_boundaries() {
        let mut s = ThinkTagSplitter::new();
        // Multi-byte chars near the holdback window shouldn't panic.
        let mut pieces = s.push("emoji 😀😀😀😀 trailing");
        pieces.extend(s.flush());
        let total: String = pieces
            .into_iter()
            .map(|p| match p {
                Piece::Content(c) | Piece::Thinking(c) => c,
            })
            .collect();
        assert_eq!(total, "emoji 😀😀😀😀 trailing");
    }
}
