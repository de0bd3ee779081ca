//! Chunk-boundary independent framing of `data: ` lines.
//!
//! Upstream responses arrive as arbitrary byte chunks. A chunk may end in the
//! middle of a line, in the middle of the `data: ` prefix, or even in the middle
//! of a multi-byte UTF-8 sequence. The reframer keeps the incomplete tail in a
//! buffer across calls, so the lines it emits depend only on the concatenated
//! byte stream.

use std::borrow::Cow;

/// Prefix of a recognized frame line.
pub const DATA_PREFIX: &str = "data: ";

/// Incremental line splitter for an upstream SSE body.
///
/// Only lines that begin with [`DATA_PREFIX`] and are not blank are emitted;
/// keep-alive comments, `event:` lines and anything malformed are dropped.
#[derive(Debug, Default)]
pub struct StreamReframer {
    /// Decoded text after the last newline seen so far.
    buffer: String,
    /// Bytes of an incomplete UTF-8 sequence at the end of the last chunk.
    partial: Vec<u8>,
}

impl StreamReframer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every complete, accepted line it finished.
    ///
    /// The text after the last newline is retained for the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.decode_into_buffer(chunk);

        let Some(last_newline) = self.buffer.rfind('\n') else {
            return Vec::new();
        };

        let complete: String = self.buffer.drain(..=last_newline).collect();
        complete.split('\n').filter_map(accept).collect()
    }

    pub fn feed_str(&mut self, chunk: &str) -> Vec<String> {
        self.feed(chunk.as_bytes())
    }

    /// End of stream: emit the unterminated trailing line if it is a frame.
    ///
    /// The buffer is cleared, so a second call returns nothing.
    pub fn flush(&mut self) -> Vec<String> {
        if !self.partial.is_empty() {
            let tail = std::mem::take(&mut self.partial);
            self.buffer.push_str(&String::from_utf8_lossy(&tail));
        }

        let rest = std::mem::take(&mut self.buffer);
        accept(&rest).into_iter().collect()
    }

    /// Text buffered after the last newline.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    fn decode_into_buffer(&mut self, chunk: &[u8]) {
        let bytes: Cow<'_, [u8]> = if self.partial.is_empty() {
            Cow::Borrowed(chunk)
        } else {
            let mut joined = std::mem::take(&mut self.partial);
            joined.extend_from_slice(chunk);
            Cow::Owned(joined)
        };

        let mut rest: &[u8] = &bytes;
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    return;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    if let Ok(text) = std::str::from_utf8(valid) {
                        self.buffer.push_str(text);
                    }
                    match err.error_len() {
                        // Sequence cut by the chunk boundary; wait for the rest.
                        None => {
                            self.partial.extend_from_slice(after);
                            return;
                        }
                        Some(len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                    }
                }
            }
        }
    }
}

/// Return the JSON payload of an accepted line.
pub fn frame_payload(line: &str) -> Option<&str> {
    line.strip_prefix(DATA_PREFIX).map(str::trim)
}

fn accept(line: &str) -> Option<String> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.trim().is_empty() || !line.starts_with(DATA_PREFIX) {
        return None;
    }
    Some(line.to_string())
}
