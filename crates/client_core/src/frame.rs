//! Reassembles blank-line delimited frames from a chunked response body.

use std::fmt;

use encoding_rs::{CoderResult, Decoder, UTF_8};

/// Separator between two frames of the event stream.
pub const FRAME_DELIMITER: &str = "\n\n";

/// Incremental frame splitter. Feed it body chunks in arrival order; it keeps
/// whatever does not yet form a complete frame for the next call.
pub struct FrameDecoder {
    buffer: String,
    // Keeps a UTF-8 sequence split across chunks until its remaining bytes arrive.
    utf8: Decoder,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FrameDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameDecoder")
            .field("buffer", &self.buffer)
            .finish_non_exhaustive()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            utf8: UTF_8.new_decoder_without_bom_handling(),
        }
    }

    /// Appends `chunk` and returns every frame completed by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.decode_text(chunk, false);

        let mut frames = Vec::new();
        let mut consumed = 0;
        while let Some(offset) = self.buffer[consumed..].find(FRAME_DELIMITER) {
            let end = consumed + offset;
            frames.push(self.buffer[consumed..end].to_string());
            consumed = end + FRAME_DELIMITER.len();
        }
        if consumed > 0 {
            self.buffer.drain(..consumed);
        }
        frames
    }

    /// Text received so far that does not yet form a complete frame.
    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    /// Ends the stream. An incomplete trailing frame is dropped; it is handed
    /// back only so the caller can log it.
    pub fn finish(mut self) -> Option<String> {
        self.decode_text(&[], true);
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.buffer)
        }
    }

    // Malformed bytes become U+FFFD.
    fn decode_text(&mut self, chunk: &[u8], last: bool) {
        let mut input = chunk;
        loop {
            let needed = self
                .utf8
                .max_utf8_buffer_length(input.len())
                .unwrap_or(input.len());
            self.buffer.reserve(needed);
            let (result, read, _) = self.utf8.decode_to_string(input, &mut self.buffer, last);
            input = &input[read..];
            if let CoderResult::InputEmpty = result {
                return;
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/frame_tests.rs"]
mod tests;
