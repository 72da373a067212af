use log::warn;

/// Turns an arbitrarily fragmented byte stream into complete lines.
///
/// Network reads carry no guarantee of alignment with line or JSON
/// boundaries, so everything after the last `\n` seen so far is held back
/// until a later chunk completes it. One instance belongs to one stream.
#[derive(Debug, Default)]
pub struct ChunkReassembler {
    buffer: String,
    // Bytes of a UTF-8 sequence cut off at the end of the previous chunk.
    pending: Vec<u8>,
}

impl ChunkReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every line it completed, in order.
    ///
    /// Returned lines do not include the `\n` terminator. The trailing
    /// unterminated part stays in the buffer.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);

        let Some(last_break) = self.buffer.rfind('\n') else {
            return Vec::new();
        };

        let tail = self.buffer.split_off(last_break + 1);
        let complete = std::mem::replace(&mut self.buffer, tail);

        // `complete` ends with '\n', so the final split part is always empty.
        let mut lines: Vec<String> = complete.split('\n').map(str::to_string).collect();
        lines.pop();
        lines
    }

    /// Byte-level variant of [`feed`](Self::feed).
    ///
    /// A multi-byte character split across two reads is held back until the
    /// rest of it arrives. Invalid sequences are replaced with U+FFFD.
    pub fn feed_bytes(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        let mut text = String::with_capacity(bytes.len());
        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }

        self.feed(&text)
    }

    /// Text received so far that has not formed a complete line.
    pub fn residual(&self) -> &str {
        &self.buffer
    }

    /// Signal end of input and consume the reassembler.
    ///
    /// Returns the unterminated tail, if any. A tail with non-whitespace
    /// content means the transfer was cut short and is logged as a warning.
    pub fn finish(mut self) -> Option<String> {
        if !self.pending.is_empty() {
            self.buffer.push(char::REPLACEMENT_CHARACTER);
        }
        if self.buffer.trim().is_empty() {
            return None;
        }
        warn!(
            "stream ended with {} unterminated bytes; transfer may be truncated",
            self.buffer.len()
        );
        Some(self.buffer)
    }

    /// Drop any buffered text so the instance can serve a fresh stream.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n\
                          : keep-alive\n\
                          data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n\
                          data: [DONE]\n\n";

    fn rejoin(lines: &[String], residual: &str) -> String {
        let mut out = String::new();
        for line in lines {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str(residual);
        out
    }

    #[test]
    fn emits_only_completed_lines() {
        let mut r = ChunkReassembler::new();
        assert!(r.feed("data: par").is_empty());
        assert_eq!(r.residual(), "data: par");

        let lines = r.feed("tial\nnext");
        assert_eq!(lines, vec!["data: partial".to_string()]);
        assert_eq!(r.residual(), "next");
    }

    #[test]
    fn blank_lines_are_preserved_as_empty_lines() {
        let mut r = ChunkReassembler::new();
        let lines = r.feed("a\n\nb\n");
        assert_eq!(lines, vec!["a", "", "b"]);
        assert_eq!(r.residual(), "");
    }

    #[test]
    fn two_way_splits_at_every_position_are_loss_free() {
        for split in 0..=STREAM.len() {
            if !STREAM.is_char_boundary(split) {
                continue;
            }
            let mut r = ChunkReassembler::new();
            let mut lines = r.feed(&STREAM[..split]);
            lines.extend(r.feed(&STREAM[split..]));
            assert_eq!(rejoin(&lines, r.residual()), STREAM, "split at {split}");
        }
    }

    #[test]
    fn byte_at_a_time_is_loss_free() {
        let mut r = ChunkReassembler::new();
        let mut lines = Vec::new();
        for b in STREAM.as_bytes() {
            lines.extend(r.feed_bytes(std::slice::from_ref(b)));
        }
        assert_eq!(rejoin(&lines, r.residual()), STREAM);
    }

    #[test]
    fn multibyte_character_split_across_reads() {
        let text = "data: héllo ✓\n";
        let bytes = text.as_bytes();
        // '✓' is three bytes; cut inside it.
        let cut = text.find('✓').unwrap() + 1;

        let mut r = ChunkReassembler::new();
        assert!(r.feed_bytes(&bytes[..cut]).is_empty());
        let lines = r.feed_bytes(&bytes[cut..]);
        assert_eq!(lines, vec!["data: héllo ✓".to_string()]);
    }

    #[test]
    fn invalid_utf8_is_replaced_not_dropped() {
        let mut r = ChunkReassembler::new();
        let lines = r.feed_bytes(b"a\xffb\n");
        assert_eq!(lines, vec!["a\u{fffd}b".to_string()]);
    }

    #[test]
    fn finish_reports_non_blank_residual() {
        let mut r = ChunkReassembler::new();
        r.feed("data: {\"choices\"");
        assert_eq!(r.finish().as_deref(), Some("data: {\"choices\""));

        let mut clean = ChunkReassembler::new();
        clean.feed("data: [DONE]\n\n  ");
        assert_eq!(clean.finish(), None);
    }

    #[test]
    fn reset_discards_buffer() {
        let mut r = ChunkReassembler::new();
        r.feed("stale");
        r.reset();
        assert_eq!(r.feed("fresh\n"), vec!["fresh".to_string()]);
    }
}
