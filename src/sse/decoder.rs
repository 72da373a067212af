use log::debug;
use serde::Deserialize;

/// Payload that marks the end of a completion stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Prefix carried by every SSE data line.
pub const DATA_PREFIX: &str = "data: ";

/// One streamed completion chunk, reduced to the fields the decoder reads.
#[derive(Debug, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub content: Option<String>,
}

/// Interprets reassembled lines as an SSE token stream.
///
/// Malformed frames are skipped rather than treated as errors: one bad
/// event must not abort an otherwise good stream. Skips are counted so
/// they stay visible.
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    done: bool,
    skipped: usize,
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one line, returning the content delta it carries, if any.
    pub fn decode(&mut self, line: &str) -> Option<String> {
        if self.done {
            return None;
        }

        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let payload = line.strip_prefix(DATA_PREFIX)?.trim();

        if payload == DONE_SENTINEL {
            self.done = true;
            return None;
        }

        let chunk: StreamChunk = match serde_json::from_str(payload) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.skipped += 1;
                debug!("skipping malformed stream frame ({e}): {payload}");
                return None;
            }
        };

        chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty())
    }

    /// Whether the `[DONE]` sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Number of data frames dropped because their payload was not valid JSON.
    pub fn skipped_frames(&self) -> usize {
        self.skipped
    }
}
