//! Server-Sent-Events framing shared by the relay and the client.

mod decoder;
mod reassembler;

pub use decoder::{Delta, EventStreamDecoder, StreamChoice, StreamChunk, DATA_PREFIX, DONE_SENTINEL};
pub use reassembler::ChunkReassembler;

/// Wire form of the stream terminator, including the blank-line separator.
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// Re-frame a single line for the outbound stream.
///
/// Returns `None` for anything that is not a data line. The returned flag
/// is set when the frame is the `[DONE]` terminator.
pub fn data_frame(line: &str) -> Option<(String, bool)> {
    let line = line.trim();
    let payload = line.strip_prefix(DATA_PREFIX)?.trim();
    Some((format!("{line}\n\n"), payload == DONE_SENTINEL))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_lines_get_blank_line_terminator() {
        let (frame, done) = data_frame(r#"data: {"choices":[]}"#).unwrap();
        assert_eq!(frame, "data: {\"choices\":[]}\n\n");
        assert!(!done);
    }

    #[test]
    fn done_line_is_flagged() {
        let (frame, done) = data_frame("data: [DONE]\r").unwrap();
        assert_eq!(frame, DONE_FRAME);
        assert!(done);
    }

    #[test]
    fn non_data_lines_are_not_framed() {
        assert!(data_frame("").is_none());
        assert!(data_frame(": ping").is_none());
        assert!(data_frame("event: completion").is_none());
    }
}
