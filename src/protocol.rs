//! Marker-framed byte protocol.
//!
//! Bytes outside a `^` ... `$` frame are ignored. Bytes inside a frame are
//! incremented by one (wrapping at 0xFF) and echoed. The markers themselves
//! are never echoed.
//!
//! ```text
//! Input:  hello^world$bye
//! Output: xpsme
//! ```
//!
//! The parser only remembers which side of a marker it is on, so the output
//! does not depend on how the transport splits the stream into reads.

use bytes::{BufMut, BytesMut};

/// Byte that opens a message frame.
pub const OPEN_MARKER: u8 = b'^';

/// Byte that closes a message frame.
pub const CLOSE_MARKER: u8 = b'$';

/// Byte sent to every client right after accept.
pub const HANDSHAKE: u8 = b'*';

/// Current framing state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParserState {
    /// Outside a frame; only `^` is significant.
    #[default]
    AwaitingMarker,
    /// Inside a frame; everything except `$` is transformed and echoed.
    InMessage,
}

/// Outcome of feeding one byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub state: ParserState,
    pub output: Option<u8>,
}

/// Pure transition function.
pub fn step(state: ParserState, byte: u8) -> Step {
    match (state, byte) {
        (ParserState::AwaitingMarker, OPEN_MARKER) => Step {
            state: ParserState::InMessage,
            output: None,
        },
        (ParserState::AwaitingMarker, _) => Step {
            state: ParserState::AwaitingMarker,
            output: None,
        },
        (ParserState::InMessage, CLOSE_MARKER) => Step {
            state: ParserState::AwaitingMarker,
            output: None,
        },
        (ParserState::InMessage, b) => Step {
            state: ParserState::InMessage,
            output: Some(b.wrapping_add(1)),
        },
    }
}

/// Incremental parser holding the state of a single connection.
#[derive(Debug, Default)]
pub struct Parser {
    state: ParserState,
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Feed one byte. Returns the byte to echo, if any.
    ///
    /// State transitions are logged at debug level.
    pub fn feed_byte(&mut self, byte: u8) -> Option<u8> {
        let next = step(self.state, byte);
        if next.state != self.state {
            match next.state {
                ParserState::InMessage => tracing::debug!("In-Message State"),
                ParserState::AwaitingMarker => tracing::debug!("Wait-For-Message State"),
            }
            self.state = next.state;
        }
        next.output
    }

    /// Feed a whole chunk, appending every echoed byte to `out`.
    pub fn feed(&mut self, chunk: &[u8], out: &mut BytesMut) {
        for &byte in chunk {
            if let Some(b) = self.feed_byte(byte) {
                out.put_u8(b);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(input: &[u8]) -> Vec<u8> {
        let mut parser = Parser::new();
        let mut out = BytesMut::new();
        parser.feed(input, &mut out);
        out.to_vec()
    }

    #[test]
    fn test_awaiting_drops_bytes() {
        for b in 0..=u8::MAX {
            let next = step(ParserState::AwaitingMarker, b);
            assert_eq!(next.output, None);
            if b == OPEN_MARKER {
                assert_eq!(next.state, ParserState::InMessage);
            } else {
                assert_eq!(next.state, ParserState::AwaitingMarker);
            }
        }
    }

    #[test]
    fn test_in_message_increments() {
        for b in 0..=u8::MAX {
            let next = step(ParserState::InMessage, b);
            if b == CLOSE_MARKER {
                assert_eq!(next.state, ParserState::AwaitingMarker);
                assert_eq!(next.output, None);
            } else {
                assert_eq!(next.state, ParserState::InMessage);
                assert_eq!(next.output, Some(b.wrapping_add(1)));
            }
        }
    }

    #[test]
    fn test_wraparound() {
        assert_eq!(run(&[b'^', 0xFF, b'$']), vec![0x00]);
    }

    #[test]
    fn test_nested_open_marker_is_data() {
        // 0x5E inside a frame is an ordinary byte.
        assert_eq!(run(b"^a^b$"), b"b_c".to_vec());
    }

    #[test]
    fn test_close_marker_outside_frame_is_ignored() {
        let mut parser = Parser::new();
        assert_eq!(parser.feed_byte(CLOSE_MARKER), None);
        assert_eq!(parser.state(), ParserState::AwaitingMarker);
    }

    #[test]
    fn test_scenarios() {
        assert_eq!(run(b"^Ab$"), b"Bc".to_vec());
        assert_eq!(run(b"hello^world$bye"), b"xpsme".to_vec());
        assert_eq!(run(b"^ab$cd^ef$"), b"bcfg".to_vec());
    }

    #[test]
    fn test_chunking_invariance() {
        let input = b"xx^Hello$ zz ^$^\xFFworld$ tail ^open";
        let whole = run(input);

        for size in 1..input.len() {
            let mut parser = Parser::new();
            let mut out = BytesMut::new();
            for chunk in input.chunks(size) {
                parser.feed(chunk, &mut out);
            }
            assert_eq!(out.to_vec(), whole, "chunk size {size}");
        }
        assert_eq!(whole, b"Ifmmp\x00xpsmepqfo".to_vec());
    }

    #[test]
    fn test_unterminated_frame_leaves_in_message() {
        let mut parser = Parser::new();
        let mut out = BytesMut::new();
        parser.feed(b"^ab", &mut out);
        assert_eq!(parser.state(), ParserState::InMessage);
        assert_eq!(&out[..], b"bc");
    }
}
