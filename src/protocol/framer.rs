//! Newline framing for the device byte stream
//!
//! The realtime core writes newline-terminated text lines, but the serial
//! driver hands over whatever happens to be buffered. [`LineFramer`] keeps
//! the partial tail between reads so every line is emitted exactly once.

use std::str::Utf8Error;

/// One complete line received from the device, newline included
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub bytes: Vec<u8>,
}

impl Frame {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Frame content as text with trailing CR/LF removed
    pub fn text(&self) -> Result<&str, Utf8Error> {
        std::str::from_utf8(&self.bytes).map(|s| s.trim_end_matches(['\r', '\n']))
    }
}

/// Buffers input and emits a frame whenever a newline is encountered
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(2048),
        }
    }

    /// Ingest new bytes and return every line they complete
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        // Only the new bytes can contain a newline the buffer has not seen yet
        let mut search_from = self.buffer.len();
        self.buffer.extend_from_slice(bytes);

        let mut start = 0;
        while let Some(offset) = self.buffer[search_from..].iter().position(|&b| b == b'\n') {
            let end = search_from + offset + 1;
            frames.push(Frame::new(self.buffer[start..end].to_vec()));
            start = end;
            search_from = end;
        }
        self.buffer.drain(..start);

        frames
    }

    /// Bytes waiting for their terminating newline
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Drop any partial line
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_lines_simple() {
        let mut framer = LineFramer::new();
        let frames = framer.push(b"Hello\nWorld\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].bytes, b"Hello\n");
        assert_eq!(frames[1].text().unwrap(), "World");
        assert!(framer.pending().is_empty());
    }

    #[test]
    fn test_lines_split() {
        let mut framer = LineFramer::new();
        assert!(framer.push(b"Da").is_empty());
        assert!(framer.push(b"ta,1,2").is_empty());

        let frames = framer.push(b",3\nSens");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].text().unwrap(), "Data,1,2,3");
        assert_eq!(framer.pending(), b"Sens");
    }

    #[test]
    fn test_crlf_trimmed_for_text_only() {
        let mut framer = LineFramer::new();
        let f = framer.push(b"Test\r\n");
        assert_eq!(f[0].bytes, b"Test\r\n");
        assert_eq!(f[0].text().unwrap(), "Test");
    }

    #[test]
    fn test_invalid_utf8_does_not_stall_framing() {
        let mut framer = LineFramer::new();
        let frames = framer.push(b"\xff\xfe\nidle\n");
        assert_eq!(frames.len(), 2);
        assert!(frames[0].text().is_err());
        assert_eq!(frames[1].text().unwrap(), "idle");
    }

    #[test]
    fn test_reset_drops_partial() {
        let mut framer = LineFramer::new();
        framer.push(b"partial");
        framer.reset();
        let frames = framer.push(b"line\n");
        assert_eq!(frames[0].bytes, b"line\n");
    }

    proptest! {
        #[test]
        fn test_chunk_boundaries_do_not_matter(
            data in prop::collection::vec(prop_oneof![Just(b'\n'), any::<u8>()], 0..512),
            cuts in prop::collection::vec(0usize..512, 0..16)
        ) {
            let mut whole = LineFramer::new();
            let expected = whole.push(&data);

            let mut cuts: Vec<usize> = cuts.into_iter().map(|c| c.min(data.len())).collect();
            cuts.sort_unstable();

            let mut chunked = LineFramer::new();
            let mut frames = Vec::new();
            let mut prev = 0;
            for cut in cuts.into_iter().chain(std::iter::once(data.len())) {
                frames.extend(chunked.push(&data[prev..cut]));
                prev = cut;
            }

            prop_assert_eq!(frames, expected);
            prop_assert_eq!(chunked.pending(), whole.pending());
        }

        #[test]
        fn test_no_bytes_lost(data in prop::collection::vec(any::<u8>(), 0..256)) {
            let mut framer = LineFramer::new();
            let frames = framer.push(&data);
            let mut rebuilt: Vec<u8> = frames.into_iter().flat_map(|f| f.bytes).collect();
            rebuilt.extend_from_slice(framer.pending());
            prop_assert_eq!(rebuilt, data);
        }
    }
}
