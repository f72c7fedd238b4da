//! Line reassembly for the query stream.

use crate::error::ProtocolError;
use crate::MAX_LINE_LENGTH;
use bytes::{Buf, BytesMut};

/// Splits an inbound byte stream into lines.
///
/// Lines are split on `\n` and trimmed of surrounding whitespace, which also
/// strips the `\r` the server places around its terminators.
pub struct LineDecoder {
    buffer: BytesMut,
    /// Bytes already searched for a terminator.
    scanned: usize,
    max_line_length: usize,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::with_max_line_length(MAX_LINE_LENGTH)
    }

    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            scanned: 0,
            max_line_length,
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to take the next complete line from the buffer.
    pub fn next_line(&mut self) -> Result<Option<String>, ProtocolError> {
        let found = self.buffer[self.scanned..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|rel| self.scanned + rel);
        match found {
            Some(pos) => {
                self.scanned = 0;
                if pos > self.max_line_length {
                    return Err(ProtocolError::LineTooLong {
                        size: pos,
                        max: self.max_line_length,
                    });
                }
                let line = self.buffer.split_to(pos);
                self.buffer.advance(1);
                Ok(Some(String::from_utf8_lossy(&line).trim().to_string()))
            }
            None if self.buffer.len() > self.max_line_length => Err(ProtocolError::LineTooLong {
                size: self.buffer.len(),
                max: self.max_line_length,
            }),
            None => {
                self.scanned = self.buffer.len();
                Ok(None)
            }
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
    }
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_line() {
        let mut decoder = LineDecoder::new();
        decoder.extend(b"error id=0 msg=ok\n\r");
        assert_eq!(
            decoder.next_line().unwrap().as_deref(),
            Some("error id=0 msg=ok")
        );
        assert!(decoder.next_line().unwrap().is_none());
        // the trailing \r stays buffered and is trimmed off the next line
        assert_eq!(decoder.buffered(), 1);
    }

    #[test]
    fn test_server_line_endings() {
        let mut decoder = LineDecoder::new();
        decoder.extend(b"TS3\n\rWelcome to the TeamSpeak 3 ServerQuery interface.\n\r");
        assert_eq!(decoder.next_line().unwrap().as_deref(), Some("TS3"));
        assert_eq!(
            decoder.next_line().unwrap().as_deref(),
            Some("Welcome to the TeamSpeak 3 ServerQuery interface.")
        );
        assert!(decoder.next_line().unwrap().is_none());
    }

    #[test]
    fn test_partial_lines() {
        let mut decoder = LineDecoder::new();
        decoder.extend(b"virtualserver_");
        assert!(decoder.next_line().unwrap().is_none());
        decoder.extend(b"status=online");
        assert!(decoder.next_line().unwrap().is_none());
        decoder.extend(b"\nerror id=0");
        assert_eq!(
            decoder.next_line().unwrap().as_deref(),
            Some("virtualserver_status=online")
        );
        decoder.extend(b" msg=ok\n");
        assert_eq!(
            decoder.next_line().unwrap().as_deref(),
            Some("error id=0 msg=ok")
        );
    }

    #[test]
    fn test_blank_lines_are_yielded_empty() {
        let mut decoder = LineDecoder::new();
        decoder.extend(b"\n \n");
        assert_eq!(decoder.next_line().unwrap().as_deref(), Some(""));
        assert_eq!(decoder.next_line().unwrap().as_deref(), Some(""));
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut decoder = LineDecoder::new();
        decoder.extend(b"name=\xff\n");
        let line = decoder.next_line().unwrap().unwrap();
        assert!(line.starts_with("name="));
        assert!(line.contains('\u{FFFD}'));
    }

    #[test]
    fn test_line_too_long() {
        let mut decoder = LineDecoder::with_max_line_length(8);
        decoder.extend(b"0123456789");
        assert!(matches!(
            decoder.next_line(),
            Err(ProtocolError::LineTooLong { size: 10, max: 8 })
        ));

        let mut decoder = LineDecoder::with_max_line_length(8);
        decoder.extend(b"0123456789\n");
        assert!(matches!(
            decoder.next_line(),
            Err(ProtocolError::LineTooLong { .. })
        ));
    }

    #[test]
    fn test_clear() {
        let mut decoder = LineDecoder::default();
        decoder.extend(b"some data");
        assert_eq!(decoder.buffered(), 9);
        decoder.clear();
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_partial_reads_resume_scan() {
        let mut decoder = LineDecoder::new();
        let chunk = [b'a'; 8192];
        for i in 1..=4 {
            decoder.extend(&chunk);
            assert!(decoder.next_line().unwrap().is_none());
            assert_eq!(decoder.scanned, i * chunk.len());
        }
        decoder.extend(b"\nnext\n");
        assert_eq!(decoder.next_line().unwrap().map(|l| l.len()), Some(4 * 8192));
        assert_eq!(decoder.scanned, 0);
        assert_eq!(decoder.next_line().unwrap().as_deref(), Some("next"));
    }
}
