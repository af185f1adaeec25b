//! Command line accumulation and reply framing.
//!
//! Commands arrive one byte at a time. A line is complete when a `\n` has
//! been appended; whether it is also well formed (`AT...\r\n`) is decided by
//! the matcher, not here.

use bytes::{Bytes, BytesMut};

use crate::error::{ProtocolError, ProtocolResult};

/// Capacity of the command line buffer.
pub const MAX_COMMAND_LINE: usize = 256;

/// Terminal reply for a successful command.
pub const MSG_OK: &[u8] = b"\r\nOK\r\n";

/// Terminal reply for a failed command.
pub const MSG_ERROR: &[u8] = b"\r\nERROR\r\n";

/// Reply to a complete line received while a deferred operation runs.
pub const MSG_BUSY: &[u8] = b"busy p...\r\n";

/// Prompt sent when the modem is ready for a raw payload.
pub const MSG_SEND_PROMPT: &[u8] = b"OK\r\n> ";

/// Result of appending one byte to a [`CommandLine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStatus {
    /// More bytes are needed.
    Partial,
    /// A `\n` was appended; the line is ready for dispatch.
    Complete,
}

/// Fixed-capacity accumulator for one command line.
#[derive(Debug)]
pub struct CommandLine {
    buffer: BytesMut,
    capacity: usize,
}

impl Default for CommandLine {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandLine {
    /// Create a buffer with [`MAX_COMMAND_LINE`] capacity.
    pub fn new() -> Self {
        Self::with_capacity(MAX_COMMAND_LINE)
    }

    /// Create a buffer holding at most `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        CommandLine {
            buffer: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    /// Append one byte.
    ///
    /// On overflow the buffer is cleared and an error returned.
    pub fn push(&mut self, byte: u8) -> ProtocolResult<LineStatus> {
        if self.buffer.len() >= self.capacity {
            self.buffer.clear();
            return Err(ProtocolError::LineOverflow { max: self.capacity });
        }

        self.buffer.extend_from_slice(&[byte]);

        if byte == b'\n' {
            Ok(LineStatus::Complete)
        } else {
            Ok(LineStatus::Partial)
        }
    }

    /// The accumulated bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Take the buffered line, leaving the buffer empty.
    pub fn take(&mut self) -> Bytes {
        self.buffer.split().freeze()
    }

    /// Discard the buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Buffer contents as text (for logging).
    pub fn as_str_lossy(&self) -> String {
        String::from_utf8_lossy(&self.buffer).trim_end().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_completion() {
        let mut line = CommandLine::new();
        for &b in b"AT\r" {
            assert_eq!(line.push(b), Ok(LineStatus::Partial));
        }
        assert_eq!(line.push(b'\n'), Ok(LineStatus::Complete));
        assert_eq!(line.as_bytes(), b"AT\r\n");
        assert_eq!(line.as_str_lossy(), "AT");
    }

    #[test]
    fn test_bare_cr_does_not_complete() {
        let mut line = CommandLine::new();
        for &b in b"AT\r\r" {
            assert_eq!(line.push(b), Ok(LineStatus::Partial));
        }
        assert_eq!(line.len(), 4);
    }

    #[test]
    fn test_overflow_clears() {
        let mut line = CommandLine::with_capacity(4);
        for &b in b"ATAT" {
            line.push(b).unwrap();
        }
        assert_eq!(line.push(b'X'), Err(ProtocolError::LineOverflow { max: 4 }));
        assert!(line.is_empty());
    }
}
