//! Error types for the AT command protocol.

use thiserror::Error;

/// Errors produced while scanning a command line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// A specific byte or token was expected at the cursor.
    #[error("expected {expected} at offset {offset}")]
    Expected {
        expected: &'static str,
        offset: usize,
    },

    /// A decimal number did not fit into 32 bits.
    #[error("number overflow at offset {offset}")]
    NumberOverflow { offset: usize },

    /// A numeric argument was outside its accepted range.
    #[error("value {value} out of range {min}..={max}")]
    OutOfRange { value: u32, min: u32, max: u32 },

    /// A quoted string exceeded the scanner's buffer.
    #[error("string too long: max {max} bytes")]
    StringTooLong { max: usize },

    /// A quoted string was empty where a value is required.
    #[error("empty string at offset {offset}")]
    EmptyString { offset: usize },

    /// A quoted dotted-quad address was malformed.
    #[error("invalid IPv4 address at offset {offset}")]
    InvalidAddress { offset: usize },

    /// A quoted MAC address was malformed.
    #[error("invalid MAC address at offset {offset}")]
    InvalidMac { offset: usize },

    /// Bytes remained after the last expected argument.
    #[error("unexpected trailing input at offset {offset}")]
    TrailingInput { offset: usize },

    /// The command line buffer overflowed before a line terminator arrived.
    #[error("command line overflow: max {max} bytes")]
    LineOverflow { max: usize },
}

impl ProtocolError {
    /// Create an [`ProtocolError::Expected`] error.
    pub fn expected(expected: &'static str, offset: usize) -> Self {
        ProtocolError::Expected { expected, offset }
    }
}

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
