//! Error types for the engine and its collaborators.

use bytes::{BufMut, BytesMut};
use thiserror::Error;

use atmod_protocol::{ProtocolError, MSG_ERROR};

/// Errors reported by the network collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetError {
    /// Host name resolution failed.
    #[error("DNS lookup failed for {0}")]
    Dns(String),

    /// The transport or TLS handshake failed.
    #[error("connect to {host}:{port} failed: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    /// A listening socket could not be opened.
    #[error("listen on port {0} failed")]
    Listen(u16),

    /// The peer is gone.
    #[error("connection closed")]
    Closed,

    /// The connection did not become writable in time.
    #[error("write timed out")]
    Timeout,

    /// The collaborator does not implement the request.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
}

/// Errors reported by the settings storage collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Reading or writing the backing block failed.
    #[error("storage I/O error: {0}")]
    Io(String),
}

/// Errors decoding or persisting the settings record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    /// The stored block is shorter than a record.
    #[error("settings block too short: {len} bytes, need {need}")]
    Truncated { len: usize, need: usize },

    /// The stored checksum does not match the record.
    #[error("settings checksum mismatch: stored {stored:08x}, computed {computed:08x}")]
    Checksum { stored: u32, computed: u32 },

    /// The storage collaborator failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors from the connection table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// Every usable link slot is occupied.
    #[error("no free link slot")]
    NoFreeSlot,

    /// The requested slot is already occupied.
    #[error("link {0} already in use")]
    InUse(u8),

    /// The link id is outside the table.
    #[error("invalid link id {0}")]
    InvalidId(u8),

    /// The slot holds no live connection.
    #[error("link {0} is not connected")]
    NotConnected(u8),

    /// A TLS session would exceed the TLS memory budget.
    #[error("TLS memory exhausted: need {requested} bytes, {available} available")]
    TlsBudget { requested: usize, available: usize },

    /// No listening socket slot is free.
    #[error("no free server slot")]
    NoFreeServer,

    /// The network collaborator failed.
    #[error(transparent)]
    Net(#[from] NetError),
}

/// Outcome of a failed command.
///
/// Each variant maps onto one reply shape: an optional diagnostic line
/// followed by `ERROR`, plus `CLOSED` after a failed connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// Malformed arguments or trailing input.
    #[error("syntax error")]
    Syntax,

    /// The command is not allowed in the current state.
    #[error("rejected")]
    Rejected,

    /// A precondition failed; the message is printed before `ERROR`.
    #[error("{0}")]
    Precondition(String),

    /// A bounded resource is exhausted.
    #[error("{0}")]
    Resource(String),

    /// A network operation failed after the link was set up.
    #[error("{0}")]
    Io(String),
}

impl CommandError {
    /// Create a [`CommandError::Precondition`] error.
    pub fn precondition(message: impl Into<String>) -> Self {
        CommandError::Precondition(message.into())
    }

    /// Label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            CommandError::Syntax => "syntax",
            CommandError::Rejected => "rejected",
            CommandError::Precondition(_) => "precondition",
            CommandError::Resource(_) => "resource",
            CommandError::Io(_) => "io",
        }
    }

    /// Write the reply for this error.
    pub fn render(&self, out: &mut BytesMut) {
        match self {
            CommandError::Syntax | CommandError::Rejected => {}
            CommandError::Precondition(message) | CommandError::Resource(message) => {
                out.put_slice(message.as_bytes());
                out.put_slice(b"\r\n");
            }
            CommandError::Io(message) => {
                out.put_slice(message.as_bytes());
                out.put_slice(b"\r\n");
                out.put_slice(MSG_ERROR);
                out.put_slice(b"CLOSED\r\n");
                return;
            }
        }
        out.put_slice(MSG_ERROR);
    }
}

impl From<ProtocolError> for CommandError {
    fn from(_: ProtocolError) -> Self {
        CommandError::Syntax
    }
}

/// Result type alias for command handlers.
pub type CommandResult<T> = Result<T, CommandError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(err: CommandError) -> Vec<u8> {
        let mut out = BytesMut::new();
        err.render(&mut out);
        out.to_vec()
    }

    #[test]
    fn test_render_syntax() {
        assert_eq!(rendered(CommandError::Syntax), b"\r\nERROR\r\n");
    }

    #[test]
    fn test_render_precondition() {
        assert_eq!(
            rendered(CommandError::precondition("MUX=0")),
            b"MUX=0\r\n\r\nERROR\r\n"
        );
    }

    #[test]
    fn test_render_io_reports_closed() {
        assert_eq!(
            rendered(CommandError::Io("DNS Fail".into())),
            b"DNS Fail\r\n\r\nERROR\r\nCLOSED\r\n"
        );
    }

    #[test]
    fn test_protocol_error_is_syntax() {
        let err: CommandError = ProtocolError::expected("comma", 3).into();
        assert_eq!(err, CommandError::Syntax);
    }
}
