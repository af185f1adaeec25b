//! AT Command Line Protocol
//!
//! This crate provides the lexical layer of the serial AT command protocol
//! spoken by ESP8266-style network modems. It knows nothing about sockets or
//! certificates; it turns raw bytes from the serial line into something a
//! command handler can work with.
//!
//! # Protocol Overview
//!
//! - **Commands** (host → modem): ASCII lines starting with `AT`, terminated
//!   with `\r\n`. A bare `\r` does not end a line.
//! - **Replies** (modem → host): optional body lines followed by a terminal
//!   `\r\nOK\r\n` or `\r\nERROR\r\n`.
//! - **Payloads**: raw bytes framed by a length announced in a preceding
//!   command (`AT+CIPSEND=<n>`), never by delimiters.
//!
//! # Command Forms
//!
//! Each table entry matches in one of three ways:
//!
//! - **Exact**: the line is the prefix and nothing else (`AT+RST`)
//! - **Query/Set**: the prefix is followed by `?` (query, exact length) or
//!   `=` (set, arguments left to the handler)
//! - **Prefix**: anything may follow (`ATE0`, `AT+CIPSEND=...`)
//!
//! # Example
//!
//! ```rust,ignore
//! use atmod_protocol::{find_command, CommandCode, ParseCursor};
//!
//! let line = b"AT+CIPMUX=1\r\n";
//! assert_eq!(find_command(line), Some(CommandCode::CipMux));
//!
//! let mut cursor = ParseCursor::at(line, 10);
//! let mux = cursor.read_number()?;
//! cursor.expect_line_end()?;
//! ```

mod codec;
mod commands;
mod cursor;
mod error;

pub use codec::*;
pub use commands::*;
pub use cursor::*;
pub use error::*;
