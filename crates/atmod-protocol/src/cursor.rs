//! Cursor-based scanners for command arguments.
//!
//! Every scanner advances the cursor past what it consumed on success and
//! leaves it untouched on failure, so a handler can probe for an optional
//! argument and fall back without re-parsing.

use std::net::Ipv4Addr;

use crate::error::{ProtocolError, ProtocolResult};

/// Maximum decoded length of a quoted string argument.
pub const MAX_STRING_LENGTH: usize = 200;

/// Translate one ASCII hex digit into its nibble value.
pub fn hex_nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// A read position inside a command line.
#[derive(Debug, Clone, Copy)]
pub struct ParseCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ParseCursor<'a> {
    /// Create a cursor at the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        ParseCursor { buf, pos: 0 }
    }

    /// Create a cursor at `pos` inside `buf`.
    pub fn at(buf: &'a [u8], pos: usize) -> Self {
        ParseCursor {
            buf,
            pos: pos.min(buf.len()),
        }
    }

    /// Current offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes from the cursor to the end of the buffer.
    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    /// The byte under the cursor.
    pub fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    /// The byte `n` positions past the cursor.
    pub fn peek_at(&self, n: usize) -> Option<u8> {
        self.buf.get(self.pos + n).copied()
    }

    /// Skip `n` bytes, clamped to the end of the buffer.
    pub fn advance(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.buf.len());
    }

    /// Consume `byte` if it is under the cursor.
    pub fn eat(&mut self, byte: u8) -> bool {
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Consume `text` if the remaining input starts with it.
    pub fn eat_slice(&mut self, text: &[u8]) -> bool {
        if self.remaining().starts_with(text) {
            self.pos += text.len();
            true
        } else {
            false
        }
    }

    /// Consume `byte` or fail.
    pub fn expect(&mut self, byte: u8, what: &'static str) -> ProtocolResult<()> {
        if self.eat(byte) {
            Ok(())
        } else {
            Err(ProtocolError::expected(what, self.pos))
        }
    }

    /// Whether only the line terminator is left.
    pub fn at_line_end(&self) -> bool {
        self.remaining() == b"\r\n"
    }

    /// Fail unless only the line terminator is left.
    pub fn expect_line_end(&self) -> ProtocolResult<()> {
        if self.at_line_end() {
            Ok(())
        } else {
            Err(ProtocolError::TrailingInput { offset: self.pos })
        }
    }

    /// Read the maximal run of ASCII digits as a decimal number.
    pub fn read_number(&mut self) -> ProtocolResult<u32> {
        let start = self.pos;
        let mut value: u32 = 0;
        let mut pos = self.pos;

        while let Some(&c) = self.buf.get(pos) {
            if !c.is_ascii_digit() {
                break;
            }
            value = value
                .checked_mul(10)
                .and_then(|v| v.checked_add(u32::from(c - b'0')))
                .ok_or(ProtocolError::NumberOverflow { offset: start })?;
            pos += 1;
        }

        if pos == start {
            return Err(ProtocolError::expected("number", start));
        }

        self.pos = pos;
        Ok(value)
    }

    /// Read a decimal number and check it against an inclusive range.
    pub fn read_number_in(&mut self, min: u32, max: u32) -> ProtocolResult<u32> {
        let saved = self.pos;
        let value = self.read_number()?;
        if value < min || value > max {
            self.pos = saved;
            return Err(ProtocolError::OutOfRange { value, min, max });
        }
        Ok(value)
    }

    /// Read a double-quoted string.
    ///
    /// Copying stops at the closing quote or at any control byte. With
    /// `escape`, a backslash passes the following byte through literally.
    pub fn read_quoted(&mut self, escape: bool, allow_empty: bool) -> ProtocolResult<Vec<u8>> {
        let start = self.pos;
        if self.peek() != Some(b'"') {
            return Err(ProtocolError::expected("opening quote", start));
        }

        let mut pos = start + 1;
        let mut out = Vec::new();

        loop {
            let c = match self.buf.get(pos) {
                Some(&c) if c != b'"' && c >= b' ' => c,
                _ => break,
            };

            if escape && c == b'\\' {
                match self.buf.get(pos + 1) {
                    Some(&next) if next >= b' ' => {
                        out.push(next);
                        pos += 2;
                    }
                    _ => return Err(ProtocolError::expected("escaped character", pos + 1)),
                }
            } else {
                out.push(c);
                pos += 1;
            }

            if out.len() > MAX_STRING_LENGTH {
                return Err(ProtocolError::StringTooLong {
                    max: MAX_STRING_LENGTH,
                });
            }
        }

        if self.buf.get(pos) != Some(&b'"') {
            return Err(ProtocolError::expected("closing quote", pos));
        }
        if out.is_empty() && !allow_empty {
            return Err(ProtocolError::EmptyString { offset: start });
        }

        self.pos = pos + 1;
        Ok(out)
    }

    /// Read a double-quoted string as text, replacing invalid UTF-8.
    pub fn read_string(&mut self, escape: bool, allow_empty: bool) -> ProtocolResult<String> {
        self.read_quoted(escape, allow_empty)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Read a quoted host name: printable, no escapes, no spaces.
    pub fn read_host(&mut self) -> ProtocolResult<String> {
        let start = self.pos;
        if self.peek() != Some(b'"') {
            return Err(ProtocolError::expected("opening quote", start));
        }

        let rest = &self.buf[start + 1..];
        let len = rest
            .iter()
            .position(|&c| c == b'"' || c <= b' ')
            .unwrap_or(rest.len());

        if rest.get(len) != Some(&b'"') {
            return Err(ProtocolError::expected("closing quote", start + 1 + len));
        }

        self.pos = start + len + 2;
        Ok(String::from_utf8_lossy(&rest[..len]).into_owned())
    }

    /// Read a quoted dotted-quad IPv4 address.
    pub fn read_ipv4(&mut self) -> ProtocolResult<Ipv4Addr> {
        let start = self.pos;
        let invalid = ProtocolError::InvalidAddress { offset: start };

        let mut probe = *self;
        if !probe.eat(b'"') {
            return Err(invalid);
        }

        let mut octets = [0u8; 4];
        for (i, octet) in octets.iter_mut().enumerate() {
            let value = probe.read_number().map_err(|_| invalid.clone())?;
            *octet = u8::try_from(value).map_err(|_| invalid.clone())?;
            if i < 3 && !probe.eat(b'.') {
                return Err(invalid);
            }
        }

        if !probe.eat(b'"') {
            return Err(invalid);
        }

        self.pos = probe.pos;
        Ok(Ipv4Addr::from(octets))
    }

    /// Read a quoted `xx:xx:xx:xx:xx:xx` hardware address.
    pub fn read_mac(&mut self) -> ProtocolResult<[u8; 6]> {
        let start = self.pos;
        let text = self.read_quoted(false, false)?;

        let parsed = parse_mac(&text);
        if parsed.is_none() {
            self.pos = start;
        }
        parsed.ok_or(ProtocolError::InvalidMac { offset: start })
    }
}

fn parse_mac(text: &[u8]) -> Option<[u8; 6]> {
    if text.len() != 17 {
        return None;
    }

    let mut mac = [0u8; 6];
    for (i, byte) in mac.iter_mut().enumerate() {
        let at = i * 3;
        if i > 0 && text[at - 1] != b':' {
            return None;
        }
        *byte = hex_nibble(text[at])? << 4 | hex_nibble(text[at + 1])?;
    }
    Some(mac)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_number() {
        let mut cursor = ParseCursor::new(b"1234,5");
        assert_eq!(cursor.read_number(), Ok(1234));
        assert_eq!(cursor.position(), 4);
        assert!(cursor.eat(b','));
        assert_eq!(cursor.read_number(), Ok(5));
    }

    #[test]
    fn test_read_number_without_digits_keeps_cursor() {
        let mut cursor = ParseCursor::at(b"AT+X=abc", 5);
        assert!(cursor.read_number().is_err());
        assert_eq!(cursor.position(), 5);
    }

    #[test]
    fn test_read_number_overflow() {
        let mut cursor = ParseCursor::new(b"99999999999\r\n");
        assert_eq!(
            cursor.read_number(),
            Err(ProtocolError::NumberOverflow { offset: 0 })
        );
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_read_number_in_range() {
        let mut cursor = ParseCursor::new(b"7201");
        assert!(matches!(
            cursor.read_number_in(0, 7200),
            Err(ProtocolError::OutOfRange { value: 7201, .. })
        ));
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_read_quoted_plain() {
        let mut cursor = ParseCursor::new(b"\"my net\",\"pw\"");
        assert_eq!(cursor.read_string(false, false).unwrap(), "my net");
        assert!(cursor.eat(b','));
        assert_eq!(cursor.read_string(false, false).unwrap(), "pw");
        assert!(cursor.remaining().is_empty());
    }

    #[test]
    fn test_read_quoted_escaped() {
        let mut cursor = ParseCursor::new(br#""a\"b\\c\,d""#);
        assert_eq!(cursor.read_string(true, false).unwrap(), r#"a"b\c,d"#);
    }

    #[test]
    fn test_read_quoted_empty() {
        let mut cursor = ParseCursor::new(b"\"\"\r\n");
        assert_eq!(
            cursor.read_quoted(false, false),
            Err(ProtocolError::EmptyString { offset: 0 })
        );
        assert_eq!(cursor.position(), 0);
        assert_eq!(cursor.read_quoted(false, true).unwrap(), Vec::<u8>::new());
        assert!(cursor.at_line_end());
    }

    #[test]
    fn test_read_quoted_stops_at_control_byte() {
        let mut cursor = ParseCursor::new(b"\"abc\r\n");
        assert!(cursor.read_quoted(true, true).is_err());
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_read_quoted_too_long() {
        let mut line = vec![b'"'];
        line.extend(std::iter::repeat(b'x').take(MAX_STRING_LENGTH + 1));
        line.push(b'"');
        let mut cursor = ParseCursor::new(&line);
        assert_eq!(
            cursor.read_quoted(false, false),
            Err(ProtocolError::StringTooLong {
                max: MAX_STRING_LENGTH
            })
        );
    }

    #[test]
    fn test_read_ipv4() {
        let mut cursor = ParseCursor::new(b"\"192.168.1.20\"\r\n");
        assert_eq!(cursor.read_ipv4(), Ok(Ipv4Addr::new(192, 168, 1, 20)));
        assert!(cursor.at_line_end());
    }

    #[test]
    fn test_read_ipv4_rejects_malformed() {
        for input in [
            &b"192.168.1.20"[..],
            b"\"192.168.1\"",
            b"\"192.168.1.256\"",
            b"\"192.168..1\"",
            b"\"192.168.1.2",
            b"\"192-168-1-2\"",
        ] {
            let mut cursor = ParseCursor::new(input);
            assert!(cursor.read_ipv4().is_err(), "accepted {:?}", input);
            assert_eq!(cursor.position(), 0);
        }
    }

    #[test]
    fn test_read_host() {
        let mut cursor = ParseCursor::new(b"\"example.com\",443");
        assert_eq!(cursor.read_host().unwrap(), "example.com");
        assert_eq!(cursor.peek(), Some(b','));

        let mut cursor = ParseCursor::new(b"\"bad host\",443");
        assert!(cursor.read_host().is_err());
    }

    #[test]
    fn test_read_mac() {
        let mut cursor = ParseCursor::new(b"\"18:fe:34:A0:0b:01\"");
        assert_eq!(
            cursor.read_mac(),
            Ok([0x18, 0xfe, 0x34, 0xa0, 0x0b, 0x01])
        );

        let mut cursor = ParseCursor::new(b"\"18-fe-34-a0-0b-01\"");
        assert!(cursor.read_mac().is_err());
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_hex_nibble() {
        assert_eq!(hex_nibble(b'0'), Some(0));
        assert_eq!(hex_nibble(b'a'), Some(10));
        assert_eq!(hex_nibble(b'F'), Some(15));
        assert_eq!(hex_nibble(b'g'), None);
    }
}
