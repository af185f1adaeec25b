//! PEM collection and decoding.
//!
//! While a certificate is being typed over the serial line, every byte goes
//! through a [`PemCollector`]. It accepts only the characters that can appear
//! in a PEM certificate, folds `\r` to `\n`, collapses runs of newlines and
//! reports completion once the end marker arrives.

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use log::{debug, trace};

use crate::error::{CertError, CertResult};

/// Capacity of the PEM load buffer.
pub const MAX_PEM_LENGTH: usize = 4096;

/// Opening marker of a PEM certificate.
pub const PEM_BEGIN_MARKER: &[u8] = b"-----BEGIN CERTIFICATE-----";

/// Closing marker of a PEM certificate.
pub const PEM_END_MARKER: &[u8] = b"-----END CERTIFICATE-----";

/// Outcome of feeding one byte to a [`PemCollector`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectStatus {
    /// More input is needed.
    Pending,
    /// The end marker was received.
    Complete,
    /// Loading must be aborted.
    Rejected(CertError),
}

/// Whether `byte` may appear in certificate text.
pub fn is_pem_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'/' | b'+' | b'=' | b'-' | b' ' | b'\r' | b'\n')
}

/// Accumulates filtered PEM text.
#[derive(Debug)]
pub struct PemCollector {
    buffer: Vec<u8>,
    received: usize,
    capacity: usize,
}

impl Default for PemCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl PemCollector {
    /// Create a collector with [`MAX_PEM_LENGTH`] capacity.
    pub fn new() -> Self {
        Self::with_capacity(MAX_PEM_LENGTH)
    }

    /// Create a collector holding at most `capacity` filtered bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        PemCollector {
            buffer: Vec::with_capacity(capacity.min(MAX_PEM_LENGTH)),
            received: 0,
            capacity,
        }
    }

    /// Feed one byte from the serial line.
    pub fn push(&mut self, byte: u8) -> CollectStatus {
        self.received += 1;

        if !is_pem_byte(byte) {
            debug!("illegal byte 0x{:02x} after {} bytes", byte, self.received);
            return CollectStatus::Rejected(CertError::IllegalCharacter(byte));
        }

        let byte = if byte == b'\r' { b'\n' } else { byte };
        if byte == b'\n' && self.buffer.last().map_or(true, |&last| last == b'\n') {
            return CollectStatus::Pending;
        }

        if self.buffer.len() >= self.capacity {
            return CollectStatus::Rejected(CertError::PemTooLong {
                max: self.capacity,
            });
        }

        self.buffer.push(byte);

        if self.buffer.ends_with(PEM_END_MARKER) {
            trace!("end marker after {} bytes", self.received);
            CollectStatus::Complete
        } else {
            CollectStatus::Pending
        }
    }

    /// Number of raw bytes fed so far, including dropped newlines.
    pub fn received(&self) -> usize {
        self.received
    }

    /// The filtered text.
    pub fn text(&self) -> &[u8] {
        &self.buffer
    }

    /// Decode the collected text into DER.
    pub fn decode(&self) -> CertResult<Vec<u8>> {
        decode_certificate(&self.buffer)
    }
}

/// Decode one PEM certificate into DER bytes.
pub fn decode_certificate(text: &[u8]) -> CertResult<Vec<u8>> {
    let begin = find(text, PEM_BEGIN_MARKER).ok_or(CertError::MalformedPem)?;
    let body_start = begin + PEM_BEGIN_MARKER.len();
    let body_len = find(&text[body_start..], PEM_END_MARKER).ok_or(CertError::MalformedPem)?;

    let body: Vec<u8> = text[body_start..body_start + body_len]
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();

    if body.is_empty() {
        return Err(CertError::MalformedPem);
    }

    let der = BASE64_STANDARD
        .decode(&body)
        .map_err(|_| CertError::InvalidBase64)?;

    // A certificate is a SEQUENCE.
    if der.first() != Some(&0x30) {
        return Err(CertError::NotACertificate);
    }

    Ok(der)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::certificate_with_cn;

    fn to_pem(der: &[u8], line_end: &str) -> String {
        let encoded = BASE64_STANDARD.encode(der);
        let mut pem = String::from("-----BEGIN CERTIFICATE-----");
        pem.push_str(line_end);
        for chunk in encoded.as_bytes().chunks(64) {
            pem.push_str(std::str::from_utf8(chunk).unwrap());
            pem.push_str(line_end);
        }
        pem.push_str("-----END CERTIFICATE-----");
        pem
    }

    #[test]
    fn test_collect_and_decode() {
        let der = certificate_with_cn("Collector CA", 100);
        let pem = to_pem(&der, "\r\n");

        let mut collector = PemCollector::new();
        let mut status = CollectStatus::Pending;
        for &b in pem.as_bytes() {
            status = collector.push(b);
            if status != CollectStatus::Pending {
                break;
            }
        }

        assert_eq!(status, CollectStatus::Complete);
        assert_eq!(collector.received(), pem.len());
        assert_eq!(collector.decode().unwrap(), der);
    }

    #[test]
    fn test_newlines_fold_and_collapse() {
        let mut collector = PemCollector::new();
        for &b in b"\r\nab\r\n\r\n\ncd\r" {
            assert_eq!(collector.push(b), CollectStatus::Pending);
        }
        assert_eq!(collector.text(), b"ab\ncd\n");
        assert_eq!(collector.received(), 12);
    }

    #[test]
    fn test_illegal_byte() {
        let mut collector = PemCollector::new();
        assert_eq!(collector.push(b'-'), CollectStatus::Pending);
        assert_eq!(
            collector.push(b'*'),
            CollectStatus::Rejected(CertError::IllegalCharacter(b'*'))
        );
    }

    #[test]
    fn test_overrun() {
        let mut collector = PemCollector::with_capacity(8);
        for &b in b"AAAAAAAA" {
            assert_eq!(collector.push(b), CollectStatus::Pending);
        }
        assert_eq!(
            collector.push(b'A'),
            CollectStatus::Rejected(CertError::PemTooLong { max: 8 })
        );
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert_eq!(
            decode_certificate(b"no markers here"),
            Err(CertError::MalformedPem)
        );
        assert_eq!(
            decode_certificate(b"-----BEGIN CERTIFICATE-----\n-----END CERTIFICATE-----"),
            Err(CertError::MalformedPem)
        );
        assert_eq!(
            decode_certificate(b"-----BEGIN CERTIFICATE-----\nA=B=\n-----END CERTIFICATE-----"),
            Err(CertError::InvalidBase64)
        );
        // "AAAA" decodes to three zero bytes, which is not a SEQUENCE.
        assert_eq!(
            decode_certificate(b"-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----"),
            Err(CertError::NotACertificate)
        );
    }
}
