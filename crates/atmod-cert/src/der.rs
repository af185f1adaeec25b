//! Minimal DER reader.
//!
//! Walks a fixed path through an X.509 certificate:
//!
//! ```text
//! Certificate SEQUENCE
//!   TBSCertificate SEQUENCE
//!     version        [0]
//!     serialNumber   INTEGER
//!     signature      SEQUENCE
//!     issuer         SEQUENCE OF
//!       RDN SET
//!         SEQUENCE { OID, value }
//! ```
//!
//! and returns the value of the first `2.5.4.3` (commonName) attribute in
//! the issuer. Nothing else about the certificate is interpreted.
//!
//! Lengths are limited to the short form (`< 0x80`) and the two-byte long
//! form (`0x82`). Everything else, including the indefinite form `0x80` and
//! the one-byte long form `0x81`, is rejected.

use log::trace;

use crate::error::DerError;

/// SEQUENCE tag.
pub const TAG_SEQUENCE: u8 = 0x30;
/// SET tag.
pub const TAG_SET: u8 = 0x31;
/// INTEGER tag.
pub const TAG_INTEGER: u8 = 0x02;
/// OBJECT IDENTIFIER tag.
pub const TAG_OID: u8 = 0x06;
/// PrintableString tag.
pub const TAG_PRINTABLE_STRING: u8 = 0x13;
/// Context-specific constructed `[0]` tag.
pub const TAG_CONTEXT_0: u8 = 0xa0;

/// Encoded OID body of `id-at-commonName` (2.5.4.3).
pub const OID_COMMON_NAME: [u8; 3] = [0x55, 0x04, 0x03];

/// One decoded tag-length-value element.
#[derive(Debug, Clone, Copy)]
pub struct Element<'a> {
    /// Tag byte.
    pub tag: u8,
    /// Content bytes.
    pub content: &'a [u8],
    /// Offset just past the element inside its container.
    pub end: usize,
}

/// Decode the element header at `pos` inside `container`.
///
/// The whole element, header and content, must lie inside `container`.
pub fn read_element(container: &[u8], pos: usize) -> Result<Element<'_>, DerError> {
    let truncated = DerError::Truncated { offset: pos };

    let header = container
        .get(pos..pos.checked_add(2).ok_or(truncated.clone())?)
        .ok_or(truncated.clone())?;
    let tag = header[0];
    let len_byte = header[1];

    let (header_len, content_len) = match len_byte {
        b if b < 0x80 => (2, usize::from(b)),
        0x82 => {
            let long = container
                .get(pos + 2..pos + 4)
                .ok_or(truncated.clone())?;
            (4, usize::from(u16::from_be_bytes([long[0], long[1]])))
        }
        byte => {
            return Err(DerError::UnsupportedLength {
                byte,
                offset: pos + 1,
            })
        }
    };

    let start = pos + header_len;
    let end = start.checked_add(content_len).ok_or(truncated.clone())?;
    let content = container.get(start..end).ok_or(truncated)?;

    Ok(Element { tag, content, end })
}

/// Decode the element at `pos` and require a specific tag.
fn expect_element(container: &[u8], pos: usize, tag: u8) -> Result<Element<'_>, DerError> {
    let element = read_element(container, pos)?;
    if element.tag != tag {
        return Err(DerError::UnexpectedTag {
            expected: tag,
            found: element.tag,
            offset: pos,
        });
    }
    Ok(element)
}

/// Extract the issuer commonName text from a DER certificate.
pub fn common_name(der: &[u8]) -> Result<&[u8], DerError> {
    let certificate = expect_element(der, 0, TAG_SEQUENCE)?;
    let tbs = expect_element(certificate.content, 0, TAG_SEQUENCE)?;
    let body = tbs.content;

    let version = expect_element(body, 0, TAG_CONTEXT_0)?;
    let serial = expect_element(body, version.end, TAG_INTEGER)?;
    let signature = expect_element(body, serial.end, TAG_SEQUENCE)?;
    let issuer = expect_element(body, signature.end, TAG_SEQUENCE)?;

    let rdns = issuer.content;
    let mut pos = 0;
    while pos < rdns.len() {
        let rdn = expect_element(rdns, pos, TAG_SET)?;
        let attribute = expect_element(rdn.content, 0, TAG_SEQUENCE)?;
        let oid = expect_element(attribute.content, 0, TAG_OID)?;

        if oid.content == OID_COMMON_NAME {
            let value = expect_element(attribute.content, oid.end, TAG_PRINTABLE_STRING)?;
            trace!("commonName found, {} bytes", value.content.len());
            return Ok(value.content);
        }

        pos = rdn.end;
    }

    Err(DerError::CommonNameNotFound)
}

/// Extract the issuer commonName as a length-prefixed value.
///
/// The first byte of the result is the text length, the rest is the text.
/// Returns `None` when the certificate does not decode or the name does not
/// fit a one-byte length.
pub fn common_name_prefixed(der: &[u8]) -> Option<Vec<u8>> {
    let name = common_name(der).ok()?;
    let len = u8::try_from(name.len()).ok()?;

    let mut out = Vec::with_capacity(name.len() + 1);
    out.push(len);
    out.extend_from_slice(name);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{attribute, certificate, certificate_with_cn};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_common_name_short_form() {
        let der = certificate_with_cn("Example Root CA", 16);
        assert_eq!(common_name(&der), Ok(&b"Example Root CA"[..]));
    }

    #[test]
    fn test_common_name_long_form() {
        // Padding pushes the outer lengths into the 0x82 form.
        let der = certificate_with_cn("Long Form CA", 600);
        assert_eq!(der[1], 0x82);
        assert_eq!(common_name(&der), Ok(&b"Long Form CA"[..]));
    }

    #[test]
    fn test_common_name_prefixed() {
        let der = certificate_with_cn("ABC", 0);
        assert_eq!(common_name_prefixed(&der), Some(vec![3, b'A', b'B', b'C']));
    }

    #[test]
    fn test_common_name_missing() {
        let der = certificate(
            &[attribute(&[0x55, 0x04, 0x06], TAG_PRINTABLE_STRING, b"CZ")],
            0,
        );
        assert_eq!(common_name(&der), Err(DerError::CommonNameNotFound));
        assert_eq!(common_name_prefixed(&der), None);
    }

    #[test]
    fn test_common_name_must_be_printable_string() {
        let der = certificate(&[attribute(&OID_COMMON_NAME, 0x0c, b"utf8 name")], 0);
        assert!(matches!(
            common_name(&der),
            Err(DerError::UnexpectedTag { expected: TAG_PRINTABLE_STRING, found: 0x0c, .. })
        ));
    }

    #[test]
    fn test_length_0x81_rejected() {
        let mut der = certificate_with_cn("X", 0);
        // Rewrite the outer header to the one-byte long form.
        let len = der[1];
        der.splice(0..2, [TAG_SEQUENCE, 0x81, len]);
        assert_eq!(
            common_name(&der),
            Err(DerError::UnsupportedLength { byte: 0x81, offset: 1 })
        );
    }

    #[test]
    fn test_indefinite_length_rejected() {
        assert!(matches!(
            common_name(&[TAG_SEQUENCE, 0x80, 0x00, 0x00]),
            Err(DerError::UnsupportedLength { byte: 0x80, .. })
        ));
    }

    #[test]
    fn test_truncated_input() {
        let der = certificate_with_cn("Truncated", 0);
        for cut in 0..der.len() {
            assert!(common_name(&der[..cut]).is_err(), "accepted prefix of {} bytes", cut);
        }
        assert!(common_name(&[]).is_err());
        assert!(common_name(&[TAG_SEQUENCE]).is_err());
    }

    #[test]
    fn test_inner_length_exceeding_container() {
        // The TBS claims more content than the certificate holds.
        let der = [TAG_SEQUENCE, 0x04, TAG_SEQUENCE, 0x7f, 0x00, 0x00];
        assert_eq!(common_name(&der), Err(DerError::Truncated { offset: 0 }));
    }

    #[test]
    fn test_arbitrary_bytes_never_panic() {
        let mut rng = ChaCha8Rng::seed_from_u64(0x1234_5678);
        for _ in 0..2000 {
            let len = rng.gen_range(0..64);
            let mut buf = vec![0u8; len];
            rng.fill(&mut buf[..]);
            let _ = common_name(&buf);
        }
    }

    #[test]
    fn test_random_tails_after_valid_header_never_panic() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let der = certificate_with_cn("Fuzzed", 0);
        for _ in 0..500 {
            let mut buf = der.clone();
            let at = rng.gen_range(0..buf.len());
            buf[at] = rng.gen();
            let _ = common_name(&buf);
        }
    }
}
