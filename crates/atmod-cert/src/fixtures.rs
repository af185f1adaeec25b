//! DER certificate builders for tests.
//!
//! Available in this crate's tests and, through the `test-support`
//! feature, to crates that need certificates as fixtures.

use crate::der::{
    OID_COMMON_NAME, TAG_CONTEXT_0, TAG_INTEGER, TAG_OID, TAG_PRINTABLE_STRING, TAG_SEQUENCE,
    TAG_SET,
};

/// Encode one TLV with a short-form or `0x82` length.
pub fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    if content.len() < 0x80 {
        out.push(content.len() as u8);
    } else {
        out.push(0x82);
        out.extend_from_slice(&(content.len() as u16).to_be_bytes());
    }
    out.extend_from_slice(content);
    out
}

/// One RDN holding a single `{ oid, value }` attribute.
pub fn attribute(oid: &[u8], tag: u8, value: &[u8]) -> Vec<u8> {
    let mut seq = tlv(TAG_OID, oid);
    seq.extend(tlv(tag, value));
    tlv(TAG_SET, &tlv(TAG_SEQUENCE, &seq))
}

/// Build a certificate with the given issuer RDNs and some padding in the
/// signature value.
pub fn certificate(rdns: &[Vec<u8>], padding: usize) -> Vec<u8> {
    let mut tbs = tlv(TAG_CONTEXT_0, &tlv(TAG_INTEGER, &[2]));
    tbs.extend(tlv(TAG_INTEGER, &[0x01, 0x23, 0x45]));
    tbs.extend(tlv(
        TAG_SEQUENCE,
        &tlv(TAG_OID, &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x0b]),
    ));
    tbs.extend(tlv(TAG_SEQUENCE, &rdns.concat()));

    let mut cert = tlv(TAG_SEQUENCE, &tbs);
    cert.extend(tlv(0x03, &vec![0x5a; padding]));
    tlv(TAG_SEQUENCE, &cert)
}

/// A certificate whose issuer is `C=CZ, O=Example Org, CN=<cn>`.
pub fn certificate_with_cn(cn: &str, padding: usize) -> Vec<u8> {
    certificate(
        &[
            attribute(&[0x55, 0x04, 0x06], TAG_PRINTABLE_STRING, b"CZ"),
            attribute(&[0x55, 0x04, 0x0a], TAG_PRINTABLE_STRING, b"Example Org"),
            attribute(&OID_COMMON_NAME, TAG_PRINTABLE_STRING, cn.as_bytes()),
        ],
        padding,
    )
}
