//! Error types for certificate handling.

use thiserror::Error;

/// Errors from the DER reader.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DerError {
    /// An element had a different tag than the grammar requires.
    #[error("unexpected tag 0x{found:02x} at offset {offset} (expected 0x{expected:02x})")]
    UnexpectedTag { expected: u8, found: u8, offset: usize },

    /// Only short-form lengths and the two-byte long form are accepted.
    #[error("unsupported length byte 0x{byte:02x} at offset {offset}")]
    UnsupportedLength { byte: u8, offset: usize },

    /// A header or its content ran past the enclosing element.
    #[error("element at offset {offset} exceeds its container")]
    Truncated { offset: usize },

    /// The issuer has no commonName attribute.
    #[error("commonName not found")]
    CommonNameNotFound,
}

/// Errors from certificate loading, storage and trust configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CertError {
    /// A byte outside the PEM alphabet arrived during loading.
    #[error("illegal character 0x{0:02x} in certificate text")]
    IllegalCharacter(u8),

    /// The PEM text exceeded the load buffer.
    #[error("certificate text too long: max {max} bytes")]
    PemTooLong { max: usize },

    /// The PEM markers were missing or out of order.
    #[error("malformed PEM framing")]
    MalformedPem,

    /// The PEM body was not valid base64.
    #[error("invalid base64 in certificate body")]
    InvalidBase64,

    /// The decoded bytes do not look like a DER certificate.
    #[error("decoded data is not a certificate")]
    NotACertificate,

    /// A capacity below the number of loaded certificates was requested.
    #[error("capacity {requested} below {loaded} loaded certificates")]
    CapacityBelowLoaded { requested: usize, loaded: usize },

    /// Fingerprint text was not 20 hex bytes.
    #[error("invalid fingerprint")]
    InvalidFingerprint,

    /// Fingerprint authentication needs a valid fingerprint first.
    #[error("fp not valid")]
    FingerprintNotValid,

    /// Chain authentication needs at least one loaded certificate.
    #[error("CA cert not loaded")]
    NoCertificates,

    /// Unknown authentication mode number.
    #[error("unknown authentication mode {0}")]
    UnknownAuthMode(u32),
}

/// Result type alias for certificate operations.
pub type CertResult<T> = Result<T, CertError>;
