//! Trust certificates for TLS links.
//!
//! This crate holds everything the modem knows about certificates:
//!
//! - [`der`]: a deliberately small DER walker that pulls the issuer
//!   commonName out of a certificate without a general ASN.1 library
//! - [`pem`]: collection of PEM text typed over the serial line and its
//!   decoding to DER
//! - [`store`]: the bounded, deduplicated certificate list used as trust
//!   anchors for chain verification
//! - [`trust`]: the TLS authentication mode and pinned SHA-1 fingerprint
//! - `fixtures`: DER certificate builders, for tests and the
//!   `test-support` feature
//!
//! Input reaching these modules comes from the serial host or from a remote
//! peer, so every decoder here is bounds checked and fails with an error
//! instead of panicking.

pub mod der;
mod error;
#[cfg(any(test, feature = "test-support"))]
pub mod fixtures;
pub mod pem;
pub mod store;
pub mod trust;

pub use error::*;
pub use store::{AddOutcome, CertificateStore};
pub use trust::{Fingerprint, TlsAuthMode, TrustConfig, TrustCredentials};
