//! TLS authentication mode and certificate pinning.

use std::fmt;
use std::str::FromStr;

use log::info;

use crate::error::{CertError, CertResult};
use crate::store::CertificateStore;

/// Length of a SHA-1 fingerprint in bytes.
pub const FINGERPRINT_LENGTH: usize = 20;

/// SHA-1 fingerprint of a server certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint([u8; FINGERPRINT_LENGTH]);

impl Fingerprint {
    /// Wrap raw fingerprint bytes.
    pub fn new(bytes: [u8; FINGERPRINT_LENGTH]) -> Self {
        Fingerprint(bytes)
    }

    /// Parse 40 hex digits, either contiguous or as colon separated pairs.
    pub fn parse(text: &str) -> CertResult<Self> {
        let compact: String = match text.len() {
            40 => text.to_string(),
            59 => {
                let bytes = text.as_bytes();
                let separators_ok = (2..bytes.len()).step_by(3).all(|i| bytes[i] == b':');
                if !separators_ok {
                    return Err(CertError::InvalidFingerprint);
                }
                text.split(':').collect()
            }
            _ => return Err(CertError::InvalidFingerprint),
        };

        let mut bytes = [0u8; FINGERPRINT_LENGTH];
        hex::decode_to_slice(&compact, &mut bytes).map_err(|_| CertError::InvalidFingerprint)?;
        Ok(Fingerprint(bytes))
    }

    /// Raw fingerprint bytes.
    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LENGTH] {
        &self.0
    }
}

impl FromStr for Fingerprint {
    type Err = CertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Fingerprint::parse(s)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// How the server certificate of a TLS link is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsAuthMode {
    /// No verification.
    #[default]
    None = 0,
    /// Compare the SHA-1 fingerprint of the server certificate.
    Fingerprint = 1,
    /// Verify the chain against the loaded certificates.
    Chain = 2,
}

impl TryFrom<u32> for TlsAuthMode {
    type Error = CertError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TlsAuthMode::None),
            1 => Ok(TlsAuthMode::Fingerprint),
            2 => Ok(TlsAuthMode::Chain),
            other => Err(CertError::UnknownAuthMode(other)),
        }
    }
}

/// Trust material selected for a new TLS link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustCredentials<'a> {
    /// Accept any certificate.
    Insecure,
    /// Accept a certificate with this fingerprint.
    Fingerprint(&'a Fingerprint),
    /// Accept a chain ending in one of these DER certificates.
    Anchors(&'a [Vec<u8>]),
}

/// Authentication mode plus the pinned fingerprint.
#[derive(Debug, Clone, Default)]
pub struct TrustConfig {
    mode: TlsAuthMode,
    fingerprint: Option<Fingerprint>,
}

impl TrustConfig {
    /// Current authentication mode.
    pub fn mode(&self) -> TlsAuthMode {
        self.mode
    }

    /// Pinned fingerprint, if one was set.
    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        self.fingerprint.as_ref()
    }

    /// Switch the authentication mode.
    ///
    /// Fingerprint mode needs a fingerprint and chain mode needs at least one
    /// loaded certificate. On failure the previous mode is kept.
    pub fn set_mode(&mut self, mode: TlsAuthMode, store: &CertificateStore) -> CertResult<()> {
        match mode {
            TlsAuthMode::Fingerprint if self.fingerprint.is_none() => {
                return Err(CertError::FingerprintNotValid)
            }
            TlsAuthMode::Chain if store.is_empty() => return Err(CertError::NoCertificates),
            _ => {}
        }

        if mode != self.mode {
            info!("TLS auth mode {:?} -> {:?}", self.mode, mode);
        }
        self.mode = mode;
        Ok(())
    }

    /// Pin a new fingerprint.
    pub fn set_fingerprint(&mut self, fingerprint: Fingerprint) {
        self.fingerprint = Some(fingerprint);
    }

    /// Trust material for a new TLS link.
    ///
    /// Fails when the store was emptied after chain mode was selected.
    pub fn credentials<'a>(&'a self, store: &'a CertificateStore) -> CertResult<TrustCredentials<'a>> {
        match self.mode {
            TlsAuthMode::None => Ok(TrustCredentials::Insecure),
            TlsAuthMode::Fingerprint => self
                .fingerprint
                .as_ref()
                .map(TrustCredentials::Fingerprint)
                .ok_or(CertError::FingerprintNotValid),
            TlsAuthMode::Chain if store.is_empty() => Err(CertError::NoCertificates),
            TlsAuthMode::Chain => Ok(TrustCredentials::Anchors(store.trust_anchors())),
        }
    }
}
