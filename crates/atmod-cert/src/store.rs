//! Bounded certificate store.

use log::debug;

use crate::der;
use crate::error::{CertError, CertResult};

/// Default number of certificates the store accepts.
pub const DEFAULT_CAPACITY: usize = 5;

/// Name reported for certificates without a readable commonName.
pub const PLACEHOLDER_NAME: &str = "cert ok";

/// Result of [`CertificateStore::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Stored at the given 1-based position.
    Added(usize),
    /// Byte-identical to the certificate at the given 1-based position.
    Duplicate(usize),
    /// The store is full.
    CapacityExceeded,
}

/// Ordered, deduplicated collection of DER certificates.
#[derive(Debug, Clone)]
pub struct CertificateStore {
    entries: Vec<Vec<u8>>,
    capacity: usize,
}

impl Default for CertificateStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl CertificateStore {
    /// Create an empty store.
    pub fn new(capacity: usize) -> Self {
        CertificateStore {
            entries: Vec::new(),
            capacity,
        }
    }

    /// Add a certificate unless it is already present or the store is full.
    pub fn add(&mut self, der: Vec<u8>) -> AddOutcome {
        if let Some(index) = self.entries.iter().position(|e| *e == der) {
            return AddOutcome::Duplicate(index + 1);
        }
        if self.is_full() {
            return AddOutcome::CapacityExceeded;
        }

        self.entries.push(der);
        debug!("certificate stored at {}", self.entries.len());
        AddOutcome::Added(self.entries.len())
    }

    /// Remove the certificate at a 1-based position, compacting the rest.
    pub fn remove(&mut self, index: usize) -> Option<Vec<u8>> {
        if index == 0 || index > self.entries.len() {
            return None;
        }
        Some(self.entries.remove(index - 1))
    }

    /// Name of the certificate at a 1-based position.
    ///
    /// Falls back to [`PLACEHOLDER_NAME`] when the commonName cannot be read.
    pub fn describe(&self, index: usize) -> Option<String> {
        let der = self.get(index)?;
        let name = match der::common_name(der) {
            Ok(cn) => String::from_utf8_lossy(cn).into_owned(),
            Err(e) => {
                debug!("certificate {}: {}", index, e);
                PLACEHOLDER_NAME.to_string()
            }
        };
        Some(name)
    }

    /// DER bytes of the certificate at a 1-based position.
    pub fn get(&self, index: usize) -> Option<&[u8]> {
        index
            .checked_sub(1)
            .and_then(|i| self.entries.get(i))
            .map(Vec::as_slice)
    }

    /// All certificates, in load order, for chain verification.
    pub fn trust_anchors(&self) -> &[Vec<u8>] {
        &self.entries
    }

    /// Number of stored certificates.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no certificates.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether another certificate would exceed the capacity.
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Maximum number of certificates.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change the maximum number of certificates.
    pub fn set_capacity(&mut self, capacity: usize) -> CertResult<()> {
        if capacity < self.entries.len() {
            return Err(CertError::CapacityBelowLoaded {
                requested: capacity,
                loaded: self.entries.len(),
            });
        }
        self.capacity = capacity;
        Ok(())
    }

    /// Remove every certificate.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
