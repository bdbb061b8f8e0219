//! Content fingerprints for raw image bytes.

use sha2::{Digest, Sha256};
use std::fmt;

/// Hex SHA-256 digest of an image's bytes. The empty fingerprint is the
/// "unreadable input" sentinel and must never be cached.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn fingerprint(bytes: &[u8]) -> Fingerprint {
    if bytes.is_empty() {
        return Fingerprint::default();
    }
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Fingerprint(hex::encode(hasher.finalize()))
}
